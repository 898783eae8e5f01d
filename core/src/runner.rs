//! Re-audit driver for configuration changes.
//!
//! Each [`AuditRunner::trigger`] starts a new generation and cancels the one
//! in flight. Only the newest generation may publish, so the displayed result
//! is always from the last trigger that completed. A failed run publishes
//! nothing and the previous result stays current.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::ConfigError;
use crate::engine::AuditEngine;
use crate::engine::AuditRequest;
use crate::error::AuditError;
use crate::result::AuditResult;

/// How a triggered run ended.
#[derive(Debug)]
pub enum RunOutcome {
    Published { generation: u64, repositories: usize },
    /// A newer trigger replaced this run before it could publish.
    Superseded { generation: u64 },
    Failed { generation: u64, error: AuditError },
}

impl RunOutcome {
    pub fn generation(&self) -> u64 {
        match self {
            RunOutcome::Published { generation, .. }
            | RunOutcome::Superseded { generation }
            | RunOutcome::Failed { generation, .. } => *generation,
        }
    }
}

#[derive(Default)]
struct RunState {
    generation: u64,
    in_flight: Option<CancellationToken>,
}

pub struct AuditRunner {
    engine: Arc<AuditEngine>,
    latest: watch::Sender<Option<Arc<AuditResult>>>,
    outcomes: mpsc::UnboundedSender<RunOutcome>,
    state: Mutex<RunState>,
}

impl AuditRunner {
    pub fn new(engine: Arc<AuditEngine>) -> (Arc<Self>, mpsc::UnboundedReceiver<RunOutcome>) {
        let (latest, _) = watch::channel(None);
        let (outcomes, outcomes_rx) = mpsc::unbounded_channel();
        let runner = Arc::new(Self {
            engine,
            latest,
            outcomes,
            state: Mutex::new(RunState::default()),
        });
        (runner, outcomes_rx)
    }

    /// Receiver that sees every published result.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<AuditResult>>> {
        self.latest.subscribe()
    }

    pub fn latest(&self) -> Option<Arc<AuditResult>> {
        self.latest.borrow().clone()
    }

    /// Generation of the most recent trigger; 0 before the first.
    pub fn generation(&self) -> u64 {
        self.state().generation
    }

    /// Start a run for `request`, cancelling any run in flight.
    pub fn trigger(self: &Arc<Self>, request: AuditRequest) -> u64 {
        let cancel = CancellationToken::new();
        let generation = {
            let mut state = self.state();
            if let Some(previous) = state.in_flight.replace(cancel.clone()) {
                previous.cancel();
            }
            state.generation += 1;
            state.generation
        };
        tracing::debug!(generation, user = %request.user, "audit triggered");

        let runner = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = runner.run(generation, &request, &cancel).await;
            runner.finish(outcome);
        });
        generation
    }

    /// Trigger from a freshly reloaded configuration.
    ///
    /// A configuration that failed to load is reported as a failed run and
    /// leaves both the in-flight run and the published result alone.
    pub fn trigger_from_config(
        self: &Arc<Self>,
        loaded: Result<AuditRequest, ConfigError>,
    ) -> Option<u64> {
        match loaded {
            Ok(request) => Some(self.trigger(request)),
            Err(err) => {
                let generation = self.generation();
                tracing::warn!(error = %err, "configuration reload failed; keeping previous result");
                self.finish(RunOutcome::Failed {
                    generation,
                    error: err.into(),
                });
                None
            }
        }
    }

    /// Cancel the run in flight, if any.
    pub fn cancel(&self) {
        if let Some(token) = self.state().in_flight.take() {
            token.cancel();
        }
    }

    async fn run(
        &self,
        generation: u64,
        request: &AuditRequest,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        match self.engine.audit_with_cancel(request, cancel).await {
            Ok(result) => self.publish(generation, result),
            Err(AuditError::Cancelled) => RunOutcome::Superseded { generation },
            Err(error) if self.is_current(generation) => RunOutcome::Failed { generation, error },
            Err(error) => {
                tracing::debug!(generation, error = %error, "stale run failed");
                RunOutcome::Superseded { generation }
            }
        }
    }

    fn publish(&self, generation: u64, result: AuditResult) -> RunOutcome {
        let mut state = self.state();
        if state.generation != generation {
            return RunOutcome::Superseded { generation };
        }
        state.in_flight = None;
        let repositories = result.repositories().len();
        self.latest.send_replace(Some(Arc::new(result)));
        RunOutcome::Published {
            generation,
            repositories,
        }
    }

    fn finish(&self, outcome: RunOutcome) {
        match &outcome {
            RunOutcome::Published {
                generation,
                repositories,
            } => tracing::info!(generation, repositories, "audit published"),
            RunOutcome::Superseded { generation } => {
                tracing::debug!(generation, "audit superseded");
            }
            RunOutcome::Failed { generation, error } => {
                tracing::error!(generation, error = %error, "audit failed");
            }
        }
        // Nobody listening is fine.
        let _ = self.outcomes.send(outcome);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.state().generation == generation
    }

    fn state(&self) -> MutexGuard<'_, RunState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
