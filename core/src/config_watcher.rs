//! Polling watcher for the configuration file.
//!
//! The watcher samples the file's modification time on a fixed interval and
//! calls back once per observed change. The first sample only records a
//! baseline, and a sample that cannot be taken (file missing mid-edit,
//! permission error) is skipped without touching the recorded value.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::SystemTime;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Poll interval used by the CLI.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Invoked on the watcher task once per detected change. Must not block.
pub type ChangeCallback = Arc<dyn Fn() + Send + Sync>;

/// Change detection over a sequence of mtime samples.
#[derive(Debug, Default, Clone)]
pub struct MtimeTracker {
    last: Option<SystemTime>,
}

impl MtimeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one sample; `None` means the file could not be read this time.
    /// Returns true when the sample differs from the recorded one.
    pub fn observe(&mut self, sample: Option<SystemTime>) -> bool {
        let Some(mtime) = sample else {
            return false;
        };
        match self.last.replace(mtime) {
            None => false,
            Some(previous) => previous != mtime,
        }
    }

    pub fn last_seen(&self) -> Option<SystemTime> {
        self.last
    }
}

/// Background task polling one file.
pub struct ConfigWatcher {
    path: PathBuf,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ConfigWatcher {
    /// Spawn the polling task on the current tokio runtime.
    pub fn start(path: impl Into<PathBuf>, interval: Duration, callback: ChangeCallback) -> Self {
        let path = path.into();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(poll_loop(
            path.clone(),
            interval,
            callback,
            cancel.clone(),
        ));
        tracing::debug!(path = %path.display(), interval_ms = interval.as_millis() as u64, "config watcher started");
        Self {
            path,
            cancel,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop polling and wait for the task to exit.
    ///
    /// Safe to call more than once. A task still running after the join
    /// timeout is aborted.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        let Some(mut handle) = handle else {
            return;
        };
        match tokio::time::timeout(STOP_TIMEOUT, &mut handle).await {
            Ok(Ok(())) => tracing::debug!(path = %self.path.display(), "config watcher stopped"),
            Ok(Err(err)) => {
                tracing::warn!(path = %self.path.display(), error = %err, "config watcher task failed");
            }
            Err(_) => {
                tracing::warn!(path = %self.path.display(), "config watcher did not stop in time; aborting");
                handle.abort();
                let _ = handle.await;
            }
        }
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn poll_loop(
    path: PathBuf,
    interval: Duration,
    callback: ChangeCallback,
    cancel: CancellationToken,
) {
    let mut tracker = MtimeTracker::new();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let sample = modified_time(&path).await;
        if tracker.observe(sample) {
            tracing::info!(path = %path.display(), "configuration changed");
            callback();
        }
    }
}

async fn modified_time(path: &Path) -> Option<SystemTime> {
    match tokio::fs::metadata(path).await.and_then(|meta| meta.modified()) {
        Ok(mtime) => Some(mtime),
        Err(err) => {
            tracing::trace!(path = %path.display(), error = %err, "config file unreadable; skipping poll");
            None
        }
    }
}
