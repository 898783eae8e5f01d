use std::io::Write;
use std::process::ExitCode;

use chrono::Utc;
use clap::Parser;
use repo_audit_cli::Cli;
use repo_audit_cli::describe_failure;
use repo_audit_cli::run;
use repo_audit_core::AuditError;

fn init_tracing() {
    // Logs go to stderr so stdout carries only the table.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::debug!(error = ?err, "run failed");
            let mut stderr = std::io::stderr().lock();
            match err.downcast_ref::<AuditError>() {
                Some(audit_err) => {
                    let _ = writeln!(stderr, "error: {}", describe_failure(audit_err, Utc::now()));
                }
                None => {
                    let _ = writeln!(stderr, "error: {err:#}");
                }
            }
            ExitCode::FAILURE
        }
    }
}
