//! Logging setup for the binary.
//!
//! Events go to stdout in compact form and, through a non-blocking writer, to
//! `sessions.log` in the log directory.

use std::path::PathBuf;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable holding an `EnvFilter` directive.
pub const LOG_ENV: &str = "PILL_SYNC_LOG";

/// File name of the session log.
pub const LOG_FILE_NAME: &str = "sessions.log";

/// Keeps the file writer alive for the lifetime of the program.
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Filter directive used when [`LOG_ENV`] is not set.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose { "debug" } else { "info" }
}

/// Install the global subscriber.
///
/// `log_dir` overrides the platform data directory.
///
/// # Errors
///
/// Returns an error if the filter cannot be parsed, the log directory cannot
/// be created, or a subscriber is already installed.
pub fn init(verbose: bool, log_dir: Option<PathBuf>) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(default_directive(verbose)))?;

    let log_dir = log_dir.unwrap_or_else(log_directory);
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(&log_dir, LOG_FILE_NAME);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(true)
        .with_ansi(false);

    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_target(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .try_init()?;

    let _ = FILE_GUARD.set(file_guard);
    tracing::debug!(dir = %log_dir.display(), "logging to {LOG_FILE_NAME}");

    Ok(())
}

/// Platform data directory for logs, falling back to `./logs`.
pub fn log_directory() -> PathBuf {
    directories::ProjectDirs::from("", "", "pill-sync")
        .map(|dirs| dirs.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("./logs"))
}
