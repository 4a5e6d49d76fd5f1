//! Core application runner for `pill-sync`.
//!
//! This module is decoupled from CLI parsing side effects, logging setup and
//! process exit codes so it can be tested with an injected scanner, observer
//! and shutdown signal.

use crate::config::{ConfigError, ConfigStore, default_config_path};
use crate::manager::SessionManager;
use crate::observer::Observer;
use crate::scanner::Scanner;
use crate::scheduler::DEFAULT_SETTLE;
use crate::session::{SessionContext, SessionSnapshot};
use crate::sync::{AuthMode, RedirectListener, SyncClient, SyncError, SyncOptions};
use crate::throttle::parse_duration;
use crate::version::{RELEASE_NAME, compare_versions, normalize_release_name};
use clap::Parser;
use std::cmp::Ordering;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Command line options.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Configuration document to load.
    /// Defaults to data.json in the platform config directory.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Decode and log readings without talking to MeadTools
    #[arg(long)]
    pub offline: bool,

    /// How long to wait for a browser login to finish.
    /// Accepts duration with suffix: 3s, 1m, 500ms, 2h.
    #[arg(long, value_parser = parse_duration, default_value = "5m")]
    pub auth_timeout: Duration,

    /// Serve browser login redirects on this localhost port
    #[arg(long, value_name = "PORT")]
    pub callback_port: Option<u16>,

    /// Pause between two scan windows of a session
    #[arg(long, value_parser = parse_duration, default_value = "10s")]
    pub settle: Duration,

    /// Timeout for a single MeadTools request
    #[arg(long, value_parser = parse_duration, default_value = "30s")]
    pub request_timeout: Duration,

    /// Directory for sessions.log, defaults to the platform data directory
    #[arg(long, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    /// Verbose output, log at debug level
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            config: None,
            offline: false,
            auth_timeout: crate::sync::DEFAULT_AUTH_TIMEOUT,
            callback_port: None,
            settle: DEFAULT_SETTLE,
            request_timeout: crate::sync::DEFAULT_REQUEST_TIMEOUT,
            log_dir: None,
            verbose: false,
        }
    }
}

/// Errors returned by the core run loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error("no session could be started")]
    NoSessions,
}

/// Whether a document written by release `stored` is newer than this build.
///
/// Unparsable release names are never considered newer.
pub fn is_newer_release(stored: &str) -> bool {
    compare_versions(
        normalize_release_name(stored),
        normalize_release_name(RELEASE_NAME),
    )
    .is_ok_and(|ordering| ordering == Ordering::Greater)
}

/// Run every configured session until `shutdown` resolves.
///
/// Returns the final snapshot of every session that was running.
pub async fn run(
    options: Options,
    scanner: Arc<dyn Scanner>,
    observer: Arc<dyn Observer>,
    shutdown: impl Future<Output = ()>,
) -> Result<Vec<SessionSnapshot>, RunError> {
    let path = match options.config {
        Some(path) => path,
        None => default_config_path()?,
    };
    let store = ConfigStore::load(&path)?;

    if let Some(stored) = store.snapshot().await.version
        && is_newer_release(&stored)
    {
        tracing::warn!(stored = %stored, running = RELEASE_NAME, "configuration was written by a newer release");
    }

    let login_disabled = matches!(AuthMode::select(&store.account().await), Ok(None));
    let sync = if options.offline {
        tracing::info!("offline, readings are only logged");
        None
    } else if login_disabled {
        tracing::info!("MeadTools login disabled, readings are only logged");
        None
    } else {
        let sync_options = SyncOptions {
            request_timeout: options.request_timeout,
            auth_timeout: options.auth_timeout,
        };
        let mut client = SyncClient::new(store.clone(), observer.clone(), sync_options).await?;
        if let Some(port) = options.callback_port {
            client = client.with_browser(Arc::new(RedirectListener::new(port)));
        }
        client.handle_login().await?;
        Some(Arc::new(client))
    };

    let context = SessionContext {
        sync,
        store,
        observer,
    };
    let manager = SessionManager::new(context, scanner).with_settle(options.settle);

    let started = manager.start_all().await;
    if started == 0 {
        return Err(RunError::NoSessions);
    }
    tracing::info!(sessions = started, "sessions running");

    shutdown.await;
    tracing::info!("shutting down");
    Ok(manager.stop_all().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AccountConfig, Config, LoginType};
    use crate::session::SessionState;
    use crate::test_utils::{FakeScanner, RecordingObserver, advert, test_session_config};
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, config: &Config) -> PathBuf {
        let path = dir.path().join("data.json");
        std::fs::write(&path, serde_json::to_string_pretty(config).unwrap()).unwrap();
        path
    }

    fn options(path: PathBuf, offline: bool) -> Options {
        let mut args = vec!["pill-sync".to_string(), "--config".to_string()];
        args.push(path.display().to_string());
        if offline {
            args.push("--offline".to_string());
        }
        Options::parse_from(args)
    }

    #[test]
    fn test_options_defaults() {
        let options = Options::parse_from(["pill-sync"]);
        assert_eq!(options.auth_timeout, Duration::from_secs(300));
        assert_eq!(options.settle, Duration::from_secs(10));
        assert_eq!(options.request_timeout, Duration::from_secs(30));
        assert_eq!(options.callback_port, None);
        assert!(!options.offline);

        let default = Options::default();
        assert_eq!(default.auth_timeout, options.auth_timeout);
        assert_eq!(default.settle, options.settle);
    }

    #[test]
    fn test_options_parse_durations() {
        let options = Options::parse_from([
            "pill-sync",
            "--settle",
            "500ms",
            "--auth-timeout",
            "2m",
            "--callback-port",
            "8181",
            "-v",
        ]);
        assert_eq!(options.settle, Duration::from_millis(500));
        assert_eq!(options.auth_timeout, Duration::from_secs(120));
        assert_eq!(options.callback_port, Some(8181));
        assert!(options.verbose);

        assert!(Options::try_parse_from(["pill-sync", "--settle", "soon"]).is_err());
    }

    #[test]
    fn test_is_newer_release() {
        assert!(is_newer_release("Release v999.0"));
        assert!(!is_newer_release(RELEASE_NAME));
        assert!(!is_newer_release("Release v0.0.1"));
        assert!(!is_newer_release("nightly"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_run_reports_and_persists_starting_gravity() {
        let dir = TempDir::new().unwrap();
        let config = test_session_config();
        let path = write_config(
            &dir,
            &Config {
                sessions: vec![config.clone()],
                ..Default::default()
            },
        );
        let scanner = Arc::new(FakeScanner::with_adverts(vec![vec![advert(1050.0)]]));
        let observer = Arc::new(RecordingObserver::default());

        let stopped = run(
            options(path.clone(), true),
            scanner,
            observer.clone(),
            tokio::time::sleep(Duration::from_secs(5)),
        )
        .await
        .unwrap();

        assert_eq!(stopped.len(), 1);
        assert_eq!(stopped[0].state, SessionState::Stopped);
        assert_eq!(stopped[0].reports, 1);
        assert_eq!(stopped[0].starting_gravity, Some(1.05));
        // offline reports never reach the observer
        assert!(observer.reports().is_empty());

        let saved = ConfigStore::load(&path).unwrap().sessions().await;
        assert_eq!(saved[0].starting_gravity, Some(1.05));
    }

    #[tokio::test]
    async fn test_missing_config_fails() {
        let dir = TempDir::new().unwrap();
        let result = run(
            options(dir.path().join("missing.json"), true),
            Arc::new(FakeScanner::default()),
            Arc::new(RecordingObserver::default()),
            std::future::ready(()),
        )
        .await;
        assert!(matches!(
            result,
            Err(RunError::Config(ConfigError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_no_sessions_fails() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, &Config::default());
        let result = run(
            options(path, true),
            Arc::new(FakeScanner::default()),
            Arc::new(RecordingObserver::default()),
            std::future::ready(()),
        )
        .await;
        assert!(matches!(result, Err(RunError::NoSessions)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_login_runs_sessions_locally() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            &Config {
                account: AccountConfig {
                    login_type: LoginType::None,
                    ..Default::default()
                },
                sessions: vec![test_session_config()],
                ..Default::default()
            },
        );
        let scanner = Arc::new(FakeScanner::with_adverts(vec![vec![advert(1050.0)]]));
        let observer = Arc::new(RecordingObserver::default());

        // no MTUrl: a disabled login never needs the service
        let stopped = run(
            options(path, false),
            scanner,
            observer.clone(),
            tokio::time::sleep(Duration::from_secs(5)),
        )
        .await
        .unwrap();

        assert_eq!(stopped.len(), 1);
        assert_eq!(stopped[0].reports, 1);
        assert_eq!(stopped[0].gravity, Some(1.05));
        assert!(observer.logins().is_empty());
        assert!(observer.reports().is_empty());
    }

    #[tokio::test]
    async fn test_missing_credentials_fail_login() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            &Config {
                account: AccountConfig {
                    base_url: Some("http://127.0.0.1:9/api".into()),
                    ..Default::default()
                },
                sessions: vec![test_session_config()],
                ..Default::default()
            },
        );
        let result = run(
            options(path, false),
            Arc::new(FakeScanner::default()),
            Arc::new(RecordingObserver::default()),
            std::future::ready(()),
        )
        .await;
        assert!(matches!(
            result,
            Err(RunError::Sync(SyncError::MissingCredentials))
        ));
    }
}
