//! Per-device session state machine.
//!
//! A [`PillSession`] tracks one Pill for one brew:
//!
//! ```text
//! Idle -> Initializing -> Active -> Stopped
//!   ^          |
//!   +----------+  (initialization failed)
//! ```
//!
//! Only an active session accepts packets. The first accepted packet latches
//! the starting gravity (unless one was carried over from the configuration)
//! and always produces a report; later reports are limited to one per poll
//! interval.

use crate::config::{ConfigStore, SessionConfig, SessionKey};
use crate::decoder::PillMetrics;
use crate::mac_address::MacAddress;
use crate::observer::Observer;
use crate::reading::{Reading, TemperatureUnit, calculate_abv};
use crate::sync::{Brew, RemoteId, SyncClient, SyncError};
use crate::throttle::Throttle;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;

/// Errors raised while starting or stopping sessions.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("not logged into MeadTools")]
    NotAuthenticated,
    #[error("MeadTools did not return the {0} list")]
    RemoteUnavailable(&'static str),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error("session {0} has been stopped")]
    Stopped(SessionKey),
    #[error("session {0} is already running")]
    AlreadyRunning(SessionKey),
    #[error("session {0} is not running")]
    NotRunning(SessionKey),
    #[error("session task for {key} failed: {message}")]
    Task { key: SessionKey, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Initializing,
    Active,
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Initializing => "initializing",
            SessionState::Active => "active",
            SessionState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Starting gravity of a session; can be set once and never changed.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StartingGravity(Option<f64>);

impl StartingGravity {
    /// A latch that already holds `carried_over`, if any.
    pub fn new(carried_over: Option<f64>) -> Self {
        StartingGravity(carried_over)
    }

    pub fn get(&self) -> Option<f64> {
        self.0
    }

    /// Set the value unless one is already held. Returns whether it was set.
    pub fn set_if_unset(&mut self, gravity: f64) -> bool {
        if self.0.is_some() {
            return false;
        }
        self.0 = Some(gravity);
        true
    }
}

/// Collaborators a session needs.
#[derive(Clone)]
pub struct SessionContext {
    /// `None` runs the session offline: readings are only logged.
    pub sync: Option<Arc<SyncClient>>,
    pub store: ConfigStore,
    pub observer: Arc<dyn Observer>,
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub brew_name: String,
    pub pill_name: String,
    pub mac: MacAddress,
    pub state: SessionState,
    pub version: Option<u8>,
    pub starting_gravity: Option<f64>,
    pub gravity: Option<f64>,
    pub gravity_velocity: Option<f64>,
    pub abv: Option<f64>,
    pub temperature: Option<f64>,
    pub unit: TemperatureUnit,
    pub battery: Option<i32>,
    pub accel: Option<(f64, f64, f64)>,
    pub last_event: Option<DateTime<Utc>>,
    pub reports: u64,
}

impl SessionSnapshot {
    pub fn key(&self) -> SessionKey {
        SessionKey {
            mac: self.mac,
            brew_name: self.brew_name.clone(),
        }
    }

    /// Pill name, or the MAC address when the Pill has no name.
    pub fn display_name(&self) -> String {
        if self.pill_name.trim().is_empty() {
            self.mac.to_string()
        } else {
            self.pill_name.clone()
        }
    }
}

impl fmt::Display for SessionSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] {}", self.brew_name, self.display_name(), self.state)?;
        let (Some(gravity), Some(temperature)) = (self.gravity, self.temperature) else {
            return f.write_str(", no data yet");
        };

        write!(f, ", SG {gravity:.4}")?;
        if let Some(start) = self.starting_gravity {
            write!(f, " (start {start:.4})")?;
        }
        if let Some(abv) = self.abv {
            write!(f, ", ABV {abv:.2}%")?;
        }
        write!(f, ", {temperature:.2}{}", self.unit)?;
        if let Some(battery) = self.battery {
            write!(f, ", battery {battery}%")?;
        }
        if let Some(at) = self.last_event {
            write!(f, ", at {}", at.format("%Y-%m-%d %H:%M:%S"))?;
        }
        Ok(())
    }
}

pub struct PillSession {
    config: SessionConfig,
    context: SessionContext,
    state: SessionState,
    starting_gravity: StartingGravity,
    reading: Option<Reading>,
    abv: Option<f64>,
    last_event: Option<DateTime<Utc>>,
    throttle: Throttle,
    reports: u64,
    hydrometer_id: Option<RemoteId>,
    brew: Option<Brew>,
}

impl fmt::Debug for PillSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PillSession")
            .field("key", &self.key())
            .field("state", &self.state)
            .field("starting_gravity", &self.starting_gravity)
            .field("reports", &self.reports)
            .finish_non_exhaustive()
    }
}

impl PillSession {
    pub fn new(config: SessionConfig, context: SessionContext) -> Self {
        PillSession {
            starting_gravity: StartingGravity::new(config.starting_gravity),
            throttle: Throttle::new(config.poll_interval()),
            config,
            context,
            state: SessionState::Idle,
            reading: None,
            abv: None,
            last_event: None,
            reports: 0,
            hydrometer_id: None,
            brew: None,
        }
    }

    pub fn key(&self) -> SessionKey {
        self.config.key()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn starting_gravity(&self) -> Option<f64> {
        self.starting_gravity.get()
    }

    pub fn reading(&self) -> Option<&Reading> {
        self.reading.as_ref()
    }

    pub fn abv(&self) -> Option<f64> {
        self.abv
    }

    pub fn reports(&self) -> u64 {
        self.reports
    }

    pub fn hydrometer_id(&self) -> Option<&RemoteId> {
        self.hydrometer_id.as_ref()
    }

    pub fn brew(&self) -> Option<&Brew> {
        self.brew.as_ref()
    }

    /// Prepare the session for packets.
    ///
    /// With sync enabled this resolves (or registers) the hydrometer and the
    /// brew on the service. On failure the session returns to `Idle`, the
    /// observer gets a status message and the error is returned.
    pub async fn initialize(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Active => return Ok(()),
            SessionState::Stopped => return Err(SessionError::Stopped(self.key())),
            SessionState::Idle | SessionState::Initializing => {}
        }

        self.state = SessionState::Initializing;
        let result = match self.context.sync.clone() {
            Some(sync) => self.link_remote(&sync).await,
            None => Ok(()),
        };

        match result {
            Ok(()) => {
                self.state = SessionState::Active;
                tracing::info!(brew = %self.config.brew_name, mac = %self.config.mac_address, "session started");
                self.context
                    .observer
                    .on_status(&format!("Started session {}", self.key()));
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Idle;
                tracing::warn!(brew = %self.config.brew_name, error = %e, "session failed to start");
                self.context
                    .observer
                    .on_status(&format!("Could not start session {}: {e}", self.key()));
                Err(e)
            }
        }
    }

    async fn link_remote(&mut self, sync: &SyncClient) -> Result<(), SessionError> {
        if !sync.is_logged_in().await {
            return Err(SessionError::NotAuthenticated);
        }

        let _registration = sync.registration_lock().await;
        sync.ensure_device_token().await?;

        let name = self.config.display_name();
        if !sync.get_hydrometers().await {
            return Err(SessionError::RemoteUnavailable("hydrometer"));
        }
        let hydrometer_id = match sync.find_hydrometer(&name).await {
            Some(hydrometer) => hydrometer.id,
            None => sync.register_hydrometer(&name).await?,
        };

        if !sync.get_brews().await {
            return Err(SessionError::RemoteUnavailable("brew"));
        }
        let brew_name = &self.config.brew_name;
        let brew = match sync.find_open_brew(brew_name).await {
            Some(brew) => {
                tracing::info!(brew = %brew_name, id = %brew.id, "found open brew");
                brew
            }
            None => {
                let brew = sync.register_brew(brew_name, &hydrometer_id).await?;
                self.forget_starting_gravity().await;
                brew
            }
        };

        sync.link_brew_to_recipe(&brew.id, self.config.linked_recipe()).await?;

        self.hydrometer_id = Some(hydrometer_id);
        self.brew = Some(brew);
        Ok(())
    }

    /// Apply one decoded packet received at `now`.
    ///
    /// Returns whether a report was emitted.
    pub async fn on_packet(&mut self, metrics: &PillMetrics, now: Instant) -> bool {
        if self.state != SessionState::Active {
            return false;
        }

        let reading = Reading::from_metrics(metrics, self.config.temperature_unit);
        if self.starting_gravity.set_if_unset(reading.gravity) {
            tracing::info!(brew = %self.config.brew_name, gravity = reading.gravity, "starting gravity set");
            self.persist_starting_gravity(reading.gravity).await;
        }
        let start = self.starting_gravity.get().unwrap_or(reading.gravity);

        self.abv = Some(calculate_abv(start, reading.gravity));
        self.reading = Some(reading);
        self.last_event = Some(Utc::now());

        if !self.throttle.should_emit_at(now) {
            tracing::trace!(brew = %self.config.brew_name, "report not due");
            return false;
        }

        self.reports += 1;
        let snapshot = self.snapshot();
        match &self.context.sync {
            Some(sync) => {
                sync.add_data_point(&snapshot).await;
            }
            None => tracing::info!(brew = %snapshot.brew_name, "{snapshot}"),
        }
        true
    }

    async fn persist_starting_gravity(&self, gravity: f64) {
        let key = self.key();
        let saved = self
            .context
            .store
            .update(|config| {
                if let Some(session) = config.session_mut(&key) {
                    session.starting_gravity = Some(gravity);
                }
            })
            .await;
        if let Err(e) = saved {
            tracing::warn!(brew = %key.brew_name, error = %e, "failed to save starting gravity");
        }
    }

    /// Drop a starting gravity carried over from an earlier brew.
    async fn forget_starting_gravity(&mut self) {
        if self.starting_gravity.get().is_none() && self.config.starting_gravity.is_none() {
            return;
        }

        tracing::info!(brew = %self.config.brew_name, "new brew, clearing carried over starting gravity");
        self.starting_gravity = StartingGravity::new(None);
        self.config.starting_gravity = None;

        let key = self.key();
        let saved = self
            .context
            .store
            .update(|config| {
                if let Some(session) = config.session_mut(&key) {
                    session.starting_gravity = None;
                }
            })
            .await;
        if let Err(e) = saved {
            tracing::warn!(brew = %key.brew_name, error = %e, "failed to clear starting gravity");
        }
    }

    /// Stop the session for good.
    pub fn stop(&mut self) {
        if self.state != SessionState::Stopped {
            tracing::info!(brew = %self.config.brew_name, mac = %self.config.mac_address, "session stopped");
            self.state = SessionState::Stopped;
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let reading = self.reading.as_ref();
        SessionSnapshot {
            brew_name: self.config.brew_name.clone(),
            pill_name: self.config.pill_name.clone(),
            mac: self.config.mac_address,
            state: self.state,
            version: reading.map(|r| r.version),
            starting_gravity: self.starting_gravity.get(),
            gravity: reading.map(|r| r.gravity),
            gravity_velocity: reading.and_then(|r| r.gravity_velocity),
            abv: self.abv,
            temperature: reading.map(|r| r.temperature),
            unit: self.config.temperature_unit,
            battery: reading.map(|r| r.battery),
            accel: reading.map(|r| r.accel),
            last_event: self.last_event,
            reports: self.reports,
        }
    }
}
