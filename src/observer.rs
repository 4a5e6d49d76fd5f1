//! Notifications from the core to whatever presents it.
//!
//! The core only depends on the [`Observer`] capability set. The headless
//! binary uses [`LogObserver`]; a desktop or e-ink front end would provide its
//! own implementation.

use crate::session::SessionSnapshot;

pub trait Observer: Send + Sync {
    /// The account's logged-in state was (re)evaluated.
    fn on_login_state_changed(&self, logged_in: bool);

    /// A human-readable progress or failure message.
    fn on_status(&self, message: &str);

    /// A data point for this session was accepted by the remote service.
    fn on_data_point_reported(&self, snapshot: &SessionSnapshot);
}

/// Observer that writes every notification to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl Observer for LogObserver {
    fn on_login_state_changed(&self, logged_in: bool) {
        if logged_in {
            tracing::info!("logged into MeadTools");
        } else {
            tracing::warn!("not logged into MeadTools");
        }
    }

    fn on_status(&self, message: &str) {
        tracing::info!(target: "pill_sync::status", "{message}");
    }

    fn on_data_point_reported(&self, snapshot: &SessionSnapshot) {
        tracing::info!(brew = %snapshot.brew_name, mac = %snapshot.mac, "reported {snapshot}");
    }
}
