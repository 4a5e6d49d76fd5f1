//! Scan scheduling for one session.
//!
//! A session scans in windows: the radio listens for one poll interval, then
//! rests for a short settle period before the next window opens. Stop
//! requests are honoured at window and settle boundaries and while waiting
//! for the radio, but never in the middle of handling a packet, so an upload
//! that has started always finishes.

use crate::decoder::decode;
use crate::scanner::{Advertisement, Scanner};
use crate::session::{PillSession, SessionSnapshot};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

/// Pause between two scan windows.
pub const DEFAULT_SETTLE: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct ScanScheduler {
    scanner: Arc<dyn Scanner>,
    settle: Duration,
}

impl ScanScheduler {
    pub fn new(scanner: Arc<dyn Scanner>, settle: Duration) -> Self {
        ScanScheduler { scanner, settle }
    }

    /// Drive `session` until it is stopped.
    ///
    /// `stop` requests a stop once it holds `true` (or its sender is dropped).
    /// Every accepted packet publishes a fresh snapshot on `snapshots`. The
    /// session is returned in the `Stopped` state.
    pub async fn run(
        &self,
        mut session: PillSession,
        mut stop: watch::Receiver<bool>,
        snapshots: watch::Sender<SessionSnapshot>,
    ) -> PillSession {
        let target = session.config().mac_address;
        let window = session.config().poll_interval();

        while session.is_active() {
            let opened = tokio::select! {
                biased;
                _ = stop_requested(&mut stop) => break,
                opened = self.scanner.open_window(target) => opened,
            };

            match opened {
                Ok(adverts) => {
                    if !self.listen(&mut session, adverts, window, &mut stop, &snapshots).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(mac = %target, error = %e, "failed to open scan window, retrying after {:?}", self.settle);
                }
            }

            tokio::select! {
                biased;
                _ = stop_requested(&mut stop) => break,
                _ = tokio::time::sleep(self.settle) => {}
            }
        }

        session.stop();
        snapshots.send_replace(session.snapshot());
        session
    }

    /// Feed one window's advertisements to the session.
    ///
    /// Returns `false` if a stop was requested. Dropping `adverts` on return
    /// closes the window.
    async fn listen(
        &self,
        session: &mut PillSession,
        mut adverts: mpsc::Receiver<Advertisement>,
        window: Duration,
        stop: &mut watch::Receiver<bool>,
        snapshots: &watch::Sender<SessionSnapshot>,
    ) -> bool {
        let deadline = tokio::time::sleep(window);
        tokio::pin!(deadline);
        let mut open = true;

        loop {
            tokio::select! {
                biased;
                _ = stop_requested(stop) => return false,
                _ = &mut deadline => return true,
                advert = adverts.recv(), if open => match advert {
                    Some(advert) => handle_advert(session, advert, snapshots).await,
                    None => open = false,
                },
            }
        }
    }
}

async fn handle_advert(
    session: &mut PillSession,
    advert: Advertisement,
    snapshots: &watch::Sender<SessionSnapshot>,
) {
    if advert.mac != session.config().mac_address {
        return;
    }

    match decode(&advert.payload) {
        Ok(metrics) => {
            session.on_packet(&metrics, Instant::now()).await;
            snapshots.send_replace(session.snapshot());
        }
        Err(e) => {
            tracing::debug!(mac = %advert.mac, error = %e, "discarding advertisement");
        }
    }
}

/// Resolves once a stop is requested or the stop handle is gone.
async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stop| *stop).await;
}
