use crate::config::{Config, ConfigStore, SessionConfig};
use crate::decoder::PACKET_LEN;
use crate::mac_address::MacAddress;
use crate::observer::Observer;
use crate::scanner::{Advertisement, ScanError, Scanner, WindowFuture};
use crate::session::{SessionContext, SessionSnapshot};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// A stable MAC address for unit tests.
pub const TEST_MAC: MacAddress = MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

/// Session for [`TEST_MAC`] with a 60 second poll interval.
pub fn test_session_config() -> SessionConfig {
    let mut config = SessionConfig::new("Traditional", "Pill 1", TEST_MAC);
    config.poll_interval_secs = 60;
    config
}

/// Offline context over an in-memory store holding `sessions`.
pub fn offline_context(sessions: Vec<SessionConfig>) -> (SessionContext, Arc<RecordingObserver>) {
    let observer = Arc::new(RecordingObserver::default());
    let context = SessionContext {
        sync: None,
        store: ConfigStore::in_memory(Config {
            sessions,
            ..Default::default()
        }),
        observer: observer.clone(),
    };
    (context, observer)
}

/// Builds version 1 Pill payloads. Defaults describe a plausible reading.
#[derive(Debug, Clone)]
pub struct PacketV1Builder {
    mac: [u8; 6],
    temperature: u16,
    gravity: f32,
    accel: [i16; 3],
    battery: i16,
}

impl PacketV1Builder {
    pub fn new() -> Self {
        PacketV1Builder {
            mac: TEST_MAC.0,
            temperature: 37504,
            gravity: 1050.0,
            accel: [0, 0, 16],
            battery: 25600,
        }
    }

    pub fn mac(mut self, mac: [u8; 6]) -> Self {
        self.mac = mac;
        self
    }

    pub fn temperature(mut self, raw: u16) -> Self {
        self.temperature = raw;
        self
    }

    pub fn gravity(mut self, raw: f32) -> Self {
        self.gravity = raw;
        self
    }

    pub fn accel(mut self, raw: [i16; 3]) -> Self {
        self.accel = raw;
        self
    }

    pub fn battery(mut self, raw: i16) -> Self {
        self.battery = raw;
        self
    }

    pub fn build(&self) -> [u8; PACKET_LEN] {
        let mut packet = [0u8; PACKET_LEN];
        packet[0..2].copy_from_slice(b"PT");
        packet[2] = 1;
        packet[3..9].copy_from_slice(&self.mac);
        packet[9..11].copy_from_slice(&self.temperature.to_be_bytes());
        packet[11..15].copy_from_slice(&self.gravity.to_be_bytes());
        write_accel(&mut packet, self.accel);
        packet[21..23].copy_from_slice(&self.battery.to_be_bytes());
        packet
    }
}

/// Builds version 2 Pill payloads.
#[derive(Debug, Clone)]
pub struct PacketV2Builder {
    gravity_velocity: Option<f32>,
    temperature: u16,
    gravity: f32,
    accel: [i16; 3],
    battery: u16,
}

impl PacketV2Builder {
    pub fn new() -> Self {
        PacketV2Builder {
            gravity_velocity: None,
            temperature: 37504,
            gravity: 1050.0,
            accel: [0, 0, 16],
            battery: 25600,
        }
    }

    pub fn gravity_velocity(mut self, velocity: Option<f32>) -> Self {
        self.gravity_velocity = velocity;
        self
    }

    pub fn temperature(mut self, raw: u16) -> Self {
        self.temperature = raw;
        self
    }

    pub fn gravity(mut self, raw: f32) -> Self {
        self.gravity = raw;
        self
    }

    pub fn accel(mut self, raw: [i16; 3]) -> Self {
        self.accel = raw;
        self
    }

    pub fn battery(mut self, raw: u16) -> Self {
        self.battery = raw;
        self
    }

    pub fn build(&self) -> [u8; PACKET_LEN] {
        let mut packet = [0u8; PACKET_LEN];
        packet[0..2].copy_from_slice(b"PT");
        packet[2] = 2;
        packet[4] = u8::from(self.gravity_velocity.is_some());
        packet[5..9].copy_from_slice(&self.gravity_velocity.unwrap_or(0.0).to_be_bytes());
        packet[9..11].copy_from_slice(&self.temperature.to_be_bytes());
        packet[11..15].copy_from_slice(&self.gravity.to_be_bytes());
        write_accel(&mut packet, self.accel);
        packet[21..23].copy_from_slice(&self.battery.to_be_bytes());
        packet
    }
}

impl Default for PacketV1Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for PacketV2Builder {
    fn default() -> Self {
        Self::new()
    }
}

fn write_accel(packet: &mut [u8; PACKET_LEN], accel: [i16; 3]) {
    for (i, value) in accel.iter().enumerate() {
        let offset = 15 + i * 2;
        packet[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
    }
}

/// A v1 advertisement from [`TEST_MAC`] with the given raw gravity.
pub fn advert(gravity: f32) -> Advertisement {
    Advertisement::new(TEST_MAC, PacketV1Builder::new().gravity(gravity).build())
}

/// One scripted scan window of [`FakeScanner`].
#[derive(Debug, Clone)]
pub enum FakeWindow {
    /// Advertisements delivered after the given delays, in order.
    Adverts(Vec<(Duration, Advertisement)>),
    /// Opening the window fails.
    Fail,
}

/// Scanner that plays back scripted windows.
///
/// Once the script runs out, windows open but stay silent.
#[derive(Debug, Default)]
pub struct FakeScanner {
    windows: Mutex<VecDeque<FakeWindow>>,
    opened: Mutex<Vec<MacAddress>>,
}

impl FakeScanner {
    pub fn new(windows: Vec<FakeWindow>) -> Self {
        FakeScanner {
            windows: Mutex::new(windows.into()),
            opened: Mutex::new(Vec::new()),
        }
    }

    /// Windows delivering `adverts` all at once.
    pub fn with_adverts(windows: Vec<Vec<Advertisement>>) -> Self {
        Self::new(
            windows
                .into_iter()
                .map(|adverts| {
                    FakeWindow::Adverts(adverts.into_iter().map(|a| (Duration::ZERO, a)).collect())
                })
                .collect(),
        )
    }

    /// Targets of every window opened so far, failed ones included.
    pub fn opened(&self) -> Vec<MacAddress> {
        self.opened.lock().unwrap().clone()
    }
}

impl Scanner for FakeScanner {
    fn open_window(&self, target: MacAddress) -> WindowFuture<'_> {
        self.opened.lock().unwrap().push(target);
        let window = self
            .windows
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(FakeWindow::Adverts(Vec::new()));

        Box::pin(async move {
            let adverts = match window {
                FakeWindow::Fail => return Err(ScanError::Bluetooth("adapter unavailable".into())),
                FakeWindow::Adverts(adverts) => adverts,
            };
            let (tx, rx) = mpsc::channel(adverts.len().max(1));
            tokio::spawn(async move {
                for (delay, advert) in adverts {
                    tokio::time::sleep(delay).await;
                    if tx.send(advert).await.is_err() {
                        return;
                    }
                }
                // keep the window open until the receiver goes away
                tx.closed().await;
            });
            Ok(rx)
        })
    }
}

/// Observer that records every notification.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    logins: Mutex<Vec<bool>>,
    statuses: Mutex<Vec<String>>,
    reports: Mutex<Vec<SessionSnapshot>>,
}

impl RecordingObserver {
    pub fn logins(&self) -> Vec<bool> {
        self.logins.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<String> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn reports(&self) -> Vec<SessionSnapshot> {
        self.reports.lock().unwrap().clone()
    }
}

impl Observer for RecordingObserver {
    fn on_login_state_changed(&self, logged_in: bool) {
        self.logins.lock().unwrap().push(logged_in);
    }

    fn on_status(&self, message: &str) {
        self.statuses.lock().unwrap().push(message.to_string());
    }

    fn on_data_point_reported(&self, snapshot: &SessionSnapshot) {
        self.reports.lock().unwrap().push(snapshot.clone());
    }
}
