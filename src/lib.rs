//! `pill-sync` library.
//!
//! Listens for RAPT Pill hydrometer advertisements, turns them into gravity,
//! temperature and ABV readings, and reports them to MeadTools.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing, logging setup
//! and process exit codes. The core logic lives in [`crate::app`] and the
//! modules it drives, where it can be tested deterministically with an
//! injected scanner and observer.

pub mod app;
pub mod config;
pub mod decoder;
pub mod logging;
pub mod mac_address;
pub mod manager;
pub mod observer;
pub mod reading;
pub mod scanner;
pub mod scheduler;
pub mod session;
pub mod sync;
pub mod throttle;
pub mod version;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use config::{Config, ConfigError, ConfigStore, SessionConfig, SessionKey};
pub use decoder::{DecodeError, PillMetrics, decode};
pub use mac_address::MacAddress;
pub use manager::SessionManager;
pub use observer::{LogObserver, Observer};
pub use reading::{Reading, TemperatureUnit, calculate_abv};
pub use scanner::{Advertisement, ScanError, Scanner};
pub use scheduler::ScanScheduler;
pub use session::{PillSession, SessionError, SessionSnapshot, SessionState};
pub use sync::{SyncClient, SyncError, SyncOptions};
pub use throttle::{Throttle, parse_duration};
pub use version::compare_versions;
