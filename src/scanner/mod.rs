//! BLE scanner abstraction for RAPT Pill devices.
//!
//! A scanner opens a bounded *scan window* for one target device and streams
//! the raw manufacturer payloads it hears. Decoding happens in the session's
//! own task, so a scanner only has to filter by company id and MAC address.
//! Dropping the returned receiver closes the window and releases the radio.

#[cfg(feature = "bluer")]
pub mod bluer;

use crate::mac_address::MacAddress;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::mpsc;

/// Company identifier the Pill uses for its manufacturer-specific data.
pub const PILL_MANUFACTURER_ID: u16 = 0x4152;

/// Channel buffer size for advertisements of one scan window.
pub const ADVERTISEMENT_CHANNEL_BUFFER_SIZE: usize = 100;

/// Error type for scanner operations.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    /// No scanner backend was compiled in
    #[error("Backend '{0}' not available (not compiled in)")]
    BackendNotAvailable(String),
}

/// Manufacturer payload heard from a device, with the company id stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub mac: MacAddress,
    pub payload: Vec<u8>,
}

impl Advertisement {
    pub fn new(mac: MacAddress, payload: impl Into<Vec<u8>>) -> Self {
        Advertisement {
            mac,
            payload: payload.into(),
        }
    }
}

/// Boxed future returned by [`Scanner::open_window`].
pub type WindowFuture<'a> =
    Pin<Box<dyn Future<Output = Result<mpsc::Receiver<Advertisement>, ScanError>> + Send + 'a>>;

/// Scanner abstraction to enable deterministic tests without Bluetooth hardware.
pub trait Scanner: Send + Sync {
    /// Start listening for Pill advertisements from `target`.
    ///
    /// The window stays open until the receiver is dropped. Implementations
    /// may also deliver advertisements from other devices; callers match the
    /// MAC address themselves.
    fn open_window(&self, target: MacAddress) -> WindowFuture<'_>;
}

/// Scanner used when no Bluetooth backend is compiled in.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableScanner;

impl Scanner for UnavailableScanner {
    fn open_window(&self, _target: MacAddress) -> WindowFuture<'_> {
        Box::pin(async { Err(ScanError::BackendNotAvailable("bluer".into())) })
    }
}
