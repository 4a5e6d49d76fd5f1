//! BlueZ D-Bus backend for Pill scanning.
//!
//! This backend uses the `bluer` crate to communicate with the BlueZ daemon
//! via D-Bus. It requires the `bluetoothd` daemon to be running.
//!
//! Each scan window registers an advertisement monitor matching the Pill's
//! company id. Once the target device is found, later advertisements arrive
//! as manufacturer data property changes on the device.

use super::{
    ADVERTISEMENT_CHANNEL_BUFFER_SIZE, Advertisement, PILL_MANUFACTURER_ID, ScanError, Scanner,
    WindowFuture,
};
use crate::mac_address::MacAddress;
use bluer::monitor::{Monitor, MonitorEvent, Pattern};
use bluer::{Adapter, Address, DeviceEvent, DeviceProperty, Session};
use futures::{Stream, StreamExt};
use std::pin::Pin;
use tokio::sync::mpsc;

/// Bluetooth manufacturer-specific data type (AD type 0xFF)
const MANUFACTURER_DATA_TYPE: u8 = 0xff;

/// Company id bytes as they appear on air (little-endian), followed by the
/// Pill payload marker.
const PILL_PATTERN: [u8; 4] = [0x52, 0x41, b'P', b'T'];

type DeviceEvents = Pin<Box<dyn Stream<Item = DeviceEvent> + Send>>;

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

/// Scanner backed by the default BlueZ adapter.
#[derive(Debug, Default, Clone, Copy)]
pub struct BluerScanner;

impl Scanner for BluerScanner {
    fn open_window(&self, target: MacAddress) -> WindowFuture<'_> {
        Box::pin(open_window(target))
    }
}

async fn open_window(target: MacAddress) -> Result<mpsc::Receiver<Advertisement>, ScanError> {
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;

    let (tx, rx) = mpsc::channel(ADVERTISEMENT_CHANNEL_BUFFER_SIZE);

    let pattern = Pattern {
        data_type: MANUFACTURER_DATA_TYPE,
        start_position: 0,
        content: PILL_PATTERN.to_vec(),
    };

    let monitor_manager = adapter.monitor().await?;
    let mut monitor_handle = monitor_manager
        .register(Monitor {
            patterns: Some(vec![pattern]),
            ..Default::default()
        })
        .await?;

    tracing::debug!(mac = %target, "scan window opened");

    // The task owns all Bluetooth state; it ends when the receiver is dropped.
    tokio::spawn(async move {
        let _session = session;
        let _monitor_manager = monitor_manager;
        let mut changes: Option<DeviceEvents> = None;

        loop {
            tokio::select! {
                _ = tx.closed() => break,
                event = monitor_handle.next() => match event {
                    Some(MonitorEvent::DeviceFound(device_id)) if MacAddress::from(device_id.device) == target => {
                        if let Err(e) = forward_current(&adapter, device_id.device, &tx).await {
                            tracing::debug!(mac = %target, error = %e, "failed to read advertisement");
                        }
                        if changes.is_none() {
                            changes = watch_device(&adapter, device_id.device).await;
                        }
                    }
                    Some(_) => {}
                    None => break,
                },
                Some(event) = next_change(&mut changes) => {
                    if let DeviceEvent::PropertyChanged(DeviceProperty::ManufacturerData(data)) = event
                        && let Some(payload) = data.get(&PILL_MANUFACTURER_ID)
                        && tx.send(Advertisement::new(target, payload.clone())).await.is_err()
                    {
                        break;
                    }
                }
            }
        }

        tracing::debug!(mac = %target, "scan window closed");
    });

    Ok(rx)
}

/// Send the device's current Pill payload, if it has one.
async fn forward_current(
    adapter: &Adapter,
    address: Address,
    tx: &mpsc::Sender<Advertisement>,
) -> Result<(), ScanError> {
    let device = adapter.device(address)?;

    let Some(manufacturer_data) = device.manufacturer_data().await? else {
        return Ok(());
    };
    if let Some(payload) = manufacturer_data.get(&PILL_MANUFACTURER_ID) {
        let _ = tx.send(Advertisement::new(address.into(), payload.clone())).await;
    }

    Ok(())
}

async fn watch_device(adapter: &Adapter, address: Address) -> Option<DeviceEvents> {
    let device = adapter.device(address).ok()?;
    match device.events().await {
        Ok(events) => Some(Box::pin(events)),
        Err(e) => {
            tracing::debug!(mac = %MacAddress::from(address), error = %e, "cannot watch device");
            None
        }
    }
}

async fn next_change(changes: &mut Option<DeviceEvents>) -> Option<DeviceEvent> {
    match changes {
        Some(events) => events.next().await,
        None => std::future::pending().await,
    }
}
