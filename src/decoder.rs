//! Decoder for RAPT Pill manufacturer-specific advertisement data.
//!
//! A Pill advertisement payload is 23 bytes long and starts with the ASCII
//! marker `PT` followed by a protocol version byte. The two protocol versions
//! use different big-endian layouts:
//!
//! ```text
//! offset  0  1  2  3  4  5  6  7  8  9 10 11 12 13 14 15 16 17 18 19 20 21 22
//! v1      P  T  1  [    raw MAC      ] [temp] [ gravity  ] [x ] [y ] [z ] [bat]
//! v2      P  T  2  -  f  [ grav vel  ] [temp] [ gravity  ] [x ] [y ] [z ] [bat]
//! ```
//!
//! Decoding only extracts raw field values. Conversions into physical units
//! live in [`crate::reading`].

use crate::mac_address::MacAddress;
use thiserror::Error;
use zerocopy::FromBytes;
use zerocopy::byteorder::{BigEndian, F32, I16, U16};

/// Exact length of a Pill advertisement payload.
pub const PACKET_LEN: usize = 23;

/// Marker every Pill payload starts with.
pub const PACKET_PREFIX: [u8; 2] = *b"PT";

/// Errors returned when a payload is not a Pill measurement.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid payload length: expected {PACKET_LEN} bytes, got {0}")]
    InvalidLength(usize),
    #[error("invalid payload prefix: expected \"PT\", got {0:02X?}")]
    InvalidPrefix([u8; 2]),
    #[error("unsupported Pill protocol version {0}")]
    UnsupportedVersion(u8),
}

/// Raw fields of a version 1 payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsV1 {
    /// MAC address as reported by the device itself.
    pub mac: MacAddress,
    /// Temperature in 1/128 Kelvin.
    pub temperature: u16,
    /// Specific gravity in milli-gravity units.
    pub gravity: f32,
    /// Acceleration in 1/16 units.
    pub accel: [i16; 3],
    /// Battery level in 1/256 percent.
    pub battery: i16,
}

/// Raw fields of a version 2 payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsV2 {
    pub has_gravity_velocity: bool,
    /// Gravity change rate, only meaningful when `has_gravity_velocity` is set.
    pub gravity_velocity: f32,
    pub temperature: u16,
    pub gravity: f32,
    pub accel: [i16; 3],
    pub battery: u16,
}

/// A decoded Pill payload, tagged by protocol version.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PillMetrics {
    V1(MetricsV1),
    V2(MetricsV2),
}

impl PillMetrics {
    /// Protocol version the payload was encoded with.
    pub fn version(&self) -> u8 {
        match self {
            PillMetrics::V1(_) => 1,
            PillMetrics::V2(_) => 2,
        }
    }

    pub fn raw_temperature(&self) -> u16 {
        match self {
            PillMetrics::V1(m) => m.temperature,
            PillMetrics::V2(m) => m.temperature,
        }
    }

    pub fn raw_gravity(&self) -> f32 {
        match self {
            PillMetrics::V1(m) => m.gravity,
            PillMetrics::V2(m) => m.gravity,
        }
    }

    pub fn raw_accel(&self) -> [i16; 3] {
        match self {
            PillMetrics::V1(m) => m.accel,
            PillMetrics::V2(m) => m.accel,
        }
    }

    /// Battery field widened to a common type; v1 sends it signed, v2 unsigned.
    pub fn raw_battery(&self) -> i32 {
        match self {
            PillMetrics::V1(m) => i32::from(m.battery),
            PillMetrics::V2(m) => i32::from(m.battery),
        }
    }

    /// Gravity velocity, present only on v2 payloads that flag it.
    pub fn gravity_velocity(&self) -> Option<f32> {
        match self {
            PillMetrics::V2(m) if m.has_gravity_velocity => Some(m.gravity_velocity),
            _ => None,
        }
    }
}

#[repr(C)]
#[derive(FromBytes)]
struct PacketV1 {
    _prefix: [u8; 2],
    _version: u8,
    mac: [u8; 6],
    temperature: U16<BigEndian>,
    gravity: F32<BigEndian>,
    x: I16<BigEndian>,
    y: I16<BigEndian>,
    z: I16<BigEndian>,
    battery: I16<BigEndian>,
}

#[repr(C)]
#[derive(FromBytes)]
struct PacketV2 {
    _prefix: [u8; 2],
    _version: u8,
    _reserved: u8,
    gravity_velocity_flag: u8,
    gravity_velocity: F32<BigEndian>,
    temperature: U16<BigEndian>,
    gravity: F32<BigEndian>,
    x: I16<BigEndian>,
    y: I16<BigEndian>,
    z: I16<BigEndian>,
    battery: U16<BigEndian>,
}

/// Decode a Pill manufacturer data payload (company id already stripped).
///
/// The layout is chosen from the version byte alone.
///
/// # Errors
/// Returns [`DecodeError`] when the payload is not exactly 23 bytes, does not
/// start with `PT`, or carries an unknown protocol version.
pub fn decode(data: &[u8]) -> Result<PillMetrics, DecodeError> {
    let packet: [u8; PACKET_LEN] = data
        .try_into()
        .map_err(|_| DecodeError::InvalidLength(data.len()))?;

    let prefix = [packet[0], packet[1]];
    if prefix != PACKET_PREFIX {
        return Err(DecodeError::InvalidPrefix(prefix));
    }

    match packet[2] {
        1 => Ok(PillMetrics::V1(decode_v1(packet))),
        2 => Ok(PillMetrics::V2(decode_v2(packet))),
        version => Err(DecodeError::UnsupportedVersion(version)),
    }
}

fn decode_v1(packet: [u8; PACKET_LEN]) -> MetricsV1 {
    let PacketV1 {
        mac,
        temperature,
        gravity,
        x,
        y,
        z,
        battery,
        ..
    } = zerocopy::transmute!(packet);

    MetricsV1 {
        mac: MacAddress(mac),
        temperature: temperature.get(),
        gravity: gravity.get(),
        accel: [x.get(), y.get(), z.get()],
        battery: battery.get(),
    }
}

fn decode_v2(packet: [u8; PACKET_LEN]) -> MetricsV2 {
    let PacketV2 {
        gravity_velocity_flag,
        gravity_velocity,
        temperature,
        gravity,
        x,
        y,
        z,
        battery,
        ..
    } = zerocopy::transmute!(packet);

    MetricsV2 {
        has_gravity_velocity: gravity_velocity_flag != 0,
        gravity_velocity: gravity_velocity.get(),
        temperature: temperature.get(),
        gravity: gravity.get(),
        accel: [x.get(), y.get(), z.get()],
        battery: battery.get(),
    }
}
