//! Physical readings derived from decoded Pill payloads.
//!
//! All conversions are applied after the raw decode:
//! - Gravity: milli-gravity → specific gravity, rounded to 4 decimals
//! - Temperature: 1/128 Kelvin → Celsius (rounded to 2 decimals) or Fahrenheit
//! - Battery: 1/256 percent → whole percent, ties rounded to even
//! - Acceleration: 1/16 units → units, unrounded

use crate::decoder::PillMetrics;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Offset between Kelvin and Celsius.
const KELVIN_OFFSET: f64 = 273.15;

/// Empirical factor turning a gravity drop into percent alcohol by volume.
const ABV_FACTOR: f64 = 131.25;

/// Unit temperatures are reported in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TemperatureUnit {
    #[default]
    Celsius,
    Fahrenheit,
}

impl TemperatureUnit {
    /// Single-letter unit symbol used by the MeadTools API.
    pub fn symbol(self) -> &'static str {
        match self {
            TemperatureUnit::Celsius => "C",
            TemperatureUnit::Fahrenheit => "F",
        }
    }
}

impl fmt::Display for TemperatureUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Round `value` to `places` decimal places.
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Convert raw milli-gravity into specific gravity.
pub fn gravity_from_raw(raw: f32) -> f64 {
    round_to(f64::from(raw) / 1000.0, 4)
}

/// Convert a raw 1/128 Kelvin temperature into the requested unit.
pub fn temperature_from_raw(raw: u16, unit: TemperatureUnit) -> f64 {
    let celsius = f64::from(raw) / 128.0 - KELVIN_OFFSET;
    match unit {
        TemperatureUnit::Celsius => round_to(celsius, 2),
        TemperatureUnit::Fahrenheit => celsius * (9.0 / 5.0) + 32.0,
    }
}

/// Convert a raw 1/256 battery value into whole percent.
pub fn battery_percent(raw: i32) -> i32 {
    (f64::from(raw) / 256.0).round_ties_even() as i32
}

/// Convert a raw 1/16 acceleration value.
pub fn accel_from_raw(raw: i16) -> f64 {
    f64::from(raw) / 16.0
}

/// Estimate alcohol by volume from the gravity drop since the start.
pub fn calculate_abv(starting_gravity: f64, current_gravity: f64) -> f64 {
    round_to((starting_gravity - current_gravity) * ABV_FACTOR, 4)
}

/// A converted measurement from one accepted advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Reading {
    /// Protocol version of the payload this came from.
    pub version: u8,
    /// Specific gravity
    pub gravity: f64,
    pub gravity_velocity: Option<f64>,
    /// Temperature in `unit`
    pub temperature: f64,
    pub unit: TemperatureUnit,
    /// Battery in percent
    pub battery: i32,
    pub accel: (f64, f64, f64),
}

impl Reading {
    pub fn from_metrics(metrics: &PillMetrics, unit: TemperatureUnit) -> Self {
        let [x, y, z] = metrics.raw_accel();
        Reading {
            version: metrics.version(),
            gravity: gravity_from_raw(metrics.raw_gravity()),
            gravity_velocity: metrics.gravity_velocity().map(f64::from),
            temperature: temperature_from_raw(metrics.raw_temperature(), unit),
            unit,
            battery: battery_percent(metrics.raw_battery()),
            accel: (accel_from_raw(x), accel_from_raw(y), accel_from_raw(z)),
        }
    }
}
