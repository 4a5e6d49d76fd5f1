//! Report rate limiting for Pill sessions.
//!
//! A Pill advertises far more often than readings are worth uploading, so each
//! session reports at most once per poll interval. The gate is measured on the
//! tokio clock so that scan cadence does not influence it and tests can drive
//! it with virtual time.

use std::time::Duration;
use tokio::time::Instant;

/// Limits reports to one per `interval`.
///
/// The first event is always allowed. A blocked event does not reset the timer.
#[derive(Debug, Clone)]
pub struct Throttle {
    /// Minimum time between reports
    interval: Duration,
    /// When the last report was allowed
    last_emit: Option<Instant>,
}

impl Throttle {
    /// Create a new throttle with the specified minimum interval between reports.
    ///
    /// # Example
    /// ```
    /// use std::time::Duration;
    /// use pill_sync::throttle::Throttle;
    ///
    /// let throttle = Throttle::new(Duration::from_secs(120));
    /// assert_eq!(throttle.interval(), Duration::from_secs(120));
    /// ```
    pub fn new(interval: Duration) -> Self {
        Throttle {
            interval,
            last_emit: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Check whether an event at `now` should be reported.
    ///
    /// Returns `true` if at least `interval` has elapsed since the last
    /// allowed event (or if there was none), and resets the timer to `now`.
    pub fn should_emit_at(&mut self, now: Instant) -> bool {
        match self.last_emit {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last_emit = Some(now);
                true
            }
        }
    }

    /// [`Throttle::should_emit_at`] with the current time.
    pub fn should_emit(&mut self) -> bool {
        self.should_emit_at(Instant::now())
    }
}

/// Parse a duration from a human-readable string.
///
/// Supports the following suffixes:
/// - `s` or no suffix: seconds
/// - `m`: minutes
/// - `h`: hours
/// - `ms`: milliseconds
///
/// # Examples
/// ```
/// use pill_sync::throttle::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
/// assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
/// assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
/// ```
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();

    if src.is_empty() {
        return Err("empty duration string".to_string());
    }

    let (number, unit_secs, unit_name) = if let Some(num) = src.strip_suffix("ms") {
        return parse_count(num, "milliseconds").map(Duration::from_millis);
    } else if let Some(num) = src.strip_suffix('h') {
        (num, 3600, "hours")
    } else if let Some(num) = src.strip_suffix('m') {
        (num, 60, "minutes")
    } else if let Some(num) = src.strip_suffix('s') {
        (num, 1, "seconds")
    } else {
        (src, 1, "duration")
    };

    let count = parse_count(number, unit_name)?;
    count
        .checked_mul(unit_secs)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("{unit_name} out of range: {number}"))
}

fn parse_count(num: &str, unit_name: &str) -> Result<u64, String> {
    num.trim()
        .parse()
        .map_err(|_| format!("invalid {unit_name}: {num}"))
}
