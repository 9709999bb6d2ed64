//! Time-of-day stamps for outgoing messages.

use chrono::format::{Item, StrftimeItems};
use chrono::{Local, NaiveTime};

/// Default time-of-day format, e.g. `3:04:05 PM`.
pub const DEFAULT_TIME_FORMAT: &str = "%-I:%M:%S %p";

/// Whether `format` is a usable `chrono` strftime string.
///
/// Formatting with an invalid string panics, so configured formats are
/// checked up front.
#[must_use]
pub fn is_valid_format(format: &str) -> bool {
    !StrftimeItems::new(format).any(|item| matches!(item, Item::Error))
}

/// Source of the `time` field on outgoing messages.
pub trait Clock: Send + Sync {
    /// Current time of day, formatted for display.
    fn time_of_day(&self) -> String;
}

/// Local wall clock.
#[derive(Debug, Clone)]
pub struct SystemClock {
    format: String,
}

impl SystemClock {
    /// Create a clock using the given `chrono` format string.
    #[must_use]
    pub fn new(format: impl Into<String>) -> Self {
        Self {
            format: format.into(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new(DEFAULT_TIME_FORMAT)
    }
}

impl Clock for SystemClock {
    fn time_of_day(&self) -> String {
        Local::now().format(&self.format).to_string()
    }
}

/// Clock frozen at a single instant, for tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    time: NaiveTime,
}

impl FixedClock {
    /// Create a clock that always reports `time`.
    #[must_use]
    pub fn new(time: NaiveTime) -> Self {
        Self { time }
    }
}

impl Clock for FixedClock {
    fn time_of_day(&self) -> String {
        self.time.format(DEFAULT_TIME_FORMAT).to_string()
    }
}
