//! Candle interval value object.
//!
//! An [`Interval`] pairs a non-zero multiplier with an [`IntervalUnit`] and is
//! converted once into a width in milliseconds. The textual form follows the
//! upstream convention (`"1m"`, `"15m"`, `"4h"`, `"1d"`, `"1w"`).
//!
//! ```
//! use kline_ingestor::models::interval::{Interval, IntervalUnit};
//!
//! let iv: Interval = "15m".parse().unwrap();
//! assert_eq!(iv.unit(), IntervalUnit::Minute);
//! assert_eq!(iv.as_millis(), 900_000);
//! assert_eq!(iv.to_string(), "15m");
//! ```

use std::{fmt, num::NonZeroU32, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Number of seconds in a minute.
pub const SECS_PER_MINUTE: i64 = 60;
/// Number of seconds in an hour.
pub const SECS_PER_HOUR: i64 = 60 * SECS_PER_MINUTE;
/// Number of seconds in a day.
pub const SECS_PER_DAY: i64 = 24 * SECS_PER_HOUR;
/// Number of seconds in a week.
pub const SECS_PER_WEEK: i64 = 7 * SECS_PER_DAY;

/// Errors produced while parsing an interval spec.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IntervalError {
    /// The spec was empty.
    #[error("empty interval")]
    Empty,

    /// The trailing unit character is not one of `m`, `h`, `d`, `w`.
    #[error("unknown interval unit {unit:?} in {spec:?}")]
    UnknownUnit { spec: String, unit: String },

    /// The multiplier prefix is missing, non-numeric or zero.
    #[error("invalid interval multiplier in {spec:?}: must be a positive integer")]
    InvalidAmount { spec: String },
}

/// Interval granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntervalUnit {
    /// UTC minute
    Minute,
    /// UTC hour
    Hour,
    /// UTC day
    Day,
    /// Monday-based, UTC
    Week,
}

impl IntervalUnit {
    /// Width of one unit in seconds.
    pub const fn seconds(self) -> i64 {
        match self {
            IntervalUnit::Minute => SECS_PER_MINUTE,
            IntervalUnit::Hour => SECS_PER_HOUR,
            IntervalUnit::Day => SECS_PER_DAY,
            IntervalUnit::Week => SECS_PER_WEEK,
        }
    }

    const fn suffix(self) -> char {
        match self {
            IntervalUnit::Minute => 'm',
            IntervalUnit::Hour => 'h',
            IntervalUnit::Day => 'd',
            IntervalUnit::Week => 'w',
        }
    }
}

/// An interval = amount × unit (e.g., 15-Minute, 4-Hour, 1-Week).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interval {
    amount: NonZeroU32,
    unit: IntervalUnit,
}

impl Interval {
    /// Create a new interval.
    pub const fn new(amount: NonZeroU32, unit: IntervalUnit) -> Self {
        Self { amount, unit }
    }

    pub const fn amount(&self) -> NonZeroU32 {
        self.amount
    }

    pub const fn unit(&self) -> IntervalUnit {
        self.unit
    }

    /// Width of one candle in milliseconds.
    pub const fn as_millis(&self) -> i64 {
        self.amount.get() as i64 * self.unit.seconds() * 1000
    }
}

/// Parse an interval spec straight into its width in milliseconds.
pub fn interval_to_millis(spec: &str) -> Result<i64, IntervalError> {
    spec.parse::<Interval>().map(|iv| iv.as_millis())
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount.get(), self.unit.suffix())
    }
}

impl FromStr for Interval {
    type Err = IntervalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some(unit_char) = s.chars().last() else {
            return Err(IntervalError::Empty);
        };
        let digits = &s[..s.len() - unit_char.len_utf8()];
        let unit = match unit_char {
            'm' => IntervalUnit::Minute,
            'h' => IntervalUnit::Hour,
            'd' => IntervalUnit::Day,
            'w' => IntervalUnit::Week,
            other => {
                return Err(IntervalError::UnknownUnit {
                    spec: s.to_string(),
                    unit: other.to_string(),
                });
            }
        };
        // `u32::from_str` accepts a leading '+', which the upstream does not.
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(IntervalError::InvalidAmount { spec: s.to_string() });
        }
        let amount = digits
            .parse::<u32>()
            .ok()
            .and_then(NonZeroU32::new)
            .ok_or_else(|| IntervalError::InvalidAmount { spec: s.to_string() })?;
        Ok(Interval::new(amount, unit))
    }
}

impl Serialize for Interval {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Interval {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
