// Sampling frequency of a bar series
//
// Magnitude is the window size in seconds, so larger windows compare larger.
// Negative values are reserved sentinels.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Frequency(i64);

impl Frequency {
    pub const UNKNOWN: Frequency = Frequency(-9999);
    pub const INVALID: Frequency = Frequency(-999);
    pub const RESET: Frequency = Frequency(-99);
    pub const TRADE: Frequency = Frequency(-1);
    pub const REALTIME: Frequency = Frequency(0);
    pub const SECOND: Frequency = Frequency(1);
    pub const MINUTE: Frequency = Frequency(60);
    pub const HOUR: Frequency = Frequency(60 * 60);
    pub const HOUR_4: Frequency = Frequency(60 * 60 * 4);
    pub const DAY: Frequency = Frequency(24 * 60 * 60);
    pub const WEEK: Frequency = Frequency(24 * 60 * 60 * 7);
    pub const MONTH: Frequency = Frequency(24 * 60 * 60 * 31);
    pub const YEAR: Frequency = Frequency(24 * 60 * 60 * 365);

    pub const fn from_secs(secs: i64) -> Self {
        Frequency(secs)
    }

    pub const fn as_secs(self) -> i64 {
        self.0
    }

    /// True for sentinels (negative values).
    pub fn is_sentinel(self) -> bool {
        self.0 < 0
    }

    /// Frequencies that roll up into a daily bar: realtime through sub-day windows.
    pub fn is_intraday(self) -> bool {
        self >= Frequency::REALTIME && self < Frequency::DAY
    }

    fn name(self) -> Option<&'static str> {
        let name = match self {
            Frequency::UNKNOWN => "UNKNOWN",
            Frequency::INVALID => "INVALID",
            Frequency::RESET => "RESET",
            Frequency::TRADE => "TRADE",
            Frequency::REALTIME => "REALTIME",
            Frequency::SECOND => "SECOND",
            Frequency::MINUTE => "MINUTE",
            Frequency::HOUR => "HOUR",
            Frequency::HOUR_4 => "HOUR_4",
            Frequency::DAY => "DAY",
            Frequency::WEEK => "WEEK",
            Frequency::MONTH => "MONTH",
            Frequency::YEAR => "YEAR",
            _ => return None,
        };
        Some(name)
    }
}

impl From<i64> for Frequency {
    fn from(secs: i64) -> Self {
        Frequency(secs)
    }
}

impl From<Frequency> for i64 {
    fn from(freq: Frequency) -> Self {
        freq.0
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "{}s", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_follows_window_size() {
        let ordered = [
            Frequency::UNKNOWN,
            Frequency::INVALID,
            Frequency::RESET,
            Frequency::TRADE,
            Frequency::REALTIME,
            Frequency::SECOND,
            Frequency::MINUTE,
            Frequency::HOUR,
            Frequency::HOUR_4,
            Frequency::DAY,
            Frequency::WEEK,
            Frequency::MONTH,
            Frequency::YEAR,
        ];
        for pair in ordered.windows(2) {
            assert!(pair[0] < pair[1], "{} should sort before {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_intraday_range() {
        assert!(Frequency::REALTIME.is_intraday());
        assert!(Frequency::MINUTE.is_intraday());
        assert!(Frequency::HOUR_4.is_intraday());
        assert!(!Frequency::DAY.is_intraday());
        assert!(!Frequency::TRADE.is_intraday());
    }

    #[test]
    fn test_display() {
        assert_eq!(Frequency::MINUTE.to_string(), "MINUTE");
        assert_eq!(Frequency::from_secs(300).to_string(), "300s");
        assert_eq!(i64::from(Frequency::DAY), 86400);
    }
}
