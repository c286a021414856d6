//! OHLCV bar value type
//!
//! A `Bar` is validated on construction and never mutated afterwards except for
//! the adjusted-read toggle and its recovery origin flag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::frequency::Frequency;

/// One synchronized tick: symbol -> bar.
pub type Bars = BTreeMap<String, Bar>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BarError {
    #[error("Invalid bar geometry at {timestamp}: {reason}")]
    InvalidGeometry {
        timestamp: DateTime<Utc>,
        reason: &'static str,
    },

    #[error("Timestamp {0} is out of range")]
    InvalidTimestamp(i64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    timestamp: DateTime<Utc>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    adj_close: f64,
    volume: f64,
    frequency: Frequency,
    #[serde(default)]
    use_adjusted: bool,
    #[serde(default)]
    is_recovery: bool,
}

impl Bar {
    /// Build a bar, rejecting any price that falls outside `[low, high]`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
        adj_close: f64,
        frequency: Frequency,
    ) -> Result<Self, BarError> {
        let reason = if high < low {
            Some("high < low")
        } else if high < open {
            Some("high < open")
        } else if high < close {
            Some("high < close")
        } else if low > open {
            Some("low > open")
        } else if low > close {
            Some("low > close")
        } else {
            None
        };

        if let Some(reason) = reason {
            return Err(BarError::InvalidGeometry { timestamp, reason });
        }

        Ok(Self {
            timestamp,
            open,
            high,
            low,
            close,
            adj_close,
            volume,
            frequency,
            use_adjusted: false,
            is_recovery: false,
        })
    }

    pub fn with_use_adjusted(mut self, use_adjusted: bool) -> Self {
        self.use_adjusted = use_adjusted;
        self
    }

    pub fn set_use_adjusted(&mut self, use_adjusted: bool) {
        self.use_adjusted = use_adjusted;
    }

    /// Mark the bar as replayed from the persisted log.
    pub fn with_recovery(mut self, is_recovery: bool) -> Self {
        self.is_recovery = is_recovery;
        self
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn frequency(&self) -> Frequency {
        self.frequency
    }

    pub fn use_adjusted(&self) -> bool {
        self.use_adjusted
    }

    pub fn is_recovery(&self) -> bool {
        self.is_recovery
    }

    fn adjustment(&self) -> f64 {
        if self.close == 0.0 {
            1.0
        } else {
            self.adj_close / self.close
        }
    }

    pub fn open(&self) -> f64 {
        if self.use_adjusted {
            self.open * self.adjustment()
        } else {
            self.open
        }
    }

    pub fn high(&self) -> f64 {
        if self.use_adjusted {
            self.high * self.adjustment()
        } else {
            self.high
        }
    }

    pub fn low(&self) -> f64 {
        if self.use_adjusted {
            self.low * self.adjustment()
        } else {
            self.low
        }
    }

    pub fn close(&self) -> f64 {
        if self.use_adjusted {
            self.adj_close
        } else {
            self.close
        }
    }

    /// Price used for fills and indicators; same as `close()`.
    pub fn price(&self) -> f64 {
        self.close()
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    pub fn adj_close(&self) -> f64 {
        self.adj_close
    }

    pub fn raw_open(&self) -> f64 {
        self.open
    }

    pub fn raw_high(&self) -> f64 {
        self.high
    }

    pub fn raw_low(&self) -> f64 {
        self.low
    }

    pub fn raw_close(&self) -> f64 {
        self.close
    }
}

/// The shared frequency of a batch, or `None` when the batch is empty or mixed.
pub fn batch_frequency(bars: &Bars) -> Option<Frequency> {
    let mut iter = bars.values().map(Bar::frequency);
    let first = iter.next()?;
    iter.all(|f| f == first).then_some(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap()
    }

    fn make(open: f64, high: f64, low: f64, close: f64) -> Result<Bar, BarError> {
        Bar::new(ts(), open, high, low, close, 100.0, close, Frequency::MINUTE)
    }

    #[test]
    fn test_valid_bar_round_trips() {
        let bar = Bar::new(ts(), 10.0, 12.0, 9.0, 11.0, 500.0, 10.5, Frequency::MINUTE).unwrap();
        assert_eq!(bar.open(), 10.0);
        assert_eq!(bar.high(), 12.0);
        assert_eq!(bar.low(), 9.0);
        assert_eq!(bar.close(), 11.0);
        assert_eq!(bar.volume(), 500.0);
        assert_eq!(bar.adj_close(), 10.5);
        assert_eq!(bar.timestamp(), ts());
        assert_eq!(bar.frequency(), Frequency::MINUTE);
        assert!(!bar.is_recovery());
    }

    #[test]
    fn test_flat_bar_is_valid() {
        assert!(make(5.0, 5.0, 5.0, 5.0).is_ok());
    }

    #[test]
    fn test_geometry_violations_rejected() {
        let cases = [
            (make(10.0, 8.0, 9.0, 8.5), "high < low"),
            (make(13.0, 12.0, 9.0, 11.0), "high < open"),
            (make(10.0, 12.0, 9.0, 13.0), "high < close"),
            (make(8.0, 12.0, 9.0, 11.0), "low > open"),
            (make(10.0, 12.0, 9.0, 8.0), "low > close"),
        ];
        for (result, expected) in cases {
            match result {
                Err(BarError::InvalidGeometry { reason, .. }) => assert_eq!(reason, expected),
                Ok(bar) => panic!("expected {} to be rejected, got {:?}", expected, bar),
                Err(other) => panic!("expected {} to be rejected, got {:?}", expected, other),
            }
        }
    }

    #[test]
    fn test_adjusted_reads() {
        let bar = Bar::new(ts(), 10.0, 12.0, 8.0, 10.0, 1.0, 5.0, Frequency::DAY)
            .unwrap()
            .with_use_adjusted(true);
        assert_eq!(bar.open(), 5.0);
        assert_eq!(bar.high(), 6.0);
        assert_eq!(bar.low(), 4.0);
        assert_eq!(bar.close(), 5.0);
        assert_eq!(bar.raw_close(), 10.0);
    }

    #[test]
    fn test_batch_frequency() {
        let mut bars = Bars::new();
        assert_eq!(batch_frequency(&bars), None);
        bars.insert("A".into(), make(1.0, 2.0, 1.0, 2.0).unwrap());
        assert_eq!(batch_frequency(&bars), Some(Frequency::MINUTE));
        let day = Bar::new(ts(), 1.0, 2.0, 1.0, 2.0, 1.0, 2.0, Frequency::DAY).unwrap();
        bars.insert("B".into(), day);
        assert_eq!(batch_frequency(&bars), None);
    }
}
