// Bounded append-only sequence of timestamped values

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;

use super::SeriesError;

#[derive(Debug, Clone)]
pub struct SequenceDataSeries<T> {
    entries: VecDeque<(DateTime<Utc>, T)>,
    max_len: usize,
    allow_equal_timestamps: bool,
}

#[derive(Serialize)]
struct JsonWindow<'a, T> {
    data: Vec<&'a T>,
}

impl<T> SequenceDataSeries<T> {
    /// `max_len` of zero is bumped to one so the series can hold its latest value.
    pub fn new(max_len: usize) -> Self {
        let max_len = max_len.max(1);
        Self {
            entries: VecDeque::with_capacity(max_len.min(1024)),
            max_len,
            allow_equal_timestamps: true,
        }
    }

    /// Strict mode rejects an append whose timestamp equals the last one.
    pub fn with_equal_timestamps(mut self, allow: bool) -> Self {
        self.allow_equal_timestamps = allow;
        self
    }

    pub fn append(&mut self, timestamp: DateTime<Utc>, value: T) -> Result<(), SeriesError> {
        if let Some(last) = self.last_date_time() {
            let out_of_order = if self.allow_equal_timestamps {
                timestamp < last
            } else {
                timestamp <= last
            };
            if out_of_order {
                return Err(SeriesError::OutOfOrder {
                    last,
                    attempted: timestamp,
                });
            }
        }

        self.entries.push_back((timestamp, value));
        while self.entries.len() > self.max_len {
            self.entries.pop_front();
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Index 0 is the oldest retained value.
    pub fn at(&self, index: usize) -> Result<&T, SeriesError> {
        self.entries
            .get(index)
            .map(|(_, value)| value)
            .ok_or(SeriesError::IndexOutOfRange {
                index,
                len: self.entries.len(),
            })
    }

    pub fn date_time_at(&self, index: usize) -> Result<DateTime<Utc>, SeriesError> {
        self.entries
            .get(index)
            .map(|(ts, _)| *ts)
            .ok_or(SeriesError::IndexOutOfRange {
                index,
                len: self.entries.len(),
            })
    }

    pub fn last(&self) -> Option<&T> {
        self.entries.back().map(|(_, value)| value)
    }

    pub fn last_date_time(&self) -> Option<DateTime<Utc>> {
        self.entries.back().map(|(ts, _)| *ts)
    }

    pub fn date_times(&self) -> Vec<DateTime<Utc>> {
        self.entries.iter().map(|(ts, _)| *ts).collect()
    }

    pub fn values(&self) -> impl Iterator<Item = &T> + '_ {
        self.entries.iter().map(|(_, value)| value)
    }

    /// The most recent `n` values, oldest first.
    pub fn tail(&self, n: usize) -> Vec<&T> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).map(|(_, value)| value).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<T: Serialize> SequenceDataSeries<T> {
    /// Serialize the last `n` values as `{"data": [...]}`.
    pub fn to_json(&self, n: usize) -> Result<String, SeriesError> {
        if n == 0 {
            return Err(SeriesError::InvalidLength(
                "json window must contain at least one value".to_string(),
            ));
        }
        serde_json::to_string(&JsonWindow { data: self.tail(n) })
            .map_err(|e| SeriesError::Serialize(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_evicts_oldest_first() {
        let mut series = SequenceDataSeries::new(3);
        for i in 0..5 {
            series.append(t(i), i).unwrap();
        }
        assert_eq!(series.len(), 3);
        assert_eq!(*series.at(0).unwrap(), 2);
        assert_eq!(series.last(), Some(&4));
        assert_eq!(series.date_times(), vec![t(2), t(3), t(4)]);
    }

    #[test]
    fn test_rejects_earlier_timestamp() {
        let mut series = SequenceDataSeries::new(10);
        series.append(t(10), 1.0).unwrap();
        let err = series.append(t(5), 2.0).unwrap_err();
        assert_eq!(
            err,
            SeriesError::OutOfOrder {
                last: t(10),
                attempted: t(5)
            }
        );
        assert_eq!(series.len(), 1);
    }

    #[test]
    fn test_equal_timestamps_configurable() {
        let mut lenient = SequenceDataSeries::new(10);
        lenient.append(t(1), 'a').unwrap();
        assert!(lenient.append(t(1), 'b').is_ok());

        let mut strict = SequenceDataSeries::new(10).with_equal_timestamps(false);
        strict.append(t(1), 'a').unwrap();
        assert!(strict.append(t(1), 'b').is_err());
        assert!(strict.append(t(1) + Duration::seconds(1), 'c').is_ok());
    }

    #[test]
    fn test_at_out_of_range() {
        let series: SequenceDataSeries<u8> = SequenceDataSeries::new(2);
        assert_eq!(
            series.at(0),
            Err(SeriesError::IndexOutOfRange { index: 0, len: 0 })
        );
    }

    #[test]
    fn test_to_json_tail() {
        let mut series = SequenceDataSeries::new(10);
        for i in 0..4 {
            series.append(t(i), i as f64).unwrap();
        }
        assert_eq!(series.to_json(2).unwrap(), r#"{"data":[2.0,3.0]}"#);
        assert!(series.to_json(0).is_err());
    }
}
