// Bar series with per-field derived series kept in lockstep

use chrono::{DateTime, Utc};

use super::{SeriesError, SequenceDataSeries};
use crate::core::{Bar, Frequency};

#[derive(Debug, Clone)]
pub struct BarDataSeries {
    frequency: Frequency,
    use_adjusted: bool,
    bars: SequenceDataSeries<Bar>,
    open: SequenceDataSeries<f64>,
    high: SequenceDataSeries<f64>,
    low: SequenceDataSeries<f64>,
    close: SequenceDataSeries<f64>,
    volume: SequenceDataSeries<f64>,
    adj_close: SequenceDataSeries<f64>,
}

impl BarDataSeries {
    pub fn new(frequency: Frequency, max_len: usize) -> Self {
        Self {
            frequency,
            use_adjusted: false,
            bars: SequenceDataSeries::new(max_len),
            open: SequenceDataSeries::new(max_len),
            high: SequenceDataSeries::new(max_len),
            low: SequenceDataSeries::new(max_len),
            close: SequenceDataSeries::new(max_len),
            volume: SequenceDataSeries::new(max_len),
            adj_close: SequenceDataSeries::new(max_len),
        }
    }

    pub fn with_use_adjusted(mut self, use_adjusted: bool) -> Self {
        self.use_adjusted = use_adjusted;
        self
    }

    pub fn with_equal_timestamps(self, allow: bool) -> Self {
        Self {
            bars: self.bars.with_equal_timestamps(allow),
            open: self.open.with_equal_timestamps(allow),
            high: self.high.with_equal_timestamps(allow),
            low: self.low.with_equal_timestamps(allow),
            close: self.close.with_equal_timestamps(allow),
            volume: self.volume.with_equal_timestamps(allow),
            adj_close: self.adj_close.with_equal_timestamps(allow),
            ..self
        }
    }

    /// Append a bar. The field series are only touched once the bar itself
    /// passed the ordering check, so all series stay the same length.
    pub fn append(&mut self, bar: Bar) -> Result<(), SeriesError> {
        let ts = bar.timestamp();
        let bar = bar.with_use_adjusted(self.use_adjusted);

        let (open, high, low, close) = (bar.open(), bar.high(), bar.low(), bar.close());
        let (volume, adj_close) = (bar.volume(), bar.adj_close());

        self.bars.append(ts, bar)?;
        self.open.append(ts, open)?;
        self.high.append(ts, high)?;
        self.low.append(ts, low)?;
        self.close.append(ts, close)?;
        self.volume.append(ts, volume)?;
        self.adj_close.append(ts, adj_close)?;
        Ok(())
    }

    pub fn frequency(&self) -> Frequency {
        self.frequency
    }

    pub fn use_adjusted(&self) -> bool {
        self.use_adjusted
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    pub fn last_date_time(&self) -> Option<DateTime<Utc>> {
        self.bars.last_date_time()
    }

    pub fn bars(&self) -> &SequenceDataSeries<Bar> {
        &self.bars
    }

    pub fn open_series(&self) -> &SequenceDataSeries<f64> {
        &self.open
    }

    pub fn high_series(&self) -> &SequenceDataSeries<f64> {
        &self.high
    }

    pub fn low_series(&self) -> &SequenceDataSeries<f64> {
        &self.low
    }

    pub fn close_series(&self) -> &SequenceDataSeries<f64> {
        &self.close
    }

    pub fn volume_series(&self) -> &SequenceDataSeries<f64> {
        &self.volume
    }

    pub fn adj_close_series(&self) -> &SequenceDataSeries<f64> {
        &self.adj_close
    }
}
