// Routes incoming bars into per-symbol, per-frequency series

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use super::{BarDataSeries, SeriesError};
use crate::core::{Bar, Bars, Frequency};

/// Builds a new series the first time a (symbol, frequency) pair shows up.
pub type SeriesFactory = Box<dyn Fn(&str, Frequency, usize) -> BarDataSeries + Send>;

pub struct DataSeriesManager {
    max_len: usize,
    factory: SeriesFactory,
    series: HashMap<String, BTreeMap<Frequency, BarDataSeries>>,
}

impl std::fmt::Debug for DataSeriesManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSeriesManager")
            .field("max_len", &self.max_len)
            .field("symbols", &self.series.len())
            .finish()
    }
}

impl DataSeriesManager {
    pub fn new(max_len: usize) -> Self {
        Self::with_factory(
            max_len,
            Box::new(|_symbol: &str, frequency, max_len| BarDataSeries::new(frequency, max_len)),
        )
    }

    pub fn with_factory(max_len: usize, factory: SeriesFactory) -> Self {
        Self {
            max_len,
            factory,
            series: HashMap::new(),
        }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Append every bar of one tick. A pair seen for the first time gets a
    /// fresh series which receives the triggering bar.
    pub fn update(&mut self, bars: &Bars) -> Result<(), SeriesError> {
        for (symbol, bar) in bars {
            self.append(symbol, bar.clone())?;
        }
        Ok(())
    }

    pub fn append(&mut self, symbol: &str, bar: Bar) -> Result<(), SeriesError> {
        let frequency = bar.frequency();
        let factory = &self.factory;
        let max_len = self.max_len;
        let by_freq = self.series.entry(symbol.to_string()).or_default();
        let series = by_freq.entry(frequency).or_insert_with(|| {
            debug!("Creating {} series for {}", frequency, symbol);
            factory(symbol, frequency, max_len)
        });
        series.append(bar)
    }

    pub fn get(&self, symbol: &str, frequency: Frequency) -> Result<&BarDataSeries, SeriesError> {
        let by_freq = self
            .series
            .get(symbol)
            .ok_or_else(|| SeriesError::UnknownSymbol(symbol.to_string()))?;
        by_freq.get(&frequency).ok_or(SeriesError::UnknownFrequency {
            symbol: symbol.to_string(),
            frequency,
        })
    }

    pub fn contains(&self, symbol: &str, frequency: Frequency) -> bool {
        self.get(symbol, frequency).is_ok()
    }

    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.series.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    pub fn frequencies(&self, symbol: &str) -> Vec<Frequency> {
        self.series
            .get(symbol)
            .map(|by_freq| by_freq.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn reset(&mut self) {
        self.series.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn bar(secs: i64, freq: Frequency) -> Bar {
        let ts = DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap();
        Bar::new(ts, 1.0, 2.0, 0.5, 1.5, 10.0, 1.5, freq).unwrap()
    }

    #[test]
    fn test_first_value_is_kept() {
        let mut manager = DataSeriesManager::new(10);
        let mut bars = Bars::new();
        bars.insert("AAPL".into(), bar(0, Frequency::MINUTE));
        manager.update(&bars).unwrap();

        let series = manager.get("AAPL", Frequency::MINUTE).unwrap();
        assert_eq!(series.len(), 1);
    }

    #[test]
    fn test_lookup_errors() {
        let mut manager = DataSeriesManager::new(10);
        manager.append("AAPL", bar(0, Frequency::MINUTE)).unwrap();

        assert!(matches!(manager.get("MSFT", Frequency::MINUTE), Err(SeriesError::UnknownSymbol(_))));
        assert!(matches!(
            manager.get("AAPL", Frequency::DAY),
            Err(SeriesError::UnknownFrequency { .. })
        ));
        assert_eq!(manager.frequencies("AAPL"), vec![Frequency::MINUTE]);
    }

    #[test]
    fn test_factory_called_once_per_pair() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut manager = DataSeriesManager::with_factory(
            5,
            Box::new(move |_, freq, max_len| {
                counter.fetch_add(1, Ordering::SeqCst);
                BarDataSeries::new(freq, max_len)
            }),
        );

        manager.append("A", bar(0, Frequency::MINUTE)).unwrap();
        manager.append("A", bar(60, Frequency::MINUTE)).unwrap();
        manager.append("A", bar(0, Frequency::DAY)).unwrap();
        manager.append("B", bar(0, Frequency::MINUTE)).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(manager.symbols(), vec!["A".to_string(), "B".to_string()]);

        manager.reset();
        assert!(manager.symbols().is_empty());
    }
}
