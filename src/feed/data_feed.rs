//! Generic data feed: the subject the dispatcher drives for market data
//!
//! Each tick takes one value, preferring persisted recovery rows over the
//! generator, runs it through the hook pipeline, stores every resulting value
//! in the series manager and announces it on the new-value event.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::{FeedGenerator, GeneratorError, HookPipeline, PendingValue};
use crate::config::FeedConfig;
use crate::core::{Bars, Event, Frequency};
use crate::db::{BarLogReader, BarRow, RecoverySource};
use crate::dispatch::Subject;
use crate::error::{EngineError, EngineResult};
use crate::series::{BarDataSeries, DataSeriesManager};

/// Payload of the feed's new-value event.
#[derive(Debug, Clone, PartialEq)]
pub struct NewValue {
    pub timestamp: DateTime<Utc>,
    pub frequency: Frequency,
    pub bars: Bars,
    pub is_recovery: bool,
}

pub struct GenericDataFeed {
    generator: Arc<dyn FeedGenerator>,
    recovery: Option<Box<dyn RecoverySource>>,
    hooks: HookPipeline,
    series: DataSeriesManager,
    new_value_event: Event<NewValue>,
    last_dispatched: HashMap<(String, Frequency), DateTime<Utc>>,
    symbol: Option<String>,
    tolerate_symbol_mismatch: bool,
    mismatch_warned: bool,
    use_adjusted: bool,
    dispatched: u64,
}

impl GenericDataFeed {
    /// Build a feed from configuration, opening the recovery log when a path
    /// is configured.
    /// Fails when the generator emits a frequency the settings do not list.
    pub fn new(generator: Arc<dyn FeedGenerator>, config: &FeedConfig) -> EngineResult<Self> {
        let unsupported: Vec<String> = generator
            .frequencies()
            .into_iter()
            .filter(|f| !config.frequencies.contains(f))
            .map(|f| f.to_string())
            .collect();
        if !unsupported.is_empty() {
            return Err(EngineError::FrequencyMismatch(format!(
                "generator emits {} but the feed is configured for {:?}",
                unsupported.join(", "),
                config.frequencies
            )));
        }

        let use_adjusted = config.use_adjusted_values;
        let allow_equal = config.allow_equal_timestamps;
        let series = DataSeriesManager::with_factory(
            config.max_len,
            Box::new(move |_symbol: &str, frequency, max_len| {
                BarDataSeries::new(frequency, max_len)
                    .with_use_adjusted(use_adjusted)
                    .with_equal_timestamps(allow_equal)
            }),
        );

        let hooks = if config.day_bar_hook {
            HookPipeline::with_day_bars()
        } else {
            HookPipeline::new()
        };

        let recovery = match config.recovery_path() {
            Some(path) => {
                let reader = BarLogReader::open(path, config.show_progress)?;
                Some(Box::new(reader) as Box<dyn RecoverySource>)
            }
            None => None,
        };

        Ok(Self {
            generator,
            recovery,
            hooks,
            series,
            new_value_event: Event::new(),
            last_dispatched: HashMap::new(),
            symbol: config.symbol.clone(),
            tolerate_symbol_mismatch: config.tolerate_symbol_mismatch,
            mismatch_warned: false,
            use_adjusted,
            dispatched: 0,
        })
    }

    pub fn with_recovery(mut self, recovery: Box<dyn RecoverySource>) -> Self {
        self.recovery = Some(recovery);
        self
    }

    pub fn with_hooks(mut self, hooks: HookPipeline) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_series_manager(mut self, series: DataSeriesManager) -> Self {
        self.series = series;
        self
    }

    pub fn series_manager(&self) -> &DataSeriesManager {
        &self.series
    }

    pub fn new_value_event(&mut self) -> &mut Event<NewValue> {
        &mut self.new_value_event
    }

    pub fn generator(&self) -> &Arc<dyn FeedGenerator> {
        &self.generator
    }

    /// Values announced so far, derived values included.
    pub fn dispatched_count(&self) -> u64 {
        self.dispatched
    }

    /// `(consumed, total)` recovery rows, if replay is attached.
    pub fn recovery_progress(&self) -> Option<(u64, u64)> {
        self.recovery.as_ref().map(|r| (r.consumed(), r.total()))
    }

    fn recovery_peek_time(&mut self) -> EngineResult<Option<i64>> {
        let Some(recovery) = self.recovery.as_mut() else {
            return Ok(None);
        };
        let consumed = recovery.consumed();
        let row = recovery
            .peek()
            .map_err(|source| EngineError::RecoveryRead { consumed, source })?;
        Ok(row.map(|r| r.date_time))
    }

    fn recovery_exhausted(&mut self) -> bool {
        match self.recovery_peek_time() {
            Ok(next) => next.is_none(),
            // Surfaced as a fatal error by the next dispatch.
            Err(_) => false,
        }
    }

    fn check_symbol(&mut self, row: &BarRow) -> EngineResult<()> {
        let Some(expected) = self.symbol.as_deref() else {
            return Ok(());
        };
        if row.symbol == expected {
            return Ok(());
        }
        if !self.tolerate_symbol_mismatch {
            error!("❌ Recovery symbol {} does not match {}", row.symbol, expected);
            return Err(EngineError::SymbolMismatch {
                expected: expected.to_string(),
                found: row.symbol.clone(),
            });
        }
        if !self.mismatch_warned {
            warn!("⚠️  Recovery symbol {} does not match {}, continuing", row.symbol, expected);
            self.mismatch_warned = true;
        }
        Ok(())
    }

    fn next_recovery_row(&mut self) -> EngineResult<Option<BarRow>> {
        let Some(recovery) = self.recovery.as_mut() else {
            return Ok(None);
        };
        let consumed = recovery.consumed();
        recovery
            .next()
            .map_err(|source| EngineError::RecoveryRead { consumed, source })
    }

    /// Group the next recovery rows sharing one timestamp and frequency.
    /// Rows with bad geometry are skipped.
    fn next_recovery_value(&mut self) -> EngineResult<Option<PendingValue>> {
        let mut value: Option<PendingValue> = None;
        loop {
            let next = match self.recovery.as_mut() {
                Some(recovery) => {
                    let consumed = recovery.consumed();
                    recovery
                        .peek()
                        .map_err(|source| EngineError::RecoveryRead { consumed, source })?
                        .map(|row| (row.date_time, row.frequency(), row.symbol.clone()))
                }
                None => None,
            };
            let Some((date_time, frequency, symbol)) = next else {
                break;
            };
            if let Some(current) = &value {
                let same_tick = current.timestamp.timestamp() == date_time
                    && current.frequency == frequency
                    && !current.values.contains_key(&symbol);
                if !same_tick {
                    break;
                }
            }

            let Some(row) = self.next_recovery_row()? else {
                break;
            };
            self.check_symbol(&row)?;
            let bar = match row.to_bar() {
                Ok(bar) => bar.with_recovery(true).with_use_adjusted(self.use_adjusted),
                Err(e) => {
                    warn!("⚠️  Dropping recovery row for {}: {}", row.symbol, e);
                    continue;
                }
            };
            value
                .get_or_insert_with(|| PendingValue::new(bar.timestamp(), Bars::new(), frequency))
                .values
                .insert(row.symbol, bar);
        }
        Ok(value)
    }

    /// Remove bars at or before the last dispatched time of their series.
    /// A replayed bar strictly before it means the log and the feed disagree
    /// and is fatal. A replayed bar at exactly that time is dropped with a
    /// warning instead of failing the run, since the dump may hold a bar that
    /// was also fetched live at the same instant.
    fn drop_outdated(
        &self,
        mut value: PendingValue,
        is_recovery: bool,
    ) -> EngineResult<Option<PendingValue>> {
        let mut outdated = Vec::new();
        for (symbol, bar) in &value.values {
            let key = (symbol.clone(), bar.frequency());
            let Some(last) = self.last_dispatched.get(&key).copied() else {
                continue;
            };
            let ts = bar.timestamp();
            if is_recovery && ts < last {
                error!("❌ Outdated recovery bar for {} at {} (last {})", symbol, ts, last);
                return Err(EngineError::OutdatedRecoveryData {
                    symbol: symbol.clone(),
                    frequency: bar.frequency(),
                    timestamp: ts,
                    last,
                });
            }
            if ts <= last {
                if is_recovery {
                    warn!("⚠️  Duplicate recovery bar for {} at {}", symbol, ts);
                } else {
                    debug!("Skipping outdated {} {} bar at {}", symbol, bar.frequency(), ts);
                }
                outdated.push(symbol.clone());
            }
        }
        for symbol in outdated {
            value.values.remove(&symbol);
        }
        Ok((!value.values.is_empty()).then_some(value))
    }

    fn publish(&mut self, value: PendingValue, is_recovery: bool) -> EngineResult<()> {
        self.series.update(&value.values)?;
        for (symbol, bar) in &value.values {
            self.last_dispatched
                .insert((symbol.clone(), bar.frequency()), bar.timestamp());
        }
        self.dispatched += 1;
        self.new_value_event.emit(&NewValue {
            timestamp: value.timestamp,
            frequency: value.frequency,
            bars: value.values,
            is_recovery,
        });
        Ok(())
    }
}

impl Subject for GenericDataFeed {
    fn name(&self) -> &str {
        "data_feed"
    }

    fn start(&mut self) -> EngineResult<()> {
        match self.recovery_progress() {
            Some((_, total)) => info!("🚀 Data feed starting with {} recovery rows", total),
            None => info!("🚀 Data feed starting"),
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.generator.finish();
    }

    fn join(&mut self) {}

    fn eof(&mut self) -> bool {
        self.generator.is_complete() && self.recovery_exhausted()
    }

    fn peek_date_time(&mut self) -> Option<DateTime<Utc>> {
        match self.recovery_peek_time() {
            Ok(Some(secs)) => DateTime::from_timestamp(secs, 0),
            _ => self.generator.peek_next_time(),
        }
    }

    fn dispatch(&mut self) -> EngineResult<bool> {
        let (value, is_recovery) = match self.next_recovery_value()? {
            Some(value) => (value, true),
            None => match self.generator.pop_next_values() {
                Ok(Some(value)) => (value, false),
                Ok(None) | Err(GeneratorError::EndOfStream) => return Ok(false),
                Err(e) => return Err(e.into()),
            },
        };

        let Some(value) = self.drop_outdated(value, is_recovery)? else {
            return Ok(false);
        };

        let mut values = self.hooks.run(value, is_recovery).into_iter();
        if let Some(original) = values.next() {
            self.publish(original, is_recovery)?;
        }
        for derived in values {
            if let Some(derived) = self.drop_outdated(derived, false)? {
                self.publish(derived, is_recovery)?;
            }
        }
        Ok(true)
    }
}
