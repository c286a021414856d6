// Hook pipeline: transforms that may expand one value into derived values

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

use super::PendingValue;
use crate::core::{Bar, Bars, Frequency};

pub trait DataFeedHook: Send {
    fn name(&self) -> &str;

    /// Return the values derived from `value`; empty when nothing is derived.
    fn invoke(&mut self, value: &PendingValue, is_recovery: bool) -> Vec<PendingValue>;
}

/// Ordered hooks. The incoming value comes out first, followed by derived
/// values; values derived by one hook are visible to every later hook.
#[derive(Default)]
pub struct HookPipeline {
    hooks: Vec<Box<dyn DataFeedHook>>,
}

impl HookPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pipeline used when the caller supplies none.
    pub fn with_day_bars() -> Self {
        let mut pipeline = Self::new();
        pipeline.push(Box::new(DayBarGenHook::new()));
        pipeline
    }

    pub fn push(&mut self, hook: Box<dyn DataFeedHook>) {
        self.hooks.push(hook);
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn run(&mut self, value: PendingValue, is_recovery: bool) -> Vec<PendingValue> {
        let mut values = vec![value];
        for hook in self.hooks.iter_mut() {
            let mut derived = Vec::new();
            for value in &values {
                derived.extend(hook.invoke(value, is_recovery));
            }
            if !derived.is_empty() {
                debug!("Hook {} derived {} value(s)", hook.name(), derived.len());
            }
            values.extend(derived);
        }
        values
    }
}

impl std::fmt::Debug for HookPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.hooks.iter().map(|h| h.name()).collect();
        f.debug_struct("HookPipeline").field("hooks", &names).finish()
    }
}

#[derive(Debug, Clone)]
struct DayAccumulator {
    day: NaiveDate,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    adj_close: f64,
    volume: f64,
}

impl DayAccumulator {
    fn start(day: NaiveDate, bar: &Bar) -> Self {
        Self {
            day,
            open: bar.raw_open(),
            high: bar.raw_high(),
            low: bar.raw_low(),
            close: bar.raw_close(),
            adj_close: bar.adj_close(),
            volume: bar.volume(),
        }
    }

    fn add(&mut self, bar: &Bar) {
        self.high = self.high.max(bar.raw_high());
        self.low = self.low.min(bar.raw_low());
        self.close = bar.raw_close();
        self.adj_close = bar.adj_close();
        self.volume += bar.volume();
    }

    fn day_start(&self) -> DateTime<Utc> {
        self.day.and_time(chrono::NaiveTime::MIN).and_utc()
    }

    fn to_bar(&self) -> Option<Bar> {
        Bar::new(
            self.day_start(),
            self.open,
            self.high,
            self.low,
            self.close,
            self.volume,
            self.adj_close,
            Frequency::DAY,
        )
        .ok()
    }
}

/// Rolls intraday bars up into daily bars. A daily bar is emitted, stamped at
/// the day's 00:00 UTC, once a bar from a later day arrives for that symbol.
/// Replayed values are passed through untouched.
#[derive(Debug, Default)]
pub struct DayBarGenHook {
    days: HashMap<String, DayAccumulator>,
}

impl DayBarGenHook {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DataFeedHook for DayBarGenHook {
    fn name(&self) -> &str {
        "day_bar_gen"
    }

    fn invoke(&mut self, value: &PendingValue, is_recovery: bool) -> Vec<PendingValue> {
        if is_recovery || !value.frequency.is_intraday() {
            return Vec::new();
        }

        let mut completed: BTreeMap<NaiveDate, Bars> = BTreeMap::new();
        for (symbol, bar) in &value.values {
            let day = bar.timestamp().date_naive();
            match self.days.get_mut(symbol) {
                Some(acc) if acc.day == day => acc.add(bar),
                Some(acc) if acc.day > day => {
                    warn!("Ignoring {} bar from {} after day {} started", symbol, day, acc.day);
                }
                Some(acc) => {
                    match acc.to_bar() {
                        Some(day_bar) => {
                            completed.entry(acc.day).or_default().insert(symbol.clone(), day_bar);
                        }
                        None => warn!("Discarding malformed day bar for {} on {}", symbol, acc.day),
                    }
                    *acc = DayAccumulator::start(day, bar);
                }
                None => {
                    self.days.insert(symbol.clone(), DayAccumulator::start(day, bar));
                }
            }
        }

        completed
            .into_iter()
            .map(|(day, bars)| {
                let ts = day.and_time(chrono::NaiveTime::MIN).and_utc();
                PendingValue::new(ts, bars, Frequency::DAY)
            })
            .collect()
    }
}
