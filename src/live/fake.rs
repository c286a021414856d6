// In-process providers: a synthetic random walk and a scripted replay

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{BarDataProvider, ProviderError, SeriesValueType};
use crate::core::{Bar, Bars, Frequency};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct WalkState {
    instrument: Option<String>,
    frequency: Frequency,
    next_time: DateTime<Utc>,
    price: f64,
    produced: u64,
    rng: StdRng,
}

/// Emits one random-walk bar per call for the instrument given to `init`,
/// at the first configured frequency, pausing `interval` between bars.
pub struct FakeDataProvider {
    name: String,
    interval: Duration,
    max_bars: Option<u64>,
    state: Mutex<WalkState>,
    stopped: AtomicBool,
}

impl FakeDataProvider {
    pub fn new(name: &str, start: DateTime<Utc>, interval: Duration, seed: u64) -> Self {
        Self {
            name: name.to_string(),
            interval,
            max_bars: None,
            state: Mutex::new(WalkState {
                instrument: None,
                frequency: Frequency::MINUTE,
                next_time: start,
                price: 100.0,
                produced: 0,
                rng: StdRng::seed_from_u64(seed),
            }),
            stopped: AtomicBool::new(false),
        }
    }

    /// Report `Exhausted` after `max_bars` bars.
    pub fn with_max_bars(mut self, max_bars: u64) -> Self {
        self.max_bars = Some(max_bars);
        self
    }

    fn next_walk_bar(&self) -> Result<Option<Bars>, ProviderError> {
        let mut state = lock(&self.state);
        let Some(instrument) = state.instrument.clone() else {
            return Err(ProviderError::Init("provider not initialised".to_string()));
        };
        if self.max_bars.is_some_and(|max| state.produced >= max) {
            return Err(ProviderError::Exhausted);
        }

        let open = state.price;
        let close = (open * (1.0 + state.rng.gen_range(-0.01..0.01))).max(0.01);
        let high = open.max(close) * (1.0 + state.rng.gen_range(0.0..0.005));
        let low = open.min(close) * (1.0 - state.rng.gen_range(0.0..0.005));
        let volume = state.rng.gen_range(1.0..1_000.0_f64).round();

        let bar = Bar::new(state.next_time, open, high, low, close, volume, close, state.frequency)
            .map_err(|e| ProviderError::Fetch(e.to_string()))?;

        let step = state.frequency.as_secs().max(1);
        state.next_time += chrono::Duration::seconds(step);
        state.price = close;
        state.produced += 1;

        let mut bars = Bars::new();
        bars.insert(instrument, bar);
        Ok(Some(bars))
    }
}

#[async_trait]
impl BarDataProvider for FakeDataProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn init(&self, instrument: &str, frequencies: &[Frequency]) -> Result<(), ProviderError> {
        let Some(frequency) = frequencies.first() else {
            return Err(ProviderError::Init("no frequency given".to_string()));
        };
        let mut state = lock(&self.state);
        state.instrument = Some(instrument.to_string());
        state.frequency = *frequency;
        Ok(())
    }

    async fn connect(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn next_bars(&self) -> Result<Option<Bars>, ProviderError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(ProviderError::Stopped);
        }
        if !self.interval.is_zero() {
            tokio::time::sleep(self.interval).await;
        }
        self.next_walk_bar()
    }

    async fn reset(&self) -> Result<(), ProviderError> {
        let mut state = lock(&self.state);
        state.produced = 0;
        state.price = 100.0;
        Ok(())
    }

    async fn stop(&self) -> Result<(), ProviderError> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn datatype(&self) -> SeriesValueType {
        SeriesValueType::Bar
    }
}

/// One scripted `next_bars` outcome.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Bars(Bars),
    Nothing,
    Error(ProviderError),
}

impl ScriptStep {
    pub fn minute_bars(symbol: &str, secs: i64) -> Bars {
        let ts = DateTime::from_timestamp(secs, 0).unwrap_or_default();
        let mut bars = Bars::new();
        if let Ok(bar) = Bar::new(ts, 10.0, 11.0, 9.0, 10.5, 100.0, 10.5, Frequency::MINUTE) {
            bars.insert(symbol.to_string(), bar);
        }
        bars
    }

    pub fn minute_bar(symbol: &str, secs: i64) -> Self {
        ScriptStep::Bars(Self::minute_bars(symbol, secs))
    }
}

/// Plays back a fixed list of outcomes, then reports `Exhausted` (or keeps
/// repeating a configured error).
pub struct ScriptedProvider {
    name: String,
    steps: Mutex<VecDeque<ScriptStep>>,
    after_script: Option<ProviderError>,
    init_error: Option<ProviderError>,
    step_delay: Duration,
    initialised: AtomicBool,
    stopped: AtomicBool,
}

impl ScriptedProvider {
    pub fn new(name: &str, steps: Vec<ScriptStep>) -> Self {
        Self {
            name: name.to_string(),
            steps: Mutex::new(steps.into()),
            after_script: None,
            init_error: None,
            step_delay: Duration::ZERO,
            initialised: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    /// A provider whose every fetch fails.
    pub fn always_failing(name: &str) -> Self {
        Self {
            after_script: Some(ProviderError::Fetch(format!("{} is unreachable", name))),
            ..Self::new(name, Vec::new())
        }
    }

    /// Make `init` fail with `error`.
    pub fn with_init_error(mut self, error: ProviderError) -> Self {
        self.init_error = Some(error);
        self
    }

    pub fn is_initialised(&self) -> bool {
        self.initialised.load(Ordering::SeqCst)
    }

    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    pub fn remaining(&self) -> usize {
        lock(&self.steps).len()
    }
}

#[async_trait]
impl BarDataProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn init(&self, _instrument: &str, _frequencies: &[Frequency]) -> Result<(), ProviderError> {
        if let Some(e) = &self.init_error {
            return Err(e.clone());
        }
        self.initialised.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn connect(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn next_bars(&self) -> Result<Option<Bars>, ProviderError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(ProviderError::Stopped);
        }
        if !self.step_delay.is_zero() {
            tokio::time::sleep(self.step_delay).await;
        }
        let step = lock(&self.steps).pop_front();
        match step {
            Some(ScriptStep::Bars(bars)) => Ok(Some(bars)),
            Some(ScriptStep::Nothing) => Ok(None),
            Some(ScriptStep::Error(e)) => Err(e),
            None => Err(self.after_script.clone().unwrap_or(ProviderError::Exhausted)),
        }
    }

    async fn reset(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), ProviderError> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn datatype(&self) -> SeriesValueType {
        SeriesValueType::Bar
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fake_provider_walks_forward() {
        let start = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let provider = FakeDataProvider::new("fake", start, Duration::ZERO, 42).with_max_bars(3);
        assert!(provider.next_bars().await.is_err());

        provider.init("BTC", &[Frequency::MINUTE]).await.unwrap();
        let mut last = None;
        for _ in 0..3 {
            let bars = provider.next_bars().await.unwrap().unwrap();
            let bar = &bars["BTC"];
            assert!(bar.low() <= bar.open() && bar.open() <= bar.high());
            if let Some(prev) = last {
                assert_eq!(bar.timestamp() - prev, chrono::Duration::seconds(60));
            }
            last = Some(bar.timestamp());
        }
        assert_eq!(provider.next_bars().await, Err(ProviderError::Exhausted));
    }

    #[tokio::test]
    async fn test_scripted_provider_plays_steps() {
        let provider = ScriptedProvider::new(
            "script",
            vec![ScriptStep::Nothing, ScriptStep::minute_bar("A", 60)],
        );
        assert_eq!(provider.next_bars().await, Ok(None));
        assert!(provider.next_bars().await.unwrap().is_some());
        assert_eq!(provider.next_bars().await, Err(ProviderError::Exhausted));

        provider.stop().await.unwrap();
        assert_eq!(provider.next_bars().await, Err(ProviderError::Stopped));
    }
}
