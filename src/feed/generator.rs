//! Bounded producer/consumer queue feeding a data feed
//!
//! Producers call [`FeedGenerator::append_new_value_to_buffer`] from their own
//! threads or tasks; the feed drains with the non-blocking
//! [`FeedGenerator::pop_next_values`] from inside a dispatch tick.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::warn;

use crate::config::FeedConfig;
use crate::core::{Bars, Frequency};

/// Default queue capacity for a bar generator.
pub const DEFAULT_MAX_PENDING: usize = 10_000;

/// One queued tick: everything sampled at `timestamp` for one frequency.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingValue {
    pub timestamp: DateTime<Utc>,
    pub values: Bars,
    pub frequency: Frequency,
}

impl PendingValue {
    pub fn new(timestamp: DateTime<Utc>, values: Bars, frequency: Frequency) -> Self {
        Self {
            timestamp,
            values,
            frequency,
        }
    }

    /// True when every bar in the value was replayed from the bar log.
    pub fn is_recovery(&self) -> bool {
        !self.values.is_empty() && self.values.values().all(|bar| bar.is_recovery())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeneratorError {
    #[error("Frequency {0} not supported by this generator")]
    FrequencyNotSupported(Frequency),

    #[error("Generator already finished")]
    GeneratorClosed,

    #[error("Pending buffer full ({0} values)")]
    BufferFull(usize),

    #[error("End of stream")]
    EndOfStream,
}

pub trait FeedGenerator: Send + Sync {
    fn append_new_value_to_buffer(
        &self,
        timestamp: DateTime<Utc>,
        values: Bars,
        frequency: Frequency,
    ) -> Result<(), GeneratorError>;

    /// `Ok(None)` means idle (nothing queued yet); `Err(EndOfStream)` means
    /// the generator is finished and drained.
    fn pop_next_values(&self) -> Result<Option<PendingValue>, GeneratorError>;

    fn peek_next_time(&self) -> Option<DateTime<Utc>>;

    fn finish(&self);

    fn is_complete(&self) -> bool;

    fn frequencies(&self) -> Vec<Frequency>;
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<PendingValue>,
    finished: bool,
}

#[derive(Debug)]
pub struct BarFeedGenerator {
    frequencies: Vec<Frequency>,
    max_pending: usize,
    state: Mutex<QueueState>,
}

impl BarFeedGenerator {
    pub fn new(frequencies: Vec<Frequency>, max_pending: usize) -> Self {
        Self {
            frequencies,
            max_pending: max_pending.max(1),
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Frequencies and capacity from the feed settings.
    pub fn from_config(config: &FeedConfig) -> Self {
        Self::new(config.frequencies.clone(), config.max_pending_values)
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().pending.is_empty()
    }

    pub fn max_pending(&self) -> usize {
        self.max_pending
    }

    pub fn is_finished(&self) -> bool {
        self.lock().finished
    }
}

impl FeedGenerator for BarFeedGenerator {
    fn append_new_value_to_buffer(
        &self,
        timestamp: DateTime<Utc>,
        values: Bars,
        frequency: Frequency,
    ) -> Result<(), GeneratorError> {
        if !self.frequencies.contains(&frequency) {
            return Err(GeneratorError::FrequencyNotSupported(frequency));
        }

        let mut state = self.lock();
        if state.finished {
            return Err(GeneratorError::GeneratorClosed);
        }
        if state.pending.len() >= self.max_pending {
            return Err(GeneratorError::BufferFull(self.max_pending));
        }
        state
            .pending
            .push_back(PendingValue::new(timestamp, values, frequency));
        Ok(())
    }

    fn pop_next_values(&self) -> Result<Option<PendingValue>, GeneratorError> {
        let mut state = self.lock();
        match state.pending.pop_front() {
            Some(value) => Ok(Some(value)),
            None if state.finished => Err(GeneratorError::EndOfStream),
            None => Ok(None),
        }
    }

    fn peek_next_time(&self) -> Option<DateTime<Utc>> {
        self.lock().pending.front().map(|value| value.timestamp)
    }

    fn finish(&self) {
        self.lock().finished = true;
    }

    fn is_complete(&self) -> bool {
        let state = self.lock();
        state.finished && state.pending.is_empty()
    }

    fn frequencies(&self) -> Vec<Frequency> {
        self.frequencies.clone()
    }
}

/// Append from a deterministic producer thread: on a full buffer, sleep and
/// retry until the value fits or `stop` is raised. Never drops data.
pub fn append_with_retry(
    generator: &dyn FeedGenerator,
    value: PendingValue,
    retry_interval: Duration,
    stop: &AtomicBool,
) -> Result<(), GeneratorError> {
    let mut warned = false;
    loop {
        match generator.append_new_value_to_buffer(
            value.timestamp,
            value.values.clone(),
            value.frequency,
        ) {
            Err(GeneratorError::BufferFull(capacity)) => {
                if stop.load(Ordering::SeqCst) {
                    return Err(GeneratorError::GeneratorClosed);
                }
                if !warned {
                    warn!("⏳ Feed buffer full ({} values), waiting to append", capacity);
                    warned = true;
                }
                std::thread::sleep(retry_interval);
            }
            other => return other,
        }
    }
}
