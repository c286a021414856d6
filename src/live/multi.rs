//! k-way merge of several live providers into one ordered bar buffer
//!
//! Every provider gets a fetch task writing into its own bounded channel.
//! When a channel is full the newest batch is dropped and counted. A single
//! merge task keeps one pending slot per provider and forwards the earliest
//! slot (lowest index on ties) once every open provider has a slot filled,
//! or once the oldest slot has waited longer than the straggler timeout.
//! Anything older than the last forwarded timestamp is dropped, so the
//! buffer only ever sees non-decreasing times.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{append_with_backoff, batch_to_value, open_provider, BarDataProvider, ProviderError};
use crate::config::{FeedConfig, LiveConfig};
use crate::core::{Bars, Frequency};
use crate::error::{EngineError, EngineResult};
use crate::feed::{BarFeedGenerator, FeedGenerator, GeneratorError, PendingValue};

#[derive(Debug, Default)]
struct ProviderCounters {
    errors: AtomicU64,
    dropped: AtomicU64,
    forwarded: AtomicU64,
}

/// Snapshot of one provider's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProviderStats {
    pub errors: u64,
    pub dropped: u64,
    pub forwarded: u64,
}

pub struct MultiLiveBarFeedGenerator {
    providers: Vec<Arc<dyn BarDataProvider>>,
    instrument: String,
    buffer: Arc<BarFeedGenerator>,
    config: LiveConfig,
    stopped: Arc<AtomicBool>,
    counters: Arc<Vec<ProviderCounters>>,
    merge_handle: Mutex<Option<JoinHandle<EngineResult<u64>>>>,
}

impl MultiLiveBarFeedGenerator {
    pub fn new(
        providers: Vec<Arc<dyn BarDataProvider>>,
        instrument: &str,
        frequencies: Vec<Frequency>,
        max_pending: usize,
        config: LiveConfig,
    ) -> Self {
        let counters = providers.iter().map(|_| ProviderCounters::default()).collect();
        Self {
            providers,
            instrument: instrument.to_string(),
            buffer: Arc::new(BarFeedGenerator::new(frequencies, max_pending)),
            config,
            stopped: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(counters),
            merge_handle: Mutex::new(None),
        }
    }

    /// Buffer frequencies and capacity come from the feed settings.
    pub fn from_config(
        providers: Vec<Arc<dyn BarDataProvider>>,
        instrument: &str,
        feed: &FeedConfig,
        config: LiveConfig,
    ) -> Self {
        Self::new(providers, instrument, feed.frequencies.clone(), feed.max_pending_values, config)
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    /// Init and connect every provider in order, then spawn one fetch task
    /// per provider plus the merge task on the current tokio runtime. The
    /// first init or connect failure finishes the buffer and is returned
    /// before any task is spawned.
    pub async fn start(&self) -> EngineResult<()> {
        let frequencies = self.buffer.frequencies();
        for provider in &self.providers {
            if let Err(e) = open_provider(provider.as_ref(), &self.instrument, &frequencies).await {
                self.buffer.finish();
                return Err(e.into());
            }
        }

        let capacity = self.config.channel_capacity.max(1);
        let mut receivers = Vec::with_capacity(self.providers.len());
        for (index, provider) in self.providers.iter().enumerate() {
            let (tx, rx) = mpsc::channel(capacity);
            receivers.push(rx);
            tokio::spawn(fetch_loop(
                index,
                Arc::clone(provider),
                tx,
                Arc::clone(&self.stopped),
                Arc::clone(&self.counters),
                self.config.clone(),
            ));
        }

        let merge = MergeLoop {
            names: self.providers.iter().map(|p| p.name().to_string()).collect(),
            receivers,
            buffer: Arc::clone(&self.buffer),
            stopped: Arc::clone(&self.stopped),
            counters: Arc::clone(&self.counters),
            config: self.config.clone(),
        };
        let handle = tokio::spawn(merge.run());
        *self.merge_handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        info!("📡 Live merge started over {} providers", self.providers.len());
        Ok(())
    }

    /// Stop every provider in turn and raise the shared stop flag. Does not
    /// wait for in-flight fetches.
    pub async fn stop(&self) {
        for provider in &self.providers {
            if let Err(e) = provider.stop().await {
                warn!("⚠️  Provider {} stop failed: {}", provider.name(), e);
            }
        }
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Wait for the merge task; returns the number of values forwarded.
    pub async fn join(&self) -> EngineResult<u64> {
        let handle = self
            .merge_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match handle {
            Some(handle) => handle
                .await
                .map_err(|e| EngineError::Internal(format!("live merge task failed: {}", e)))?,
            None => Ok(0),
        }
    }

    pub fn stats(&self) -> Vec<ProviderStats> {
        self.counters
            .iter()
            .map(|c| ProviderStats {
                errors: c.errors.load(Ordering::Relaxed),
                dropped: c.dropped.load(Ordering::Relaxed),
                forwarded: c.forwarded.load(Ordering::Relaxed),
            })
            .collect()
    }
}

async fn fetch_loop(
    index: usize,
    provider: Arc<dyn BarDataProvider>,
    tx: mpsc::Sender<Bars>,
    stopped: Arc<AtomicBool>,
    counters: Arc<Vec<ProviderCounters>>,
    config: LiveConfig,
) {
    let counters = &counters[index];
    let mut failures = 0u32;
    while !stopped.load(Ordering::SeqCst) {
        match provider.next_bars().await {
            Ok(Some(bars)) if bars.is_empty() => {}
            Ok(Some(bars)) => {
                failures = 0;
                match tx.try_send(bars) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        let dropped = counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        warn!(
                            "⚠️  Channel for {} full, dropped newest bars ({} so far)",
                            provider.name(),
                            dropped
                        );
                    }
                    Err(TrySendError::Closed(_)) => break,
                }
            }
            Ok(None) => tokio::time::sleep(config.idle_sleep()).await,
            Err(ProviderError::Exhausted) => {
                info!("Provider {} exhausted", provider.name());
                break;
            }
            Err(ProviderError::Stopped) => break,
            Err(e) if !e.is_transient() => {
                counters.errors.fetch_add(1, Ordering::Relaxed);
                error!(
                    "❌ Provider {} failed permanently, dropping it from the merge: {}",
                    provider.name(),
                    e
                );
                break;
            }
            Err(e) => {
                failures += 1;
                counters.errors.fetch_add(1, Ordering::Relaxed);
                if failures > config.max_consecutive_failures {
                    error!(
                        "❌ Provider {} failed {} times, dropping it from the merge",
                        provider.name(),
                        failures
                    );
                    break;
                }
                warn!("⚠️  Provider {} fetch failed ({}): {}", provider.name(), failures, e);
                tokio::time::sleep(config.failure_backoff()).await;
            }
        }
    }
    debug!("Fetch task for {} exiting", provider.name());
}

struct Slot {
    value: PendingValue,
    arrived: Instant,
}

struct MergeLoop {
    names: Vec<String>,
    receivers: Vec<mpsc::Receiver<Bars>>,
    buffer: Arc<BarFeedGenerator>,
    stopped: Arc<AtomicBool>,
    counters: Arc<Vec<ProviderCounters>>,
    config: LiveConfig,
}

impl MergeLoop {
    /// Pull at most one batch per empty slot without waiting.
    fn fill(&mut self, slots: &mut [Option<Slot>], open: &mut [bool]) -> EngineResult<()> {
        for index in 0..self.receivers.len() {
            if slots[index].is_some() || !open[index] {
                continue;
            }
            match self.receivers[index].try_recv() {
                Ok(bars) => {
                    if let Some(value) = batch_to_value(&self.names[index], bars)? {
                        slots[index] = Some(Slot {
                            value,
                            arrived: Instant::now(),
                        });
                    }
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => {
                    debug!("Provider {} channel closed", self.names[index]);
                    open[index] = false;
                }
            }
        }
        Ok(())
    }

    /// Earliest slot, lowest index on ties.
    fn earliest(slots: &[Option<Slot>]) -> Option<usize> {
        let mut best: Option<(usize, DateTime<Utc>)> = None;
        for (index, slot) in slots.iter().enumerate() {
            if let Some(slot) = slot {
                let ts = slot.value.timestamp;
                if best.map_or(true, |(_, best_ts)| ts < best_ts) {
                    best = Some((index, ts));
                }
            }
        }
        best.map(|(index, _)| index)
    }

    async fn run(mut self) -> EngineResult<u64> {
        let count = self.receivers.len();
        let mut slots: Vec<Option<Slot>> = (0..count).map(|_| None).collect();
        let mut open = vec![true; count];
        let mut last_forwarded: Option<DateTime<Utc>> = None;
        let mut forwarded = 0u64;

        let result = loop {
            if self.stopped.load(Ordering::SeqCst) {
                break Ok(forwarded);
            }
            if let Err(e) = self.fill(&mut slots, &mut open) {
                error!("❌ Live merge aborted: {}", e);
                break Err(e);
            }

            let Some(index) = Self::earliest(&slots) else {
                if open.iter().all(|o| !o) {
                    info!("All live providers closed after {} values", forwarded);
                    break Ok(forwarded);
                }
                tokio::time::sleep(self.config.idle_sleep()).await;
                continue;
            };

            let ready = (0..count).all(|i| slots[i].is_some() || !open[i]);
            let oldest_wait = slots.iter().flatten().map(|s| s.arrived.elapsed()).max();
            let timed_out = oldest_wait.is_some_and(|w| w >= self.config.straggler_timeout());
            if !ready && !timed_out {
                tokio::time::sleep(self.config.idle_sleep()).await;
                continue;
            }

            let Some(slot) = slots[index].take() else {
                continue;
            };
            let value = slot.value;
            if let Some(last) = last_forwarded {
                if value.timestamp < last {
                    let dropped = self.counters[index].dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!(
                        "⚠️  Late bars from {} at {} (last {}), dropped ({} so far)",
                        self.names[index], value.timestamp, last, dropped
                    );
                    continue;
                }
            }

            let timestamp = value.timestamp;
            let retry = self.config.append_retry();
            match append_with_backoff(&self.buffer, value, retry, &self.stopped).await {
                Ok(()) => {
                    last_forwarded = Some(timestamp);
                    forwarded += 1;
                    self.counters[index].forwarded.fetch_add(1, Ordering::Relaxed);
                }
                Err(GeneratorError::GeneratorClosed) => break Ok(forwarded),
                Err(e) => warn!("⚠️  Dropping bars from {}: {}", self.names[index], e),
            }
        };

        self.stopped.store(true, Ordering::SeqCst);
        self.buffer.finish();
        result
    }
}

impl FeedGenerator for MultiLiveBarFeedGenerator {
    fn append_new_value_to_buffer(
        &self,
        timestamp: DateTime<Utc>,
        values: Bars,
        frequency: Frequency,
    ) -> Result<(), GeneratorError> {
        self.buffer.append_new_value_to_buffer(timestamp, values, frequency)
    }

    fn pop_next_values(&self) -> Result<Option<PendingValue>, GeneratorError> {
        self.buffer.pop_next_values()
    }

    fn peek_next_time(&self) -> Option<DateTime<Utc>> {
        self.buffer.peek_next_time()
    }

    /// Also raises the stop flag so fetch and merge tasks wind down.
    fn finish(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.buffer.finish();
    }

    fn is_complete(&self) -> bool {
        self.buffer.is_complete()
    }

    fn frequencies(&self) -> Vec<Frequency> {
        self.buffer.frequencies()
    }
}
