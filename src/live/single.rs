// Single-source live generator: one provider, failures beyond the bound end the run

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::{append_with_backoff, batch_to_value, open_provider, BarDataProvider, ProviderError};
use crate::config::{FeedConfig, LiveConfig};
use crate::core::{Bars, Frequency};
use crate::error::{EngineError, EngineResult};
use crate::feed::{BarFeedGenerator, FeedGenerator, GeneratorError, PendingValue};

pub struct LiveBarFeedGenerator {
    provider: Arc<dyn BarDataProvider>,
    instrument: String,
    buffer: Arc<BarFeedGenerator>,
    config: LiveConfig,
    stopped: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<EngineResult<u64>>>>,
}

impl LiveBarFeedGenerator {
    pub fn new(
        provider: Arc<dyn BarDataProvider>,
        instrument: &str,
        frequencies: Vec<Frequency>,
        max_pending: usize,
        config: LiveConfig,
    ) -> Self {
        Self {
            provider,
            instrument: instrument.to_string(),
            buffer: Arc::new(BarFeedGenerator::new(frequencies, max_pending)),
            config,
            stopped: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    /// Buffer frequencies and capacity come from the feed settings.
    pub fn from_config(
        provider: Arc<dyn BarDataProvider>,
        instrument: &str,
        feed: &FeedConfig,
        config: LiveConfig,
    ) -> Self {
        Self::new(provider, instrument, feed.frequencies.clone(), feed.max_pending_values, config)
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    /// Init and connect the provider, then spawn the fetch loop on the
    /// current tokio runtime. A failed init or connect finishes the buffer
    /// and is returned without spawning anything.
    pub async fn start(&self) -> EngineResult<()> {
        let frequencies = self.buffer.frequencies();
        let opened = open_provider(self.provider.as_ref(), &self.instrument, &frequencies).await;
        if let Err(e) = opened {
            self.buffer.finish();
            return Err(e.into());
        }
        let provider = Arc::clone(&self.provider);
        let buffer = Arc::clone(&self.buffer);
        let stopped = Arc::clone(&self.stopped);
        let config = self.config.clone();
        let handle = tokio::spawn(async move { fetch_loop(provider, buffer, stopped, config).await });
        *self.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        info!("📡 Live generator started for {}", self.provider.name());
        Ok(())
    }

    pub async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Err(e) = self.provider.stop().await {
            warn!("⚠️  Provider {} stop failed: {}", self.provider.name(), e);
        }
    }

    /// Wait for the fetch loop; returns the number of values appended.
    pub async fn join(&self) -> EngineResult<u64> {
        let handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner).take();
        match handle {
            Some(handle) => handle
                .await
                .map_err(|e| EngineError::Internal(format!("live fetch task failed: {}", e)))?,
            None => Ok(0),
        }
    }
}

async fn fetch_loop(
    provider: Arc<dyn BarDataProvider>,
    buffer: Arc<BarFeedGenerator>,
    stopped: Arc<AtomicBool>,
    config: LiveConfig,
) -> EngineResult<u64> {
    let mut failures = 0u32;
    let mut appended = 0u64;
    let result = loop {
        if stopped.load(Ordering::SeqCst) {
            break Ok(appended);
        }
        match provider.next_bars().await {
            Ok(Some(bars)) => {
                failures = 0;
                let value = match batch_to_value(provider.name(), bars) {
                    Ok(Some(value)) => value,
                    Ok(None) => continue,
                    Err(e) => {
                        error!("❌ {}", e);
                        break Err(e);
                    }
                };
                match append_with_backoff(&buffer, value, config.append_retry(), &stopped).await {
                    Ok(()) => appended += 1,
                    Err(GeneratorError::GeneratorClosed) => break Ok(appended),
                    Err(e) => warn!("⚠️  Dropping bars from {}: {}", provider.name(), e),
                }
            }
            Ok(None) => tokio::time::sleep(config.idle_sleep()).await,
            Err(ProviderError::Exhausted) | Err(ProviderError::Stopped) => break Ok(appended),
            Err(e) if !e.is_transient() => {
                error!("❌ Provider {} failed permanently: {}", provider.name(), e);
                break Err(e.into());
            }
            Err(e) => {
                failures += 1;
                if failures > config.max_consecutive_failures {
                    error!("❌ Provider {} failed {} times, giving up", provider.name(), failures);
                    break Err(EngineError::ProviderFailed {
                        provider: provider.name().to_string(),
                        failures,
                    });
                }
                warn!("⚠️  Provider {} fetch failed ({}): {}", provider.name(), failures, e);
                tokio::time::sleep(config.failure_backoff()).await;
            }
        }
    };
    buffer.finish();
    result
}

impl FeedGenerator for LiveBarFeedGenerator {
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

    /// Also tells the fetch loop to wind down.
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::{ScriptStep, ScriptedProvider};

    fn fast_config(max_failures: u32) -> LiveConfig {
        LiveConfig {
            failure_backoff_ms: 1,
            max_consecutive_failures: max_failures,
            idle_sleep_ms: 1,
            append_retry_ms: 1,
            ..LiveConfig::default()
        }
    }

    #[tokio::test]
    async fn test_exhausted_provider_finishes_buffer() {
        let provider = Arc::new(ScriptedProvider::new(
            "script",
            vec![
                ScriptStep::minute_bar("X", 0),
                ScriptStep::Error(ProviderError::Fetch("blip".into())),
                ScriptStep::minute_bar("X", 60),
            ],
        ));
        let live = LiveBarFeedGenerator::new(
            provider,
            "X",
            vec![Frequency::MINUTE],
            16,
            fast_config(3),
        );
        live.start().await.unwrap();

        assert_eq!(live.join().await.unwrap(), 2);
        assert_eq!(live.pop_next_values().unwrap().unwrap().timestamp.timestamp(), 0);
        assert_eq!(live.pop_next_values().unwrap().unwrap().timestamp.timestamp(), 60);
        assert!(live.is_complete());
    }

    #[tokio::test]
    async fn test_failures_beyond_bound_are_fatal() {
        let provider = Arc::new(ScriptedProvider::always_failing("flaky"));
        let live = LiveBarFeedGenerator::new(
            provider,
            "X",
            vec![Frequency::MINUTE],
            16,
            fast_config(2),
        );
        live.start().await.unwrap();

        let err = live.join().await.unwrap_err();
        assert!(matches!(err, EngineError::ProviderFailed { failures: 3, .. }));
        assert!(err.is_fatal());
        assert!(live.is_complete());
    }

    #[tokio::test]
    async fn test_start_initialises_provider_for_instrument() {
        let start = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let provider = Arc::new(
            crate::live::FakeDataProvider::new("fake", start, std::time::Duration::ZERO, 5)
                .with_max_bars(5),
        );
        let live = LiveBarFeedGenerator::new(
            provider,
            "BTC",
            vec![Frequency::MINUTE],
            16,
            fast_config(3),
        );
        live.start().await.unwrap();

        assert_eq!(live.join().await.unwrap(), 5);
        let first = live.pop_next_values().unwrap().unwrap();
        assert!(first.values.contains_key("BTC"));
        assert_eq!(live.instrument(), "BTC");
    }

    #[tokio::test]
    async fn test_failed_init_aborts_start() {
        let provider = Arc::new(
            ScriptedProvider::new("script", vec![ScriptStep::minute_bar("X", 0)])
                .with_init_error(ProviderError::Init("bad instrument".into())),
        );
        let live = LiveBarFeedGenerator::new(
            provider.clone(),
            "X",
            vec![Frequency::MINUTE],
            16,
            fast_config(3),
        );

        let err = live.start().await.unwrap_err();
        assert!(matches!(err, EngineError::Provider(ProviderError::Init(_))));
        assert!(live.is_complete());
        assert_eq!(provider.remaining(), 1, "no fetch may run after a failed init");
        assert_eq!(live.join().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_non_transient_error_ends_without_retry() {
        let provider = Arc::new(ScriptedProvider::new(
            "script",
            vec![
                ScriptStep::Error(ProviderError::Init("session revoked".into())),
                ScriptStep::minute_bar("X", 0),
            ],
        ));
        let live = LiveBarFeedGenerator::new(
            provider.clone(),
            "X",
            vec![Frequency::MINUTE],
            16,
            fast_config(5),
        );
        live.start().await.unwrap();

        let err = live.join().await.unwrap_err();
        assert!(matches!(err, EngineError::Provider(ProviderError::Init(_))));
        assert_eq!(provider.remaining(), 1);
        assert!(live.is_complete());
    }
}
