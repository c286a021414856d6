//! Live generation: providers fetched on tokio tasks, pushed into a bar buffer

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::core::{batch_frequency, Bars, Frequency};
use crate::error::EngineError;
use crate::feed::{BarFeedGenerator, FeedGenerator, GeneratorError, PendingValue};

pub mod fake;
pub mod multi;
pub mod provider;
pub mod single;

pub use fake::{FakeDataProvider, ScriptStep, ScriptedProvider};
pub use multi::{MultiLiveBarFeedGenerator, ProviderStats};
pub use provider::{BarDataProvider, ProviderError, SeriesValueType};
pub use single::LiveBarFeedGenerator;

/// Turn a provider batch into a pending value. Mixed frequencies within one
/// batch are a contract violation.
pub(crate) fn batch_to_value(
    provider: &str,
    bars: Bars,
) -> Result<Option<PendingValue>, EngineError> {
    let Some(first) = bars.values().next() else {
        return Ok(None);
    };
    let timestamp = first.timestamp();
    let frequency = batch_frequency(&bars).ok_or_else(|| {
        EngineError::FrequencyMismatch(format!(
            "provider {} returned a mixed-frequency batch",
            provider
        ))
    })?;
    Ok(Some(PendingValue::new(timestamp, bars, frequency)))
}

/// Init then connect a provider; any failure aborts before fetching starts.
pub(crate) async fn open_provider(
    provider: &dyn BarDataProvider,
    instrument: &str,
    frequencies: &[Frequency],
) -> Result<(), ProviderError> {
    if let Err(e) = provider.init(instrument, frequencies).await {
        error!("❌ Failed to init provider {} for {}: {}", provider.name(), instrument, e);
        return Err(e);
    }
    if let Err(e) = provider.connect().await {
        error!("❌ Failed to connect provider {}: {}", provider.name(), e);
        return Err(e);
    }
    info!("🔌 Provider {} ready for {}", provider.name(), instrument);
    Ok(())
}

/// Append, sleeping while the buffer is full. Gives up with
/// `GeneratorClosed` once `stopped` is raised.
pub(crate) async fn append_with_backoff(
    buffer: &BarFeedGenerator,
    value: PendingValue,
    retry_interval: Duration,
    stopped: &AtomicBool,
) -> Result<(), GeneratorError> {
    let mut warned = false;
    loop {
        let values = value.values.clone();
        match buffer.append_new_value_to_buffer(value.timestamp, values, value.frequency) {
            Err(GeneratorError::BufferFull(capacity)) => {
                if stopped.load(Ordering::SeqCst) {
                    return Err(GeneratorError::GeneratorClosed);
                }
                if !warned {
                    warn!("⏳ Live buffer full ({} values), retrying append", capacity);
                    warned = true;
                }
                tokio::time::sleep(retry_interval).await;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn value(secs: i64) -> PendingValue {
        let bars = ScriptStep::minute_bars("A", secs);
        let timestamp = chrono::DateTime::from_timestamp(secs, 0).unwrap();
        PendingValue::new(timestamp, bars, Frequency::MINUTE)
    }

    #[test]
    fn test_empty_batch_is_skipped() {
        assert!(batch_to_value("p", Bars::new()).unwrap().is_none());
        let pending = batch_to_value("p", ScriptStep::minute_bars("A", 60)).unwrap().unwrap();
        assert_eq!(pending.frequency, Frequency::MINUTE);
    }

    #[test]
    fn test_backoff_gives_up_once_stopped() {
        let buffer = BarFeedGenerator::new(vec![Frequency::MINUTE], 1);
        let stopped = AtomicBool::new(true);
        tokio_test::block_on(async {
            append_with_backoff(&buffer, value(0), Duration::from_millis(1), &stopped)
                .await
                .unwrap();
            let err = append_with_backoff(&buffer, value(60), Duration::from_millis(1), &stopped)
                .await
                .unwrap_err();
            assert_eq!(err, GeneratorError::GeneratorClosed);
        });
    }

    #[test]
    fn test_backoff_waits_for_room() {
        let buffer = Arc::new(BarFeedGenerator::new(vec![Frequency::MINUTE], 1));
        buffer
            .append_new_value_to_buffer(value(0).timestamp, value(0).values, Frequency::MINUTE)
            .unwrap();

        let consumer = Arc::clone(&buffer);
        let drain = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            consumer.pop_next_values().unwrap()
        });

        let stopped = AtomicBool::new(false);
        tokio_test::block_on(append_with_backoff(
            &buffer,
            value(60),
            Duration::from_millis(2),
            &stopped,
        ))
        .unwrap();
        assert!(drain.join().unwrap().is_some());
        assert_eq!(buffer.len(), 1);
    }
}
