//! Live bar data provider contract

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::{Bars, Frequency};

/// Kind of values a provider emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeriesValueType {
    Bar,
    Tick,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider init failed: {0}")]
    Init(String),

    #[error("Provider connect failed: {0}")]
    Connect(String),

    #[error("Provider fetch failed: {0}")]
    Fetch(String),

    #[error("Provider has no more data")]
    Exhausted,

    #[error("Provider stopped")]
    Stopped,
}

impl ProviderError {
    /// Failures worth retrying after a backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Fetch(_) | ProviderError::Connect(_))
    }
}

/// A live source of bars. Methods take `&self` so `stop` can be called while
/// a fetch is in flight on another task.
#[async_trait]
pub trait BarDataProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn init(&self, instrument: &str, frequencies: &[Frequency]) -> Result<(), ProviderError>;

    async fn connect(&self) -> Result<(), ProviderError>;

    /// `Ok(None)` when nothing is available yet. `Err(Exhausted)` ends the
    /// stream; other errors are transient. May sleep but must return.
    async fn next_bars(&self) -> Result<Option<Bars>, ProviderError>;

    async fn reset(&self) -> Result<(), ProviderError>;

    async fn stop(&self) -> Result<(), ProviderError>;

    fn datatype(&self) -> SeriesValueType;
}
