//! Unified error handling for the engine
//!
//! Each subsystem keeps its own error enum; `EngineError` wraps them and adds
//! the conditions that end a run. `is_fatal` is the single place that decides
//! whether a dispatch error stops the dispatcher.

use chrono::{DateTime, Utc};

use crate::config::ConfigError;
use crate::core::{BarError, Frequency};
use crate::db::BarLogError;
use crate::feed::GeneratorError;
use crate::live::ProviderError;
use crate::series::SeriesError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Bar(#[from] BarError),

    #[error(transparent)]
    Series(#[from] SeriesError),

    #[error(transparent)]
    Generator(#[from] GeneratorError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    BarLog(#[from] BarLogError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Recovery read failed after {consumed} rows: {source}")]
    RecoveryRead {
        consumed: u64,
        #[source]
        source: BarLogError,
    },

    #[error("Recovered symbol {found} does not match configured symbol {expected}")]
    SymbolMismatch { expected: String, found: String },

    #[error("Recovered {symbol} {frequency} bar at {timestamp} is not after last dispatched {last}")]
    OutdatedRecoveryData {
        symbol: String,
        frequency: Frequency,
        timestamp: DateTime<Utc>,
        last: DateTime<Utc>,
    },

    #[error("Frequency mismatch: {0}")]
    FrequencyMismatch(String),

    #[error("Provider {provider} failed {failures} times in a row")]
    ProviderFailed { provider: String, failures: u32 },

    #[error("Subject failed to start: {0}")]
    SubjectStart(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// Conditions that must terminate the run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::RecoveryRead { .. }
                | EngineError::SymbolMismatch { .. }
                | EngineError::OutdatedRecoveryData { .. }
                | EngineError::FrequencyMismatch(_)
                | EngineError::ProviderFailed { .. }
                | EngineError::SubjectStart(_)
        )
    }

    /// Check if the operation that produced this error can simply be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Generator(GeneratorError::BufferFull(_)) => true,
            EngineError::Provider(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            EngineError::Bar(_) => "geometry",
            EngineError::Generator(GeneratorError::BufferFull(_)) => "backpressure",
            EngineError::Generator(GeneratorError::FrequencyNotSupported(_))
            | EngineError::FrequencyMismatch(_) => "frequency",
            EngineError::Generator(_) => "generator",
            EngineError::Series(SeriesError::OutOfOrder { .. })
            | EngineError::OutdatedRecoveryData { .. } => "ordering",
            EngineError::Series(_) => "series",
            EngineError::Provider(_) | EngineError::ProviderFailed { .. } => "provider",
            EngineError::RecoveryRead { .. } | EngineError::SymbolMismatch { .. } => "recovery",
            EngineError::Config(_) => "config",
            EngineError::BarLog(_) | EngineError::Io(_) | EngineError::Csv(_) => "storage",
            EngineError::SubjectStart(_) | EngineError::Internal(_) => "internal",
        }
    }
}

impl From<String> for EngineError {
    fn from(msg: String) -> Self {
        EngineError::Internal(msg)
    }
}

impl From<&str> for EngineError {
    fn from(msg: &str) -> Self {
        EngineError::Internal(msg.to_string())
    }
}
