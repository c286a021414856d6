//! Windowed, time-ordered data series keyed by symbol and frequency

use chrono::{DateTime, Utc};

use crate::core::Frequency;

pub mod bar_series;
pub mod manager;
pub mod sequence;

pub use bar_series::BarDataSeries;
pub use manager::{DataSeriesManager, SeriesFactory};
pub use sequence::SequenceDataSeries;

/// Default window length for newly created series.
pub const DEFAULT_MAX_LEN: usize = 250;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SeriesError {
    #[error("Out of order append: {attempted} is before last stored {last}")]
    OutOfOrder {
        last: DateTime<Utc>,
        attempted: DateTime<Utc>,
    },

    #[error("Index {index} out of range for series of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Invalid length: {0}")]
    InvalidLength(String),

    #[error("No series registered for symbol {0}")]
    UnknownSymbol(String),

    #[error("No {frequency} series registered for symbol {symbol}")]
    UnknownFrequency { symbol: String, frequency: Frequency },

    #[error("Failed to serialize series: {0}")]
    Serialize(String),
}
