// Bar Feed Engine Library
//
// Event-driven market data replay: merges recovery logs, CSV files and live
// providers into one time-ordered bar stream driven by a cooperative dispatcher.

pub mod config;
pub mod core;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod feed;
pub mod live;
pub mod logging;
pub mod progress;
pub mod series;

// Re-export core value types
pub use crate::core::{Bar, BarError, Bars, Event, Frequency, SubscriptionId};

// Re-export error types
pub use error::{EngineError, EngineResult};

// Re-export configuration
pub use config::{
    ConfigError, DispatcherConfig, DumpConfig, EngineConfig, FeedConfig, LiveConfig, LoggingConfig,
};

// Re-export series storage
pub use series::{BarDataSeries, DataSeriesManager, SequenceDataSeries, SeriesError};

// Re-export feed components
pub use feed::{
    BarFeedGenerator, CsvBarFeedGenerator, DataFeedHook, DayBarGenHook, FeedGenerator,
    GeneratorError, GenericDataFeed, HookPipeline, NewValue, PendingValue,
};

// Re-export dispatcher
pub use dispatch::{Dispatcher, DispatcherState, StopHandle, Subject};

// Re-export bar log storage
pub use db::{merge_bar_logs, BarLog, BarLogError, BarLogReader, BarLogWriter, BarRow, RecoverySource};

// Re-export live generation
pub use live::{
    BarDataProvider, FakeDataProvider, LiveBarFeedGenerator, MultiLiveBarFeedGenerator,
    ProviderError, ProviderStats, ScriptStep, ScriptedProvider, SeriesValueType,
};
