//! Feed layer: pending-value generators, hooks and the generic data feed

pub mod csv_replay;
pub mod data_feed;
pub mod generator;
pub mod hooks;

pub use csv_replay::{CsvBarFeedGenerator, CsvValueReader};
pub use data_feed::{GenericDataFeed, NewValue};
pub use generator::{
    append_with_retry, BarFeedGenerator, FeedGenerator, GeneratorError, PendingValue,
    DEFAULT_MAX_PENDING,
};
pub use hooks::{DataFeedHook, DayBarGenHook, HookPipeline};
