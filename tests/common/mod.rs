// Common test utilities and helpers

#![allow(dead_code)]

use bar_feed_engine::{Bar, BarLog, BarRow, Bars, FeedConfig, Frequency};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tempfile::TempDir;

/// Base timestamp used across tests (2024-01-01 00:00:00 UTC).
pub const BASE_TS: i64 = 1_704_067_200;

pub fn ts(offset_secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(BASE_TS + offset_secs, 0).expect("timestamp in range")
}

/// A valid minute bar closing at `close`.
pub fn minute_bar(offset_secs: i64, close: f64) -> Bar {
    Bar::new(ts(offset_secs), close, close + 1.0, close - 1.0, close, 100.0, close, Frequency::MINUTE)
        .expect("valid bar")
}

pub fn single_bars(symbol: &str, bar: Bar) -> Bars {
    let mut bars = Bars::new();
    bars.insert(symbol.to_string(), bar);
    bars
}

pub fn minute_row(symbol: &str, offset_secs: i64, close: f64) -> BarRow {
    BarRow::from_bar(symbol, &minute_bar(offset_secs, close))
}

/// Feed settings with only minute bars and no derived day bars.
pub fn minute_feed_config() -> FeedConfig {
    FeedConfig {
        frequencies: vec![Frequency::MINUTE],
        max_len: 100,
        max_pending_values: 64,
        day_bar_hook: false,
        ..FeedConfig::default()
    }
}

/// Create a temporary directory for test databases
pub fn create_temp_db_dir() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let db_path = temp_dir.path().join("bars.db");
    (temp_dir, db_path)
}

/// Write `rows` to a fresh bar log file and return its location.
pub fn create_bar_log(rows: &[BarRow]) -> (TempDir, PathBuf) {
    let (temp_dir, db_path) = create_temp_db_dir();
    let log = BarLog::open(&db_path, true).expect("Failed to open bar log");
    log.insert_batch(rows).expect("Failed to seed bar log");
    (temp_dir, db_path)
}
