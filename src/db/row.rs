//! Persisted bar row: the on-disk schema shared by replay, dump and merge

use chrono::DateTime;
use rusqlite::{params, Connection, Result as SqlResult, Row};
use serde::{Deserialize, Serialize};

use crate::core::{Bar, BarError, Frequency};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarRow {
    pub symbol: String,
    /// Unix seconds.
    pub date_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub adj_close: f64,
    pub frequency: i64,
    pub note: String,
}

pub(crate) const SELECT_COLUMNS: &str =
    "id, symbol, date_time, open, high, low, close, volume, adj_close, frequency, note";

impl BarRow {
    pub fn from_bar(symbol: &str, bar: &Bar) -> Self {
        BarRow {
            symbol: symbol.to_string(),
            date_time: bar.timestamp().timestamp(),
            open: bar.raw_open(),
            high: bar.raw_high(),
            low: bar.raw_low(),
            close: bar.raw_close(),
            volume: bar.volume().round() as i64,
            adj_close: bar.adj_close(),
            frequency: bar.frequency().as_secs(),
            note: String::new(),
        }
    }

    /// Rebuild the bar; fails on out-of-range timestamps or bad geometry.
    pub fn to_bar(&self) -> Result<Bar, BarError> {
        let timestamp = DateTime::from_timestamp(self.date_time, 0)
            .ok_or(BarError::InvalidTimestamp(self.date_time))?;
        Bar::new(
            timestamp,
            self.open,
            self.high,
            self.low,
            self.close,
            self.volume as f64,
            self.adj_close,
            Frequency::from_secs(self.frequency),
        )
    }

    pub fn frequency(&self) -> Frequency {
        Frequency::from_secs(self.frequency)
    }

    /// Parse a row selected with `SELECT_COLUMNS`; returns the row id alongside.
    pub(crate) fn from_row(row: &Row) -> SqlResult<(i64, Self)> {
        Ok((
            row.get(0)?,
            BarRow {
                symbol: row.get(1)?,
                date_time: row.get(2)?,
                open: row.get(3)?,
                high: row.get(4)?,
                low: row.get(5)?,
                close: row.get(6)?,
                volume: row.get(7)?,
                adj_close: row.get(8)?,
                frequency: row.get(9)?,
                note: row.get(10)?,
            },
        ))
    }

    pub(crate) fn insert(&self, conn: &Connection) -> SqlResult<i64> {
        conn.execute(
            "INSERT INTO bar_data (symbol, date_time, open, high, low, close, volume, adj_close, frequency, note)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                self.symbol,
                self.date_time,
                self.open,
                self.high,
                self.low,
                self.close,
                self.volume,
                self.adj_close,
                self.frequency,
                self.note,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }
}
