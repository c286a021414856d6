//! SQLite bar log: recovery source, bar dump target and merge input

use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::info;

pub mod merge;
pub mod recovery;
pub mod row;
pub mod writer;

pub use merge::merge_bar_logs;
pub use recovery::{BarLogReader, RecoverySource};
pub use row::BarRow;
pub use writer::BarLogWriter;

/// Rows fetched per page by readers.
pub const READ_PAGE_SIZE: usize = 1024;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS bar_data (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol     TEXT    NOT NULL,
    date_time  INTEGER NOT NULL,
    open       REAL    NOT NULL,
    high       REAL    NOT NULL,
    low        REAL    NOT NULL,
    close      REAL    NOT NULL,
    volume     INTEGER NOT NULL,
    adj_close  REAL    NOT NULL,
    frequency  INTEGER NOT NULL,
    note       TEXT    NOT NULL DEFAULT ''
);
CREATE INDEX IF NOT EXISTS idx_bar_data_time ON bar_data (date_time, id);
";

#[derive(Debug, thiserror::Error)]
pub enum BarLogError {
    #[error("Bar log query failed: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Bar log file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid bar log row {id}: {reason}")]
    InvalidRow { id: i64, reason: String },

    #[error("Nothing to merge: no source logs given")]
    NoSources,

    #[error("Bar log {0} does not exist")]
    Missing(PathBuf),
}

/// Handle to one bar log database. Cloning shares the connection.
#[derive(Clone)]
pub struct BarLog {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for BarLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BarLog").field("path", &self.path).finish()
    }
}

impl BarLog {
    /// Open (creating if needed) a bar log file. With `remove_old`, an
    /// existing file is deleted first.
    pub fn open<P: AsRef<Path>>(path: P, remove_old: bool) -> Result<Self, BarLogError> {
        let path = path.as_ref();
        if remove_old && path.exists() {
            std::fs::remove_file(path)?;
            info!("🗑️  Removed old bar log {}", path.display());
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;

        Ok(BarLog {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open a bar log that must already exist; never creates a file.
    pub fn open_existing<P: AsRef<Path>>(path: P) -> Result<Self, BarLogError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(BarLogError::Missing(path.to_path_buf()));
        }
        Self::open(path, false)
    }

    pub fn open_in_memory() -> Result<Self, BarLogError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;

        Ok(BarLog {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert all rows in one transaction.
    pub fn insert_batch(&self, rows: &[BarRow]) -> Result<usize, BarLogError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        for row in rows {
            row.insert(&tx)?;
        }
        tx.commit()?;
        Ok(rows.len())
    }

    pub fn count(&self) -> Result<u64, BarLogError> {
        let conn = self.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM bar_data", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    /// Next page in `(date_time, id)` order strictly after `after`.
    pub fn read_page(
        &self,
        after: Option<(i64, i64)>,
        limit: usize,
    ) -> Result<Vec<(i64, BarRow)>, BarLogError> {
        let conn = self.lock();
        let (after_time, after_id) = after.unwrap_or((i64::MIN, i64::MIN));
        let sql = format!(
            "SELECT {} FROM bar_data
             WHERE date_time > ?1 OR (date_time = ?1 AND id > ?2)
             ORDER BY date_time, id
             LIMIT ?3",
            row::SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![after_time, after_id, limit as i64], |r| BarRow::from_row(r))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Every row in replay order.
    pub fn read_all(&self) -> Result<Vec<BarRow>, BarLogError> {
        let mut out = Vec::new();
        let mut after = None;
        loop {
            let page = self.read_page(after, READ_PAGE_SIZE)?;
            let Some((id, last)) = page.last() else {
                break;
            };
            after = Some((last.date_time, *id));
            out.extend(page.into_iter().map(|(_, row)| row));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(symbol: &str, date_time: i64) -> BarRow {
        BarRow {
            symbol: symbol.to_string(),
            date_time,
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
            volume: 10,
            adj_close: 1.5,
            frequency: 60,
            note: String::new(),
        }
    }

    #[test]
    fn test_insert_and_count() {
        let log = BarLog::open_in_memory().unwrap();
        assert_eq!(log.count().unwrap(), 0);
        assert_eq!(log.insert_batch(&[row("A", 2), row("A", 1)]).unwrap(), 2);
        assert_eq!(log.count().unwrap(), 2);
    }

    #[test]
    fn test_read_order_is_time_then_insertion() {
        let log = BarLog::open_in_memory().unwrap();
        log.insert_batch(&[row("late", 30), row("first", 10), row("second", 10), row("mid", 20)])
            .unwrap();

        let symbols: Vec<String> = log.read_all().unwrap().into_iter().map(|r| r.symbol).collect();
        assert_eq!(symbols, vec!["first", "second", "mid", "late"]);
    }

    #[test]
    fn test_paging_resumes_after_cursor() {
        let log = BarLog::open_in_memory().unwrap();
        let rows: Vec<BarRow> = (0..5).map(|i| row("A", i)).collect();
        log.insert_batch(&rows).unwrap();

        let first = log.read_page(None, 2).unwrap();
        assert_eq!(first.len(), 2);
        let (id, last) = first.last().unwrap();
        let rest = log.read_page(Some((last.date_time, *id)), 10).unwrap();
        let times: Vec<i64> = rest.iter().map(|(_, r)| r.date_time).collect();
        assert_eq!(times, vec![2, 3, 4]);
    }
}
