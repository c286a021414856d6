// Ordered replay of a persisted bar log

use std::collections::VecDeque;
use std::path::Path;
use tracing::info;

use super::{BarLog, BarLogError, BarRow, READ_PAGE_SIZE};
use crate::progress::ReplayProgress;

/// Persisted rows in ascending `date_time` order, consumed once.
pub trait RecoverySource: Send {
    fn peek(&mut self) -> Result<Option<&BarRow>, BarLogError>;

    fn next(&mut self) -> Result<Option<BarRow>, BarLogError>;

    fn total(&self) -> u64;

    fn consumed(&self) -> u64;

    fn is_exhausted(&self) -> bool;
}

pub struct BarLogReader {
    log: BarLog,
    page: VecDeque<(i64, BarRow)>,
    cursor: Option<(i64, i64)>,
    page_size: usize,
    total: u64,
    consumed: u64,
    drained: bool,
    progress: ReplayProgress,
}

impl BarLogReader {
    pub fn new(log: BarLog, show_progress: bool) -> Result<Self, BarLogError> {
        let total = log.count()?;
        Ok(Self {
            log,
            page: VecDeque::new(),
            cursor: None,
            page_size: READ_PAGE_SIZE,
            total,
            consumed: 0,
            drained: total == 0,
            progress: ReplayProgress::new(total, show_progress),
        })
    }

    /// Fails with `BarLogError::Missing` rather than creating an empty log.
    pub fn open<P: AsRef<Path>>(path: P, show_progress: bool) -> Result<Self, BarLogError> {
        let path = path.as_ref();
        let reader = Self::new(BarLog::open_existing(path)?, show_progress)?;
        info!("📂 Recovery log {} holds {} rows", path.display(), reader.total);
        Ok(reader)
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn fill(&mut self) -> Result<(), BarLogError> {
        if !self.page.is_empty() || self.drained {
            return Ok(());
        }
        let page = self.log.read_page(self.cursor, self.page_size)?;
        match page.last() {
            Some((id, row)) => self.cursor = Some((row.date_time, *id)),
            None => {
                self.drained = true;
                self.progress.finish();
            }
        }
        self.page.extend(page);
        Ok(())
    }
}

impl RecoverySource for BarLogReader {
    fn peek(&mut self) -> Result<Option<&BarRow>, BarLogError> {
        self.fill()?;
        Ok(self.page.front().map(|(_, row)| row))
    }

    fn next(&mut self) -> Result<Option<BarRow>, BarLogError> {
        self.fill()?;
        let next = self.page.pop_front().map(|(_, row)| row);
        if let Some(row) = &next {
            self.consumed += 1;
            self.progress.advance(&row.symbol);
            if self.consumed >= self.total {
                self.progress.finish();
            }
        }
        Ok(next)
    }

    fn total(&self) -> u64 {
        self.total
    }

    fn consumed(&self) -> u64 {
        self.consumed
    }

    fn is_exhausted(&self) -> bool {
        self.drained && self.page.is_empty()
    }
}
