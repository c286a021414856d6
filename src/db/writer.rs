// Bar dump: appends dispatched live bars to a bar log in batches

use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info, warn};

use super::{BarLog, BarLogError, BarRow};
use crate::config::DumpConfig;
use crate::core::{Bars, Event, SubscriptionId};
use crate::feed::NewValue;

/// Default rows per insert transaction.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

pub struct BarLogWriter {
    log: BarLog,
    buffer: Vec<BarRow>,
    batch_size: usize,
    written: u64,
    skipped_recovery: u64,
}

impl BarLogWriter {
    pub fn new(log: BarLog, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            log,
            buffer: Vec::with_capacity(batch_size),
            batch_size,
            written: 0,
            skipped_recovery: 0,
        }
    }

    /// Open the configured dump target. `None` when no bar log path is set.
    pub fn from_config(config: &DumpConfig) -> Result<Option<Self>, BarLogError> {
        let Some(path) = config.bar_log_path.as_deref().filter(|p| !p.as_os_str().is_empty())
        else {
            return Ok(None);
        };
        let log = BarLog::open(path, config.remove_old_bars)?;
        info!("💾 Dumping bars to {} in batches of {}", path.display(), config.batch_size);
        Ok(Some(Self::new(log, config.batch_size)))
    }

    /// Subscribe a shared writer to a feed's new-value event.
    pub fn attach(writer: Arc<Mutex<Self>>, event: &mut Event<NewValue>) -> SubscriptionId {
        event.subscribe(move |value: &NewValue| {
            let mut writer = writer.lock().unwrap_or_else(PoisonError::into_inner);
            if let Err(e) = writer.record(&value.bars) {
                error!("❌ Failed to dump bars at {}: {}", value.timestamp, e);
            }
        })
    }

    /// Buffer every non-recovery bar; flushes once a batch is full.
    pub fn record(&mut self, bars: &Bars) -> Result<(), BarLogError> {
        for (symbol, bar) in bars {
            if bar.is_recovery() {
                self.skipped_recovery += 1;
                continue;
            }
            self.buffer.push(BarRow::from_bar(symbol, bar));
        }
        if self.buffer.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), BarLogError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let inserted = self.log.insert_batch(&self.buffer)?;
        self.written += inserted as u64;
        self.buffer.clear();
        debug!("Flushed {} bar rows ({} total)", inserted, self.written);
        Ok(())
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn skipped_recovery(&self) -> u64 {
        self.skipped_recovery
    }
}

impl Drop for BarLogWriter {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!("⚠️  Dropping {} unflushed bar rows: {}", self.buffer.len(), e);
        }
    }
}
