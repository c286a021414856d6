// k-way merge of several bar logs into one, ordered by DateTime

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use tracing::info;

use super::{BarLog, BarLogError, BarLogReader, BarRow, RecoverySource};
use crate::progress::MergeProgress;

const MERGE_BATCH_SIZE: usize = 1024;

/// Merge `sources` into `output`. Ties on `date_time` go to the lower
/// frequency, then to the earlier source. Returns the number of rows written.
pub fn merge_bar_logs(
    output: &BarLog,
    sources: &[BarLog],
    show_progress: bool,
) -> Result<u64, BarLogError> {
    if sources.is_empty() {
        return Err(BarLogError::NoSources);
    }

    let mut readers = sources
        .iter()
        .map(|log| BarLogReader::new(log.clone(), false))
        .collect::<Result<Vec<_>, _>>()?;
    let total: u64 = readers.iter().map(|r| r.total()).sum();
    let progress = MergeProgress::new(total, show_progress);
    info!("🔀 Merging {} bar logs ({} rows)", readers.len(), total);

    let mut heap = BinaryHeap::new();
    for (index, reader) in readers.iter_mut().enumerate() {
        if let Some(row) = reader.peek()? {
            heap.push(Reverse((row.date_time, row.frequency, index)));
        }
    }

    let mut batch: Vec<BarRow> = Vec::with_capacity(MERGE_BATCH_SIZE);
    let mut written = 0u64;
    while let Some(Reverse((_, _, index))) = heap.pop() {
        let reader = &mut readers[index];
        if let Some(row) = reader.next()? {
            batch.push(row);
        }
        if let Some(row) = reader.peek()? {
            heap.push(Reverse((row.date_time, row.frequency, index)));
        }

        if batch.len() >= MERGE_BATCH_SIZE {
            written += output.insert_batch(&batch)? as u64;
            progress.advance(batch.len() as u64);
            batch.clear();
        }
    }
    if !batch.is_empty() {
        written += output.insert_batch(&batch)? as u64;
        progress.advance(batch.len() as u64);
    }

    progress.finish(written);
    info!("✅ Merged {} rows", written);
    Ok(written)
}
