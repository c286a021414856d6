// Deterministic CSV replay producer

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{error, info, warn};

use super::{append_with_retry, FeedGenerator, GeneratorError, PendingValue};
use crate::core::{Bar, Bars, Frequency};
use crate::error::{EngineError, EngineResult};

#[derive(Debug, Deserialize)]
struct CsvRecord {
    #[serde(rename = "Date", alias = "date", alias = "DateTime", alias = "date_time")]
    date: String,
    #[serde(rename = "Open", alias = "open")]
    open: f64,
    #[serde(rename = "High", alias = "high")]
    high: f64,
    #[serde(rename = "Low", alias = "low")]
    low: f64,
    #[serde(rename = "Close", alias = "close")]
    close: f64,
    #[serde(rename = "Volume", alias = "volume")]
    volume: f64,
    #[serde(rename = "Adj Close", alias = "adj_close", default)]
    adj_close: Option<f64>,
    #[serde(rename = "Symbol", alias = "symbol", default)]
    symbol: Option<String>,
    #[serde(rename = "Frequency", alias = "frequency", default)]
    frequency: Option<i64>,
}

/// Accepts `%Y-%m-%d %H:%M:%S`, `%Y-%m-%d`, RFC 3339 or unix seconds.
pub fn parse_date_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date.and_time(chrono::NaiveTime::MIN).and_utc());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    raw.parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}

/// Streams CSV rows as pending values. Consecutive rows with the same
/// timestamp and frequency are grouped into one value.
pub struct CsvValueReader<R: Read> {
    records: csv::DeserializeRecordsIntoIter<R, CsvRecord>,
    symbol: String,
    frequency: Frequency,
    pending: Option<(String, Bar)>,
    line: u64,
}

impl<R: Read> CsvValueReader<R> {
    pub fn new(reader: R, symbol: &str, frequency: Frequency) -> Self {
        let records = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader)
            .into_deserialize();
        Self {
            records,
            symbol: symbol.to_string(),
            frequency,
            pending: None,
            line: 1,
        }
    }

    fn next_bar(&mut self) -> EngineResult<Option<(String, Bar)>> {
        loop {
            let Some(record) = self.records.next() else {
                return Ok(None);
            };
            let record = record?;
            self.line += 1;

            let Some(timestamp) = parse_date_time(&record.date) else {
                return Err(EngineError::Internal(format!(
                    "line {}: unparseable date '{}'",
                    self.line, record.date
                )));
            };
            let frequency = record.frequency.map(Frequency::from_secs).unwrap_or(self.frequency);
            let symbol = record.symbol.unwrap_or_else(|| self.symbol.clone());
            match Bar::new(
                timestamp,
                record.open,
                record.high,
                record.low,
                record.close,
                record.volume,
                record.adj_close.unwrap_or(record.close),
                frequency,
            ) {
                Ok(bar) => return Ok(Some((symbol, bar))),
                Err(e) => warn!("⚠️  Skipping CSV line {}: {}", self.line, e),
            }
        }
    }

    pub fn next_value(&mut self) -> EngineResult<Option<PendingValue>> {
        let first = match self.pending.take() {
            Some(first) => first,
            None => match self.next_bar()? {
                Some(first) => first,
                None => return Ok(None),
            },
        };

        let timestamp = first.1.timestamp();
        let frequency = first.1.frequency();
        let mut values = Bars::new();
        values.insert(first.0, first.1);

        while let Some((symbol, bar)) = self.next_bar()? {
            if bar.timestamp() == timestamp
                && bar.frequency() == frequency
                && !values.contains_key(&symbol)
            {
                values.insert(symbol, bar);
            } else {
                self.pending = Some((symbol, bar));
                break;
            }
        }
        Ok(Some(PendingValue::new(timestamp, values, frequency)))
    }
}

/// Replays a CSV file into a generator on a background thread, retrying on
/// a full buffer, then finishes the generator.
pub struct CsvBarFeedGenerator {
    path: PathBuf,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<EngineResult<u64>>>,
}

impl CsvBarFeedGenerator {
    pub fn spawn<P: AsRef<Path>>(
        path: P,
        symbol: &str,
        frequency: Frequency,
        generator: Arc<dyn FeedGenerator>,
        retry_interval: Duration,
    ) -> EngineResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = std::fs::File::open(&path)?;
        let stop = Arc::new(AtomicBool::new(false));

        let mut reader = CsvValueReader::new(file, symbol, frequency);
        let thread_stop = Arc::clone(&stop);
        let label = path.display().to_string();
        let handle = std::thread::spawn(move || {
            let result = produce(&mut reader, generator.as_ref(), retry_interval, &thread_stop);
            generator.finish();
            match &result {
                Ok(count) => info!("✅ CSV {} produced {} values", label, count),
                Err(e) => error!("❌ CSV {} stopped: {}", label, e),
            }
            result
        });

        Ok(Self {
            path,
            stop,
            handle: Some(handle),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Wait for the producer; returns the number of values appended.
    pub fn join(&mut self) -> EngineResult<u64> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| EngineError::Internal("CSV producer thread panicked".to_string()))?,
            None => Ok(0),
        }
    }
}

fn produce<R: Read>(
    reader: &mut CsvValueReader<R>,
    generator: &dyn FeedGenerator,
    retry_interval: Duration,
    stop: &AtomicBool,
) -> EngineResult<u64> {
    let mut produced = 0;
    while !stop.load(Ordering::SeqCst) {
        let Some(value) = reader.next_value()? else {
            break;
        };
        match append_with_retry(generator, value, retry_interval, stop) {
            Ok(()) => produced += 1,
            Err(GeneratorError::GeneratorClosed) => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(produced)
}
