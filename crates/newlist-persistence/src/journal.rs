//! JSON Lines audit journal for trade attempts.
//!
//! Uses JSON Lines format (.jsonl) for robustness:
//! - Each line is a complete JSON object
//! - Partial file corruption only affects individual lines
//! - Can be read even if write was interrupted
//!
//! `JournaledTradeStore` wraps any `TradeStore` and mirrors every terminal
//! attempt to a daily `trades_YYYY-MM-DD.jsonl` file. The journal is
//! secondary: a journal failure is logged and never fails the store write.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use newlist_core::TradeAttempt;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::PersistenceResult;
use crate::store::{BoxFuture, TradeQuery, TradeStats, TradeStore};

/// Active writer state for daily file.
struct ActiveWriter {
    writer: BufWriter<File>,
    date: String,
    records_written: usize,
}

/// Daily-rotating JSON Lines writer.
///
/// Uses append mode - safe for interrupted writes.
pub struct JsonLinesWriter<T: Serialize> {
    base_dir: PathBuf,
    /// File name prefix, e.g. `trades` -> `trades_2024-01-01.jsonl`.
    prefix: String,
    buffer: Vec<T>,
    /// Flush once this many records are buffered.
    max_buffer_size: usize,
    active_writer: Option<ActiveWriter>,
}

impl<T: Serialize> JsonLinesWriter<T> {
    pub fn new(base_dir: impl AsRef<Path>, prefix: &str, max_buffer_size: usize) -> Self {
        let base_dir = base_dir.as_ref().to_path_buf();
        if let Err(e) = std::fs::create_dir_all(&base_dir) {
            warn!(?e, dir = %base_dir.display(), "Failed to create journal directory");
        }

        Self {
            base_dir,
            prefix: prefix.to_string(),
            buffer: Vec::with_capacity(max_buffer_size.max(1)),
            max_buffer_size: max_buffer_size.max(1),
            active_writer: None,
        }
    }

    pub fn add_record(&mut self, record: T) -> PersistenceResult<()> {
        self.buffer.push(record);

        if self.buffer.len() >= self.max_buffer_size {
            self.flush()?;
        }

        Ok(())
    }

    fn close_active_writer(&mut self) {
        if let Some(mut active) = self.active_writer.take() {
            if let Err(e) = active.writer.flush() {
                warn!(?e, "Failed to flush journal on close");
            }
            info!(
                date = %active.date,
                records = active.records_written,
                "Closed journal file"
            );
        }
    }

    fn open_writer(&mut self, date: &str) -> PersistenceResult<&mut ActiveWriter> {
        let needs_rotation = self
            .active_writer
            .as_ref()
            .is_some_and(|w| w.date != date);
        if needs_rotation {
            self.close_active_writer();
        }

        let active = match self.active_writer.take() {
            Some(active) => active,
            None => {
                let path = self.base_dir.join(format!("{}_{}.jsonl", self.prefix, date));
                info!(path = %path.display(), "Opening journal file (append mode)");

                let file = OpenOptions::new().create(true).append(true).open(&path)?;
                ActiveWriter {
                    writer: BufWriter::new(file),
                    date: date.to_string(),
                    records_written: 0,
                }
            }
        };

        Ok(self.active_writer.insert(active))
    }

    /// Flush buffered records to today's file.
    pub fn flush(&mut self) -> PersistenceResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let today = Utc::now().format("%Y-%m-%d").to_string();
        let records = std::mem::take(&mut self.buffer);
        let record_count = records.len();

        let active = self.open_writer(&today)?;
        for record in &records {
            let json = serde_json::to_string(record)?;
            writeln!(active.writer, "{}", json)?;
        }
        active.writer.flush()?;
        active.records_written += record_count;

        debug!(date = %today, records = record_count, "Flushed journal");
        Ok(())
    }

    pub fn close(&mut self) -> PersistenceResult<()> {
        self.flush()?;
        self.close_active_writer();
        Ok(())
    }
}

impl<T: Serialize> Drop for JsonLinesWriter<T> {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(?e, "Failed to flush journal on drop");
        }
        self.close_active_writer();
    }
}

/// Trade store decorator that journals terminal attempts.
///
/// File writes run on the blocking pool, off the async worker threads.
pub struct JournaledTradeStore {
    inner: Arc<dyn TradeStore>,
    journal: Arc<Mutex<JsonLinesWriter<TradeAttempt>>>,
}

impl JournaledTradeStore {
    pub fn new(inner: Arc<dyn TradeStore>, journal_dir: impl AsRef<Path>) -> Self {
        Self {
            inner,
            journal: Arc::new(Mutex::new(JsonLinesWriter::new(journal_dir, "trades", 1))),
        }
    }

    async fn record(&self, attempt: &TradeAttempt) {
        let journal = Arc::clone(&self.journal);
        let record = attempt.clone();
        match tokio::task::spawn_blocking(move || journal.lock().add_record(record)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(?e, trade_id = %attempt.id, "Failed to journal trade attempt"),
            Err(e) => warn!(?e, trade_id = %attempt.id, "Journal write task failed"),
        }
    }
}

impl TradeStore for JournaledTradeStore {
    fn insert_trade<'a>(
        &'a self,
        attempt: &'a TradeAttempt,
    ) -> BoxFuture<'a, PersistenceResult<()>> {
        Box::pin(async move {
            self.inner.insert_trade(attempt).await?;
            if attempt.is_terminal() {
                self.record(attempt).await;
            }
            Ok(())
        })
    }

    fn finalize_trade<'a>(
        &'a self,
        attempt: &'a TradeAttempt,
    ) -> BoxFuture<'a, PersistenceResult<bool>> {
        Box::pin(async move {
            let updated = self.inner.finalize_trade(attempt).await?;
            if updated {
                self.record(attempt).await;
            }
            Ok(updated)
        })
    }

    fn list_trades<'a>(
        &'a self,
        query: &'a TradeQuery,
    ) -> BoxFuture<'a, PersistenceResult<Vec<TradeAttempt>>> {
        self.inner.list_trades(query)
    }

    fn trade_stats(&self) -> BoxFuture<'_, PersistenceResult<TradeStats>> {
        self.inner.trade_stats()
    }
}
