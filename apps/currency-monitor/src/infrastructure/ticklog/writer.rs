//! Background Tick Log Writer
//!
//! Keeps file I/O off the feed's receive loop. Lines go onto a bounded
//! queue with `try_send`; a dedicated thread owns the [`TickLogRegistry`],
//! writes whatever is queued and flushes once the queue runs dry. When the
//! queue is full the line is dropped and counted rather than stalling the
//! socket.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};

use crate::application::ports::TickSink;
use crate::domain::monitor::SymbolId;
use crate::domain::tick::TickRecord;
use crate::infrastructure::metrics;

use super::{TickLogError, TickLogRegistry, alert_line, tick_line};

/// Lines that may wait for the writer thread before new ones are dropped.
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

#[derive(Debug)]
enum WriterCommand {
    Append { symbol: String, line: String },
    Retain(Vec<SymbolId>),
    Flush(oneshot::Sender<usize>),
}

/// Queue-backed [`TickSink`] in front of a [`TickLogRegistry`].
///
/// Cloning shares the queue. The writer thread stops once every clone has
/// been dropped.
#[derive(Debug, Clone)]
pub struct TickLogWriter {
    tx: mpsc::Sender<WriterCommand>,
    dropped: Arc<AtomicU64>,
}

impl TickLogWriter {
    /// Start the writer thread with the default queue capacity.
    ///
    /// # Errors
    ///
    /// Returns `Spawn` if the thread cannot be started.
    pub fn spawn(registry: TickLogRegistry) -> Result<Self, TickLogError> {
        Self::with_capacity(registry, DEFAULT_QUEUE_CAPACITY)
    }

    /// Start the writer thread with a custom queue capacity (at least 1).
    ///
    /// # Errors
    ///
    /// Returns `Spawn` if the thread cannot be started.
    pub fn with_capacity(
        registry: TickLogRegistry,
        capacity: usize,
    ) -> Result<Self, TickLogError> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        thread::Builder::new()
            .name("tick-log".to_string())
            .spawn(move || write_loop(registry, rx))
            .map_err(TickLogError::Spawn)?;

        Ok(Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Lines dropped because the queue was full or the thread had stopped.
    #[must_use]
    pub fn dropped_lines(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Wait until every line queued before this call has been written and
    /// flushed.
    ///
    /// Returns the number of open log files, or `None` if the writer thread
    /// has stopped.
    pub async fn flush(&self) -> Option<usize> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(WriterCommand::Flush(reply_tx)).await.ok()?;
        reply_rx.await.ok()
    }

    fn enqueue(&self, symbol: &str, line: String) {
        let command = WriterCommand::Append {
            symbol: symbol.to_string(),
            line,
        };
        match self.tx.try_send(command) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let previous = self.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::record_tick_log_dropped();
                if previous == 0 {
                    tracing::warn!(symbol, "Tick log queue full, dropping lines");
                }
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::record_tick_log_dropped();
                tracing::debug!(symbol, "Tick log writer stopped, line dropped");
            }
        }
    }
}

impl TickSink for TickLogWriter {
    fn record_tick(&self, tick: &TickRecord, price: &str) {
        self.enqueue(&tick.symbol, tick_line(tick, price));
    }

    fn record_alert(&self, symbol: &str, timestamp: DateTime<Utc>, outcome: &str) {
        self.enqueue(symbol, alert_line(symbol, timestamp, outcome));
    }

    fn retain_symbols(&self, symbols: &[SymbolId]) {
        if self
            .tx
            .try_send(WriterCommand::Retain(symbols.to_vec()))
            .is_err()
        {
            tracing::warn!("Tick log writer busy, removed symbols keep their files open");
        }
    }
}

fn write_loop(mut registry: TickLogRegistry, mut rx: mpsc::Receiver<WriterCommand>) {
    tracing::debug!("Tick log writer started");

    while let Some(command) = rx.blocking_recv() {
        match command {
            WriterCommand::Append { symbol, line } => {
                if let Err(e) = registry.append(&symbol, &line) {
                    tracing::warn!(symbol, error = %e, "Tick log write failed");
                }
            }
            WriterCommand::Retain(symbols) => {
                let closed = registry.retain_symbols(&symbols);
                if closed > 0 {
                    tracing::debug!(closed, "Tick logs closed for removed symbols");
                }
            }
            WriterCommand::Flush(reply) => {
                flush_or_warn(&mut registry);
                let _ = reply.send(registry.open_symbols());
                continue;
            }
        }

        if rx.is_empty() {
            flush_or_warn(&mut registry);
        }
    }

    flush_or_warn(&mut registry);
    tracing::debug!("Tick log writer stopped");
}

fn flush_or_warn(registry: &mut TickLogRegistry) {
    if let Err(e) = registry.flush() {
        tracing::warn!(error = %e, "Tick log flush failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    use rust_decimal::Decimal;
    use tempfile::TempDir;

    fn tick(symbol: &str) -> TickRecord {
        TickRecord::new(
            symbol,
            Decimal::from_str("250.5").unwrap(),
            Some(1_600_000_000_000),
            Utc::now(),
        )
    }

    fn read_lines(dir: &TempDir, symbol: &str) -> Vec<String> {
        std::fs::read_to_string(dir.path().join(format!("{symbol}.log")))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[tokio::test]
    async fn queued_lines_reach_disk_after_flush() {
        let dir = TempDir::new().unwrap();
        let writer = TickLogWriter::spawn(TickLogRegistry::open(dir.path()).unwrap()).unwrap();
        let eth = tick("ethusdt");

        writer.record_tick(&eth, "250.50");
        writer.record_alert("ethusdt", eth.timestamp, "alert sent");

        assert_eq!(writer.flush().await, Some(1));
        let lines = read_lines(&dir, "ethusdt");
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(", ethusdt: 250.50"));
        assert!(lines[1].ends_with(", ethusdt: alert sent"));
        assert_eq!(writer.dropped_lines(), 0);
    }

    #[tokio::test]
    async fn retain_closes_files_of_removed_symbols() {
        let dir = TempDir::new().unwrap();
        let writer = TickLogWriter::spawn(TickLogRegistry::open(dir.path()).unwrap()).unwrap();

        writer.record_tick(&tick("btcusdt"), "1.00");
        writer.record_tick(&tick("ethusdt"), "2.00");
        assert_eq!(writer.flush().await, Some(2));

        writer.retain_symbols(&["btcusdt".to_string()]);
        assert_eq!(writer.flush().await, Some(1));
        assert_eq!(read_lines(&dir, "ethusdt").len(), 1);
    }

    #[test]
    fn full_queue_drops_instead_of_blocking() {
        // Nobody drains this queue.
        let (tx, _rx) = mpsc::channel(1);
        let writer = TickLogWriter {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        };

        writer.record_tick(&tick("btcusdt"), "1.00");
        writer.record_tick(&tick("btcusdt"), "2.00");
        writer.record_tick(&tick("btcusdt"), "3.00");

        assert_eq!(writer.dropped_lines(), 2);
    }

    #[tokio::test]
    async fn writer_stops_when_every_clone_is_dropped() {
        let (tx, rx) = mpsc::channel(4);
        let handle = thread::spawn(move || write_loop(TickLogRegistry::tracing_only(), rx));
        let writer = TickLogWriter {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        let clone = writer.clone();

        clone.record_tick(&tick("btcusdt"), "1.00");
        drop(writer);
        drop(clone);

        tokio::task::spawn_blocking(move || handle.join())
            .await
            .unwrap()
            .expect("writer thread should exit cleanly");
    }
}
