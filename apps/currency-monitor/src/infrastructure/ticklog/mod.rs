//! Per-Symbol Tick Log
//!
//! Explicit registry of append-only log files, one per symbol, created on
//! first use and reused afterwards. Each line carries the tick's exchange
//! time in local time:
//!
//! ```text
//! 2020-09-13 12:26:40, btcusdt: 10000.00
//! 2020-09-13 12:26:40, btcusdt: alert sent
//! ```
//!
//! Without a log directory, lines go to `tracing` under the `ticks` target.
//!
//! The registry does blocking file I/O and is owned by the
//! [`TickLogWriter`] thread; the feed only ever talks to the writer.

mod writer;

pub use writer::{DEFAULT_QUEUE_CAPACITY, TickLogWriter};

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};

use crate::domain::monitor::SymbolId;
use crate::domain::tick::TickRecord;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Tick log errors.
#[derive(Debug, thiserror::Error)]
pub enum TickLogError {
    /// The log directory could not be created.
    #[error("failed to create log directory {path}: {source}")]
    CreateDir {
        /// Directory path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A symbol's log file could not be opened.
    #[error("failed to open tick log {path}: {source}")]
    Open {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// Writing a line failed.
    #[error("failed to write tick log: {0}")]
    Write(#[from] std::io::Error),

    /// Symbol id is not usable as a file name.
    #[error("invalid symbol for file name: {0:?}")]
    InvalidSymbol(String),

    /// The writer thread could not be started.
    #[error("failed to start tick log writer: {0}")]
    Spawn(std::io::Error),
}

/// Registry of per-symbol log files.
#[derive(Debug)]
pub struct TickLogRegistry {
    dir: Option<PathBuf>,
    writers: HashMap<String, BufWriter<File>>,
}

impl TickLogRegistry {
    /// Registry writing `<dir>/<symbol>.log` files.
    ///
    /// # Errors
    ///
    /// Returns `CreateDir` if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, TickLogError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| TickLogError::CreateDir {
            path: dir.clone(),
            source,
        })?;

        Ok(Self {
            dir: Some(dir),
            writers: HashMap::new(),
        })
    }

    /// Registry that only emits `tracing` events.
    #[must_use]
    pub fn tracing_only() -> Self {
        Self {
            dir: None,
            writers: HashMap::new(),
        }
    }

    /// Log file path for a symbol, if file logging is enabled.
    #[must_use]
    pub fn path_for(&self, symbol: &str) -> Option<PathBuf> {
        self.dir.as_deref().map(|dir| dir.join(format!("{symbol}.log")))
    }

    /// Symbols with an open log file.
    #[must_use]
    pub fn open_symbols(&self) -> usize {
        self.writers.len()
    }

    /// Append one line to a symbol's log. The line is buffered until
    /// [`flush`](Self::flush).
    ///
    /// # Errors
    ///
    /// Returns an error if the symbol is not a plain file name, or the file
    /// cannot be opened or written.
    pub fn append(&mut self, symbol: &str, line: &str) -> Result<(), TickLogError> {
        let Some(dir) = self.dir.as_deref() else {
            tracing::info!(target: "ticks", "{line}");
            return Ok(());
        };

        if !is_safe_file_stem(symbol) {
            return Err(TickLogError::InvalidSymbol(symbol.to_string()));
        }

        if !self.writers.contains_key(symbol) {
            let writer = open_append(dir, symbol)?;
            tracing::debug!(symbol, "Tick log opened");
            self.writers.insert(symbol.to_string(), writer);
        }

        if let Some(writer) = self.writers.get_mut(symbol) {
            writeln!(writer, "{line}")?;
        }
        Ok(())
    }

    /// Flush every open log file.
    ///
    /// # Errors
    ///
    /// Returns the first write error; the remaining files are still flushed.
    pub fn flush(&mut self) -> Result<(), TickLogError> {
        let mut first_error = None;
        for writer in self.writers.values_mut() {
            if let Err(e) = writer.flush() {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), |e| Err(TickLogError::Write(e)))
    }

    /// Close the log files of symbols not in `symbols`. Returns how many
    /// files were closed.
    pub fn retain_symbols(&mut self, symbols: &[SymbolId]) -> usize {
        let before = self.writers.len();
        self.writers.retain(|symbol, writer| {
            let keep = symbols.iter().any(|s| s == symbol);
            if !keep && let Err(e) = writer.flush() {
                tracing::warn!(symbol = %symbol, error = %e, "Tick log flush failed on close");
            }
            keep
        });
        before - self.writers.len()
    }
}

/// Log line for a tick.
#[must_use]
pub fn tick_line(tick: &TickRecord, price: &str) -> String {
    format!("{}, {}: {price}", local_time(tick.timestamp), tick.symbol)
}

/// Log line for an alert decision.
#[must_use]
pub fn alert_line(symbol: &str, timestamp: DateTime<Utc>, outcome: &str) -> String {
    format!("{}, {symbol}: {outcome}", local_time(timestamp))
}

fn open_append(dir: &Path, symbol: &str) -> Result<BufWriter<File>, TickLogError> {
    let path = dir.join(format!("{symbol}.log"));
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map(BufWriter::new)
        .map_err(|source| TickLogError::Open { path, source })
}

fn local_time(timestamp: DateTime<Utc>) -> String {
    timestamp
        .with_timezone(&Local)
        .format(TIMESTAMP_FORMAT)
        .to_string()
}

fn is_safe_file_stem(symbol: &str) -> bool {
    !symbol.is_empty()
        && symbol
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}
