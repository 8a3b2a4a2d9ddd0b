//! Bounded in-memory event log
//!
//! Timestamped line buffer with an expiry window and a byte budget. Each
//! entry is costed at 64 bytes of overhead plus the line length. The log is
//! a diagnostic surface (it rides along in archive snapshots); it is not a
//! replacement for `tracing` output.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Fixed per-entry cost added to the line length
const ENTRY_OVERHEAD: usize = 64;

/// Event log configuration
#[derive(Clone, Copy, Debug)]
pub struct EventLogConfig {
    /// Entries older than this are dropped on each append; zero means never
    pub expiry: Duration,
    /// Total byte budget (`64 + line.len()` per entry); zero means do not store
    pub limit_bytes: usize,
}

#[derive(Debug)]
struct Entry {
    at: SystemTime,
    line: String,
}

impl Entry {
    fn cost(&self) -> usize {
        ENTRY_OVERHEAD + self.line.len()
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: VecDeque<Entry>,
    bytes: usize,
}

/// Bounded, expiry-governed event log
#[derive(Debug)]
pub struct EventLog {
    config: EventLogConfig,
    inner: Mutex<Inner>,
}

impl EventLog {
    pub fn new(config: EventLogConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Append a line, then enforce expiry and the byte budget.
    ///
    /// A line whose entry alone exceeds the byte budget is silently
    /// discarded.
    pub fn append(&self, line: impl Into<String>) {
        if self.config.limit_bytes == 0 {
            return;
        }
        let entry = Entry {
            at: SystemTime::now(),
            line: line.into(),
        };
        if entry.cost() > self.config.limit_bytes {
            return;
        }

        let mut inner = self.inner.lock();
        inner.bytes += entry.cost();
        inner.entries.push_back(entry);

        if !self.config.expiry.is_zero() {
            let cutoff = SystemTime::now()
                .checked_sub(self.config.expiry)
                .unwrap_or(UNIX_EPOCH);
            while inner.entries.front().is_some_and(|e| e.at < cutoff) {
                if let Some(dropped) = inner.entries.pop_front() {
                    inner.bytes -= dropped.cost();
                }
            }
        }
        while inner.bytes > self.config.limit_bytes {
            let Some(dropped) = inner.entries.pop_front() else {
                break;
            };
            inner.bytes -= dropped.cost();
        }
    }

    /// Newline-separated stringification in insertion order
    pub fn dump(&self) -> String {
        let inner = self.inner.lock();
        let mut out = String::with_capacity(inner.bytes);
        for entry in &inner.entries {
            let unix = entry
                .at
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            out.push_str(&format!("[{unix}] {}\n", entry.line));
        }
        out
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current byte accounting, for the budget invariant
    pub fn stored_bytes(&self) -> usize {
        self.inner.lock().bytes
    }
}
