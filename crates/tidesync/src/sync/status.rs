//! Bounded status log
//!
//! Human-readable sync progress lines with FIFO eviction. Rendering to a
//! display string is on demand and must not take the component down: a
//! failed allocation keeps the previously rendered text.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use log::warn;

/// Maximum entries the status log retains
pub const MAX_LOG_LINES: usize = 30;

/// One timestamped status message
#[derive(Debug, Clone)]
pub struct StatusLogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl StatusLogEntry {
    /// Create an entry stamped with the current time
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
        }
    }

    /// Single display line, `HH:MM:SS message`
    pub fn display_line(&self) -> String {
        format!("{} {}", self.timestamp.format("%H:%M:%S"), self.message)
    }
}

struct LogInner {
    entries: VecDeque<StatusLogEntry>,
    rendered: String,
}

/// Capacity-bounded FIFO log of status entries
///
/// One mutex guards the whole append/iterate/evict cycle; producers
/// append while the UI side renders.
pub struct StatusLog {
    capacity: usize,
    inner: Mutex<LogInner>,
}

impl StatusLog {
    pub fn new() -> Self {
        Self::with_capacity(MAX_LOG_LINES)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(LogInner {
                entries: VecDeque::with_capacity(capacity),
                rendered: String::new(),
            }),
        }
    }

    /// Append an entry, evicting the oldest when full
    pub fn append(&self, entry: StatusLogEntry) {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.push_back(entry);
        while inner.entries.len() > self.capacity {
            inner.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().entries.is_empty()
    }

    /// Snapshot of the current entries, oldest first
    pub fn entries(&self) -> Vec<StatusLogEntry> {
        self.inner.lock().unwrap().entries.iter().cloned().collect()
    }

    /// Render the log to one display string, oldest line first
    ///
    /// If the text buffer cannot be allocated the previous rendering is
    /// returned unchanged and a warning is emitted; the log itself is
    /// untouched.
    pub fn render(&self) -> String {
        let mut inner = self.inner.lock().unwrap();

        let lines: Vec<String> = inner.entries.iter().map(|e| e.display_line()).collect();
        let required: usize = lines.iter().map(|line| line.len() + 1).sum();

        let mut text = String::new();
        if let Err(e) = text.try_reserve_exact(required) {
            warn!("Out of memory rendering status log, keeping previous text: {}", e);
            return inner.rendered.clone();
        }
        for line in &lines {
            text.push_str(line);
            text.push('\n');
        }

        inner.rendered = text;
        inner.rendered.clone()
    }
}

impl Default for StatusLog {
    fn default() -> Self {
        Self::new()
    }
}
