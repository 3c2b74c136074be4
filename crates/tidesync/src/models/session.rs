//! Sync window value object

/// Widest window a single upload may cover: 7 days in milliseconds.
///
/// The remote service rejects larger submissions, so the planner clamps
/// every window to this span.
pub const MAX_WINDOW_MS: i64 = 7 * 24 * 60 * 60 * 1000;

/// One sync attempt's time window, `[start, end]` in epoch milliseconds
///
/// Created fresh per upload cycle and never persisted; the durable cursor
/// is the watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSession {
    pub start: i64,
    pub end: i64,
}

impl SyncSession {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Span of the window in milliseconds
    pub fn duration_ms(&self) -> i64 {
        self.end - self.start
    }
}
