//! The uploader seam
//!
//! The coordinator drives whatever transport implements this trait; the
//! bundled implementation is [`TidepoolClient`](crate::client::TidepoolClient).

use anyhow::Result;

/// Connection lifecycle as the uploader reports it
///
/// The coordinator reads this to pick login-vs-upload; it never writes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// Trait for the remote upload transport
///
/// Implementations own session caching, single-flight enforcement and
/// transport timeouts. All methods are synchronous; callers already run
/// off the UI path.
pub trait Uploader: Send + Sync {
    /// Current connection state
    fn connection_state(&self) -> ConnectionState;

    /// Establish a session. With `force`, an existing session is
    /// discarded and rebuilt.
    fn login(&self, force: bool) -> Result<()>;

    /// Push one serialized record batch to the remote dataset
    fn upload(&self, payload: &str) -> Result<()>;

    /// Delete the remote dataset (full-resync preparation)
    fn delete_dataset(&self) -> Result<()>;

    /// Drop any cached session so the next cycle logs in fresh
    fn invalidate_session(&self);
}
