//! Persisted sync progress cursor

use std::sync::Arc;

use log::debug;

use crate::store::{SettingsStore, keys};

/// The durable watermark: end of the most recently uploaded window
///
/// Persisted in the settings store so progress survives restarts. Under
/// normal operation it only moves forward; the two sanctioned exceptions
/// are an explicit [`reset`](Self::reset) and the coordinator pulling it
/// back for a backdated record.
#[derive(Clone)]
pub struct SyncWatermark {
    settings: Arc<dyn SettingsStore>,
}

impl SyncWatermark {
    pub fn new(settings: Arc<dyn SettingsStore>) -> Self {
        Self { settings }
    }

    /// Current watermark, 0 when nothing has been uploaded yet
    pub fn get(&self) -> i64 {
        self.settings.get_i64(keys::LAST_END, 0)
    }

    /// Move the watermark to `timestamp` (epoch milliseconds)
    pub fn set(&self, timestamp: i64) {
        debug!("watermark -> {}", timestamp);
        self.settings.put_i64(keys::LAST_END, timestamp);
    }

    /// Reset to 0, forcing a full resync from the beginning of history
    pub fn reset(&self) {
        self.set(0);
    }
}
