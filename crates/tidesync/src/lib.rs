//! tidesync - Incremental Tidepool synchronization core
//!
//! This crate provides platform-independent upload logic including:
//! - Domain models (source records, normalized upload records)
//! - Storage trait abstractions with in-memory and SQLite backends
//! - Windowed, watermark-driven sync planning
//! - Event-driven upload coordination with policy gates and rate limiting
//! - Tidepool HTTP uploader
//!
//! The host application supplies the record data, the device-state
//! oracle and the trigger events; everything else lives here. This crate
//! has zero UI dependencies.

pub mod client;
pub mod config;
pub mod events;
pub mod models;
pub mod store;
pub mod sync;

pub use client::{ClientError, TidepoolClient};
pub use config::TidepoolCredentials;
pub use events::{EventBus, Subscription, UploadEvent};
pub use models::{
    BasalScheduleEntry, MAX_WINDOW_MS, ManualGlucose, ProfileSwitch, SensorGlucose, SyncSession,
    TempBasal, Treatment, UploadRecord,
};
pub use store::{
    InMemoryRecordStore, InMemorySettingsStore, RecordStore, SettingsStore, SqliteStore, keys,
};
pub use sync::{
    // Coordination
    ConnectionState, CoordinatorHandle, DeviceState, UploadCoordinator, Uploader,
    // Window planning
    PendingChunk, SyncWatermark, SyncWindowPlanner,
    // Support pieces
    MAX_LOG_LINES, RateLimiter, StatusLog, StatusLogEntry,
};
