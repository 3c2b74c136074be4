//! The sync core: window planning, upload coordination and their support
//! pieces (watermark, rate limiter, status log, uploader seam).

mod coordinator;
mod planner;
mod ratelimit;
mod status;
mod uploader;
mod watermark;

pub use coordinator::{
    CoordinatorHandle, DeviceState, NEW_DATA_MIN_INTERVAL_SECS, NEW_DATA_RATE_TAG,
    UploadCoordinator,
};
pub use planner::{PendingChunk, SyncWindowPlanner};
pub use ratelimit::RateLimiter;
pub use status::{MAX_LOG_LINES, StatusLog, StatusLogEntry};
pub use uploader::{ConnectionState, Uploader};
pub use watermark::SyncWatermark;
