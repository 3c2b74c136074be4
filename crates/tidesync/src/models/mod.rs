//! Domain models for the sync core

mod session;
mod source;
mod upload;

pub use session::{MAX_WINDOW_MS, SyncSession};
pub use source::{
    BasalScheduleEntry, ManualGlucose, ProfileSwitch, SensorGlucose, TempBasal, Treatment,
};
pub use upload::{
    BasalRecord, BolusRecord, Envelope, GlucoseRecord, ProfileSwitchRecord, ScheduledRate,
    UploadRecord, WizardRecord,
};
