//! Storage trait definitions

use anyhow::Result;

use crate::models::{ManualGlucose, ProfileSwitch, SensorGlucose, TempBasal, Treatment};

/// Settings keys used by the sync core
///
/// Shared between the coordinator, the watermark and the HTTP client so
/// every component reads the same persisted state.
pub mod keys {
    /// Master toggle for the whole sync plugin
    pub const ENABLED: &str = "tidepool_enabled";
    /// Gate uploads on external power
    pub const ONLY_WHILE_CHARGING: &str = "tidepool_only_while_charging";
    /// Gate uploads on an unmetered network
    pub const ONLY_WHILE_UNMETERED: &str = "tidepool_only_while_unmetered";
    /// Watermark: end of the last uploaded window (epoch milliseconds)
    pub const LAST_END: &str = "tidepool_last_end";
    pub const USERNAME: &str = "tidepool_username";
    pub const PASSWORD: &str = "tidepool_password";
    /// Talk to the integration servers instead of production
    pub const DEV_SERVERS: &str = "tidepool_dev_servers";
}

/// Trait for querying the local therapy record store
///
/// Each query returns the records overlapping `[start, end]` (epoch
/// milliseconds, inclusive) that have not been uploaded yet, ordered by
/// timestamp ascending. The backend owns upload-flag maintenance.
pub trait RecordStore: Send + Sync {
    /// Insulin/carb treatments in the window
    fn treatments(&self, start: i64, end: i64) -> Result<Vec<Treatment>>;

    /// Finger-stick blood glucose tests in the window
    fn manual_glucose(&self, start: i64, end: i64) -> Result<Vec<ManualGlucose>>;

    /// CGM readings in the window
    fn sensor_glucose(&self, start: i64, end: i64) -> Result<Vec<SensorGlucose>>;

    /// Temporary basal changes in the window
    fn basals(&self, start: i64, end: i64) -> Result<Vec<TempBasal>>;

    /// Profile switches in the window
    fn profile_switches(&self, start: i64, end: i64) -> Result<Vec<ProfileSwitch>>;
}

/// Trait for the key-value settings store
///
/// Models the host preference store: reads fall back to the supplied
/// default and writes are fire-and-forget. Backends log internal failures
/// rather than surfacing them; sync must keep running on a broken
/// settings read.
pub trait SettingsStore: Send + Sync {
    fn get_bool(&self, key: &str, default: bool) -> bool;
    fn put_bool(&self, key: &str, value: bool);

    fn get_i64(&self, key: &str, default: i64) -> i64;
    fn put_i64(&self, key: &str, value: i64);

    fn get_string(&self, key: &str, default: &str) -> String;
    fn put_string(&self, key: &str, value: &str);
}
