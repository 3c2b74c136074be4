//! In-memory storage implementation
//!
//! Used for testing and as a stub while a host database integration is
//! not wired up. Rows carry an uploaded flag so selection behaves like
//! the durable backend.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;

use super::traits::{RecordStore, SettingsStore};
use crate::models::{ManualGlucose, ProfileSwitch, SensorGlucose, TempBasal, Treatment};

struct Row<T> {
    record: T,
    uploaded: bool,
}

impl<T> Row<T> {
    fn new(record: T) -> Self {
        Self {
            record,
            uploaded: false,
        }
    }
}

/// In-memory implementation of RecordStore
pub struct InMemoryRecordStore {
    treatments: RwLock<Vec<Row<Treatment>>>,
    manual_glucose: RwLock<Vec<Row<ManualGlucose>>>,
    sensor_glucose: RwLock<Vec<Row<SensorGlucose>>>,
    basals: RwLock<Vec<Row<TempBasal>>>,
    profile_switches: RwLock<Vec<Row<ProfileSwitch>>>,
}

/// Select unuploaded records inside the window, oldest first
fn select<T: Clone>(
    rows: &RwLock<Vec<Row<T>>>,
    start: i64,
    end: i64,
    timestamp: impl Fn(&T) -> i64,
) -> Vec<T> {
    let rows = rows.read().unwrap();
    let mut selected: Vec<T> = rows
        .iter()
        .filter(|row| !row.uploaded)
        .map(|row| &row.record)
        .filter(|record| {
            let ts = timestamp(record);
            ts >= start && ts <= end
        })
        .cloned()
        .collect();
    selected.sort_by_key(&timestamp);
    selected
}

fn mark<T>(rows: &RwLock<Vec<Row<T>>>, end: i64, timestamp: impl Fn(&T) -> i64) {
    let mut rows = rows.write().unwrap();
    for row in rows.iter_mut() {
        if timestamp(&row.record) <= end {
            row.uploaded = true;
        }
    }
}

impl InMemoryRecordStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            treatments: RwLock::new(Vec::new()),
            manual_glucose: RwLock::new(Vec::new()),
            sensor_glucose: RwLock::new(Vec::new()),
            basals: RwLock::new(Vec::new()),
            profile_switches: RwLock::new(Vec::new()),
        }
    }

    pub fn add_treatment(&self, treatment: Treatment) {
        self.treatments.write().unwrap().push(Row::new(treatment));
    }

    pub fn add_manual_glucose(&self, reading: ManualGlucose) {
        self.manual_glucose.write().unwrap().push(Row::new(reading));
    }

    pub fn add_sensor_glucose(&self, reading: SensorGlucose) {
        self.sensor_glucose.write().unwrap().push(Row::new(reading));
    }

    pub fn add_basal(&self, basal: TempBasal) {
        self.basals.write().unwrap().push(Row::new(basal));
    }

    pub fn add_profile_switch(&self, switch: ProfileSwitch) {
        self.profile_switches
            .write()
            .unwrap()
            .push(Row::new(switch));
    }

    /// Flag every record at or before `end` as uploaded
    ///
    /// Flagged records no longer appear in window selections.
    pub fn mark_uploaded_through(&self, end: i64) {
        mark(&self.treatments, end, |t| t.timestamp);
        mark(&self.manual_glucose, end, |g| g.timestamp);
        mark(&self.sensor_glucose, end, |g| g.timestamp);
        mark(&self.basals, end, |b| b.timestamp);
        mark(&self.profile_switches, end, |p| p.timestamp);
    }
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStore for InMemoryRecordStore {
    fn treatments(&self, start: i64, end: i64) -> Result<Vec<Treatment>> {
        Ok(select(&self.treatments, start, end, |t| t.timestamp))
    }

    fn manual_glucose(&self, start: i64, end: i64) -> Result<Vec<ManualGlucose>> {
        Ok(select(&self.manual_glucose, start, end, |g| g.timestamp))
    }

    fn sensor_glucose(&self, start: i64, end: i64) -> Result<Vec<SensorGlucose>> {
        Ok(select(&self.sensor_glucose, start, end, |g| g.timestamp))
    }

    fn basals(&self, start: i64, end: i64) -> Result<Vec<TempBasal>> {
        Ok(select(&self.basals, start, end, |b| b.timestamp))
    }

    fn profile_switches(&self, start: i64, end: i64) -> Result<Vec<ProfileSwitch>> {
        Ok(select(&self.profile_switches, start, end, |p| p.timestamp))
    }
}

/// In-memory implementation of SettingsStore
///
/// Typed values live in separate maps, mirroring the host preference
/// store's per-type accessors.
pub struct InMemorySettingsStore {
    bools: RwLock<HashMap<String, bool>>,
    ints: RwLock<HashMap<String, i64>>,
    strings: RwLock<HashMap<String, String>>,
}

impl InMemorySettingsStore {
    pub fn new() -> Self {
        Self {
            bools: RwLock::new(HashMap::new()),
            ints: RwLock::new(HashMap::new()),
            strings: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemorySettingsStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsStore for InMemorySettingsStore {
    fn get_bool(&self, key: &str, default: bool) -> bool {
        *self.bools.read().unwrap().get(key).unwrap_or(&default)
    }

    fn put_bool(&self, key: &str, value: bool) {
        self.bools.write().unwrap().insert(key.to_string(), value);
    }

    fn get_i64(&self, key: &str, default: i64) -> i64 {
        *self.ints.read().unwrap().get(key).unwrap_or(&default)
    }

    fn put_i64(&self, key: &str, value: i64) {
        self.ints.write().unwrap().insert(key.to_string(), value);
    }

    fn get_string(&self, key: &str, default: &str) -> String {
        self.strings
            .read()
            .unwrap()
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    fn put_string(&self, key: &str, value: &str) {
        self.strings
            .write()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_is_ordered_and_inclusive() {
        let store = InMemoryRecordStore::new();
        store.add_sensor_glucose(SensorGlucose::new(3_000, 90.0));
        store.add_sensor_glucose(SensorGlucose::new(1_000, 100.0));
        store.add_sensor_glucose(SensorGlucose::new(2_000, 95.0));
        store.add_sensor_glucose(SensorGlucose::new(4_000, 92.0));

        let selected = store.sensor_glucose(1_000, 3_000).unwrap();
        assert_eq!(selected.len(), 3);
        assert_eq!(selected[0].timestamp, 1_000);
        assert_eq!(selected[2].timestamp, 3_000);
    }

    #[test]
    fn test_uploaded_records_are_excluded() {
        let store = InMemoryRecordStore::new();
        store.add_treatment(Treatment::new(1_000, 2.0, 0.0));
        store.add_treatment(Treatment::new(5_000, 3.0, 0.0));

        store.mark_uploaded_through(2_000);

        let selected = store.treatments(0, 10_000).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].timestamp, 5_000);
    }

    #[test]
    fn test_settings_defaults() {
        let settings = InMemorySettingsStore::new();
        assert!(!settings.get_bool("missing", false));
        assert!(settings.get_bool("missing", true));
        assert_eq!(settings.get_i64("missing", 42), 42);
        assert_eq!(settings.get_string("missing", "fallback"), "fallback");
    }

    #[test]
    fn test_settings_roundtrip() {
        let settings = InMemorySettingsStore::new();
        settings.put_bool("flag", true);
        settings.put_i64("count", 7);
        settings.put_string("name", "primary");

        assert!(settings.get_bool("flag", false));
        assert_eq!(settings.get_i64("count", 0), 7);
        assert_eq!(settings.get_string("name", ""), "primary");
    }
}
