//! Normalized upload record shapes
//!
//! Converts source-store rows into the envelope shapes the remote service
//! expects. Serialization must stay byte-stable for identical input: the
//! remote deduplicates resubmissions by content, so field order is fixed by
//! struct declaration and the one map involved is a `BTreeMap`.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use super::source::{ManualGlucose, ProfileSwitch, SensorGlucose, TempBasal, Treatment};

/// Glucose unit reported to the remote service; the store is mg/dL native.
const BG_UNITS: &str = "mg/dL";

/// Common envelope fields shared by every upload record
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub device_time: String,
    pub time: String,
    pub timezone_offset: i32,
}

impl Envelope {
    /// Build the envelope for a record at the given epoch-millisecond time.
    ///
    /// Timestamps are normalized to UTC, so the offset is always zero.
    fn at(timestamp_ms: i64) -> Self {
        let dt = DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
            .unwrap_or(DateTime::UNIX_EPOCH);
        Self {
            device_time: dt.format("%Y-%m-%dT%H:%M:%S").to_string(),
            time: dt.to_rfc3339_opts(SecondsFormat::Millis, true),
            timezone_offset: 0,
        }
    }
}

/// A normalized record ready for upload
///
/// Tagged by the remote schema's `type` field. Immutable once constructed.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum UploadRecord {
    #[serde(rename = "bolus")]
    Bolus(BolusRecord),
    #[serde(rename = "wizard")]
    Wizard(WizardRecord),
    #[serde(rename = "smbg")]
    BloodGlucoseManual(GlucoseRecord),
    #[serde(rename = "cbg")]
    SensorGlucose(GlucoseRecord),
    #[serde(rename = "basal")]
    Basal(BasalRecord),
    #[serde(rename = "pumpSettings")]
    ProfileSwitch(ProfileSwitchRecord),
}

impl UploadRecord {
    /// Normalize a treatment row, deciding its upload shape
    ///
    /// A treatment with carbs becomes a wizard entry (carrying its bolus),
    /// a treatment with insulin only becomes a plain bolus, and a treatment
    /// with neither is dropped.
    pub fn from_treatment(treatment: &Treatment) -> Option<Self> {
        if treatment.carbs > 0.0 {
            Some(Self::Wizard(WizardRecord::from_treatment(treatment)))
        } else if treatment.insulin > 0.0 {
            Some(Self::Bolus(BolusRecord::from_treatment(treatment)))
        } else {
            None
        }
    }

    pub fn from_manual_glucose(reading: &ManualGlucose) -> Self {
        Self::BloodGlucoseManual(GlucoseRecord {
            envelope: Envelope::at(reading.timestamp),
            sub_type: Some("manual".to_string()),
            value: reading.value,
            units: BG_UNITS.to_string(),
        })
    }

    pub fn from_sensor_glucose(reading: &SensorGlucose) -> Self {
        Self::SensorGlucose(GlucoseRecord {
            envelope: Envelope::at(reading.timestamp),
            sub_type: None,
            value: reading.value,
            units: BG_UNITS.to_string(),
        })
    }

    pub fn from_basal(basal: &TempBasal) -> Self {
        Self::Basal(BasalRecord {
            envelope: Envelope::at(basal.timestamp),
            delivery_type: "temp".to_string(),
            rate: basal.rate,
            duration: basal.duration_ms,
        })
    }

    pub fn from_profile_switch(switch: &ProfileSwitch) -> Self {
        let rates = switch
            .basal_schedule
            .iter()
            .map(|entry| ScheduledRate {
                start: entry.start_ms,
                rate: entry.rate,
            })
            .collect();

        let mut schedules = BTreeMap::new();
        schedules.insert(switch.profile_name.clone(), rates);

        Self::ProfileSwitch(ProfileSwitchRecord {
            envelope: Envelope::at(switch.timestamp),
            active_schedule: switch.profile_name.clone(),
            basal_schedules: schedules,
        })
    }
}

/// Insulin bolus delivery
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BolusRecord {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub sub_type: String,
    /// Insulin delivered, in units
    pub normal: f64,
}

impl BolusRecord {
    fn from_treatment(treatment: &Treatment) -> Self {
        Self {
            envelope: Envelope::at(treatment.timestamp),
            sub_type: "normal".to_string(),
            normal: treatment.insulin,
        }
    }
}

/// Meal-bolus calculator entry: carb input plus the delivered bolus
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WizardRecord {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub units: String,
    pub carb_input: f64,
    /// The bolus delivered alongside the carb entry
    pub bolus: Box<UploadRecord>,
}

impl WizardRecord {
    fn from_treatment(treatment: &Treatment) -> Self {
        Self {
            envelope: Envelope::at(treatment.timestamp),
            units: BG_UNITS.to_string(),
            carb_input: treatment.carbs,
            bolus: Box::new(UploadRecord::Bolus(BolusRecord::from_treatment(treatment))),
        }
    }
}

/// Blood glucose value, manual (`smbg`) or sensor (`cbg`)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlucoseRecord {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_type: Option<String>,
    pub value: f64,
    pub units: String,
}

/// Temporary basal rate
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BasalRecord {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub delivery_type: String,
    /// Units per hour
    pub rate: f64,
    /// Milliseconds
    pub duration: i64,
}

/// Pump settings snapshot taken at a profile switch
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSwitchRecord {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub active_schedule: String,
    pub basal_schedules: BTreeMap<String, Vec<ScheduledRate>>,
}

/// One slot of an uploaded basal schedule
#[derive(Debug, Clone, Serialize)]
pub struct ScheduledRate {
    /// Offset from midnight, milliseconds
    pub start: i64,
    /// Units per hour
    pub rate: f64,
}
