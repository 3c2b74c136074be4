//! Source-store record types
//!
//! These mirror what the local therapy database hands back: raw rows with
//! epoch-millisecond timestamps, before any normalization for upload.

use serde::{Deserialize, Serialize};

/// An insulin and/or carbohydrate treatment entry
///
/// A single treatment row can describe a plain bolus (insulin only), a
/// meal bolus (carbs plus insulin) or a carbs-only entry. Which upload
/// shape it becomes is decided during payload assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Treatment {
    /// When the treatment was delivered (epoch milliseconds)
    pub timestamp: i64,
    /// Insulin delivered, in units
    pub insulin: f64,
    /// Carbohydrates entered, in grams
    pub carbs: f64,
}

impl Treatment {
    pub fn new(timestamp: i64, insulin: f64, carbs: f64) -> Self {
        Self {
            timestamp,
            insulin,
            carbs,
        }
    }
}

/// A finger-stick blood glucose measurement entered by the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualGlucose {
    /// When the test was taken (epoch milliseconds)
    pub timestamp: i64,
    /// Measured value in mg/dL
    pub value: f64,
}

impl ManualGlucose {
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// A continuous glucose monitor reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorGlucose {
    /// When the sensor reported (epoch milliseconds)
    pub timestamp: i64,
    /// Reported value in mg/dL
    pub value: f64,
}

impl SensorGlucose {
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// A temporary basal rate change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TempBasal {
    /// When the rate took effect (epoch milliseconds)
    pub timestamp: i64,
    /// Basal rate in units per hour
    pub rate: f64,
    /// How long the rate applies, in milliseconds
    pub duration_ms: i64,
}

impl TempBasal {
    pub fn new(timestamp: i64, rate: f64, duration_ms: i64) -> Self {
        Self {
            timestamp,
            rate,
            duration_ms,
        }
    }
}

/// One entry of a basal schedule: a rate starting at an offset from midnight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasalScheduleEntry {
    /// Offset from midnight, in milliseconds
    pub start_ms: i64,
    /// Basal rate in units per hour
    pub rate: f64,
}

impl BasalScheduleEntry {
    pub fn new(start_ms: i64, rate: f64) -> Self {
        Self { start_ms, rate }
    }
}

/// A switch to a different therapy profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSwitch {
    /// When the switch happened (epoch milliseconds)
    pub timestamp: i64,
    /// Name of the activated profile
    pub profile_name: String,
    /// Basal schedule of the activated profile
    pub basal_schedule: Vec<BasalScheduleEntry>,
}

impl ProfileSwitch {
    pub fn new(
        timestamp: i64,
        profile_name: impl Into<String>,
        basal_schedule: Vec<BasalScheduleEntry>,
    ) -> Self {
        Self {
            timestamp,
            profile_name: profile_name.into(),
            basal_schedule,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_treatment_roundtrip() {
        let treatment = Treatment::new(1_600_000_000_000, 5.0, 45.0);
        let json = serde_json::to_string(&treatment).unwrap();
        let back: Treatment = serde_json::from_str(&json).unwrap();
        assert_eq!(treatment, back);
    }

    #[test]
    fn test_profile_switch_schedule() {
        let switch = ProfileSwitch::new(
            1_600_000_000_000,
            "Weekend",
            vec![
                BasalScheduleEntry::new(0, 0.8),
                BasalScheduleEntry::new(6 * 3_600_000, 1.1),
            ],
        );
        assert_eq!(switch.basal_schedule.len(), 2);
        assert_eq!(switch.profile_name, "Weekend");
    }
}
