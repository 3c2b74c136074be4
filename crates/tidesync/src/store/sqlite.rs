//! SQLite-backed record and settings storage

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use log::warn;
use rusqlite::{Connection, OptionalExtension, params};
use rusqlite_migration::{M, Migrations};

use super::traits::{RecordStore, SettingsStore};
use crate::models::{
    BasalScheduleEntry, ManualGlucose, ProfileSwitch, SensorGlucose, TempBasal, Treatment,
};

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            -- Key-value settings (feature toggles, credentials, watermark)
            CREATE TABLE settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            -- Insulin/carb treatments
            CREATE TABLE treatments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                insulin REAL NOT NULL DEFAULT 0,
                carbs REAL NOT NULL DEFAULT 0,
                uploaded INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX idx_treatments_ts ON treatments(timestamp);

            -- Finger-stick blood glucose tests
            CREATE TABLE manual_glucose (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                value REAL NOT NULL,
                uploaded INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX idx_manual_glucose_ts ON manual_glucose(timestamp);

            -- CGM readings
            CREATE TABLE sensor_glucose (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                value REAL NOT NULL,
                uploaded INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX idx_sensor_glucose_ts ON sensor_glucose(timestamp);

            -- Temporary basal changes
            CREATE TABLE temp_basals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                rate REAL NOT NULL,
                duration_ms INTEGER NOT NULL,
                uploaded INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX idx_temp_basals_ts ON temp_basals(timestamp);

            -- Profile switches; basal_schedule is a JSON array
            CREATE TABLE profile_switches (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                profile_name TEXT NOT NULL,
                basal_schedule TEXT NOT NULL DEFAULT '[]',
                uploaded INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX idx_profile_switches_ts ON profile_switches(timestamp);
            "#,
        ),
    ])
}

/// SQLite-backed store implementing both RecordStore and SettingsStore
///
/// Record rows carry an `uploaded` flag; window selections only return
/// rows still awaiting upload.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at the given path
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        // WAL for concurrent readers during writes, NORMAL sync is safe
        // under WAL, foreign_keys for referential integrity.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA foreign_keys = ON;
            "#,
        )?;

        // Run migrations
        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn add_treatment(&self, treatment: &Treatment) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO treatments (timestamp, insulin, carbs) VALUES (?, ?, ?)",
            params![treatment.timestamp, treatment.insulin, treatment.carbs],
        )?;
        Ok(())
    }

    pub fn add_manual_glucose(&self, reading: &ManualGlucose) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO manual_glucose (timestamp, value) VALUES (?, ?)",
            params![reading.timestamp, reading.value],
        )?;
        Ok(())
    }

    pub fn add_sensor_glucose(&self, reading: &SensorGlucose) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO sensor_glucose (timestamp, value) VALUES (?, ?)",
            params![reading.timestamp, reading.value],
        )?;
        Ok(())
    }

    pub fn add_basal(&self, basal: &TempBasal) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO temp_basals (timestamp, rate, duration_ms) VALUES (?, ?, ?)",
            params![basal.timestamp, basal.rate, basal.duration_ms],
        )?;
        Ok(())
    }

    pub fn add_profile_switch(&self, switch: &ProfileSwitch) -> Result<()> {
        let schedule = serde_json::to_string(&switch.basal_schedule)
            .context("Failed to serialize basal schedule")?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO profile_switches (timestamp, profile_name, basal_schedule)
             VALUES (?, ?, ?)",
            params![switch.timestamp, switch.profile_name, schedule],
        )?;
        Ok(())
    }

    /// Flag every record at or before `end` as uploaded
    pub fn mark_uploaded_through(&self, end: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        for table in [
            "treatments",
            "manual_glucose",
            "sensor_glucose",
            "temp_basals",
            "profile_switches",
        ] {
            conn.execute(
                &format!("UPDATE {table} SET uploaded = 1 WHERE timestamp <= ?"),
                [end],
            )?;
        }
        Ok(())
    }

    fn get_setting(&self, key: &str) -> Option<String> {
        let conn = self.conn.lock().unwrap();
        match conn
            .query_row("SELECT value FROM settings WHERE key = ?", [key], |row| {
                row.get(0)
            })
            .optional()
        {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to read setting {}: {}", key, e);
                None
            }
        }
    }

    fn put_setting(&self, key: &str, value: &str) {
        let conn = self.conn.lock().unwrap();
        let result = conn.execute(
            "INSERT INTO settings (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        );
        if let Err(e) = result {
            warn!("Failed to write setting {}: {}", key, e);
        }
    }
}

impl RecordStore for SqliteStore {
    fn treatments(&self, start: i64, end: i64) -> Result<Vec<Treatment>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT timestamp, insulin, carbs FROM treatments
             WHERE timestamp >= ? AND timestamp <= ? AND uploaded = 0
             ORDER BY timestamp ASC",
        )?;
        let treatments = stmt
            .query_map(params![start, end], |row| {
                Ok(Treatment {
                    timestamp: row.get(0)?,
                    insulin: row.get(1)?,
                    carbs: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(treatments)
    }

    fn manual_glucose(&self, start: i64, end: i64) -> Result<Vec<ManualGlucose>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT timestamp, value FROM manual_glucose
             WHERE timestamp >= ? AND timestamp <= ? AND uploaded = 0
             ORDER BY timestamp ASC",
        )?;
        let readings = stmt
            .query_map(params![start, end], |row| {
                Ok(ManualGlucose {
                    timestamp: row.get(0)?,
                    value: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(readings)
    }

    fn sensor_glucose(&self, start: i64, end: i64) -> Result<Vec<SensorGlucose>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT timestamp, value FROM sensor_glucose
             WHERE timestamp >= ? AND timestamp <= ? AND uploaded = 0
             ORDER BY timestamp ASC",
        )?;
        let readings = stmt
            .query_map(params![start, end], |row| {
                Ok(SensorGlucose {
                    timestamp: row.get(0)?,
                    value: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(readings)
    }

    fn basals(&self, start: i64, end: i64) -> Result<Vec<TempBasal>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT timestamp, rate, duration_ms FROM temp_basals
             WHERE timestamp >= ? AND timestamp <= ? AND uploaded = 0
             ORDER BY timestamp ASC",
        )?;
        let basals = stmt
            .query_map(params![start, end], |row| {
                Ok(TempBasal {
                    timestamp: row.get(0)?,
                    rate: row.get(1)?,
                    duration_ms: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(basals)
    }

    fn profile_switches(&self, start: i64, end: i64) -> Result<Vec<ProfileSwitch>> {
        let rows: Vec<(i64, String, String)> = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn.prepare(
                "SELECT timestamp, profile_name, basal_schedule FROM profile_switches
                 WHERE timestamp >= ? AND timestamp <= ? AND uploaded = 0
                 ORDER BY timestamp ASC",
            )?;
            let rows = stmt
                .query_map(params![start, end], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let mut switches = Vec::with_capacity(rows.len());
        for (timestamp, profile_name, schedule_json) in rows {
            let basal_schedule: Vec<BasalScheduleEntry> = serde_json::from_str(&schedule_json)
                .with_context(|| format!("Corrupt basal schedule for switch at {timestamp}"))?;
            switches.push(ProfileSwitch {
                timestamp,
                profile_name,
                basal_schedule,
            });
        }
        Ok(switches)
    }
}

impl SettingsStore for SqliteStore {
    fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get_setting(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    fn put_bool(&self, key: &str, value: bool) {
        self.put_setting(key, if value { "true" } else { "false" });
    }

    fn get_i64(&self, key: &str, default: i64) -> i64 {
        self.get_setting(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    fn put_i64(&self, key: &str, value: i64) {
        self.put_setting(key, &value.to_string());
    }

    fn get_string(&self, key: &str, default: &str) -> String {
        self.get_setting(key)
            .unwrap_or_else(|| default.to_string())
    }

    fn put_string(&self, key: &str, value: &str) {
        self.put_setting(key, value);
    }
}
