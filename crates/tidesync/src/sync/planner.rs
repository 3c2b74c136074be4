//! Sync window planning and payload assembly
//!
//! Decides what to upload next: computes the window past the watermark,
//! pulls each record kind from the store, normalizes and serializes.
//! Advancing the watermark after a successful upload is the caller's
//! job so a failed upload retries the same window.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::debug;

use super::status::StatusLogEntry;
use super::watermark::SyncWatermark;
use crate::events::{EventBus, UploadEvent};
use crate::models::{MAX_WINDOW_MS, SyncSession, UploadRecord};
use crate::store::RecordStore;

/// Serialized length of a payload with no records (`[]`)
const EMPTY_PAYLOAD_LEN: usize = 2;

/// A payload ready for upload, together with the window it covers
///
/// `session.end` is where the watermark belongs once the remote accepts
/// the payload.
#[derive(Debug, Clone)]
pub struct PendingChunk {
    pub payload: String,
    pub session: SyncSession,
}

/// Plans upload windows over the local record store
pub struct SyncWindowPlanner {
    records: Arc<dyn RecordStore>,
    watermark: SyncWatermark,
    bus: Arc<EventBus>,
}

impl SyncWindowPlanner {
    pub fn new(records: Arc<dyn RecordStore>, watermark: SyncWatermark, bus: Arc<EventBus>) -> Self {
        Self {
            records,
            watermark,
            bus,
        }
    }

    /// Compute the next chunk to upload, if any
    pub fn next_chunk(&self) -> Result<Option<PendingChunk>> {
        self.next_chunk_at(Utc::now().timestamp_millis())
    }

    /// Clock-parameterized variant of [`next_chunk`](Self::next_chunk)
    pub fn next_chunk_at(&self, now_ms: i64) -> Result<Option<PendingChunk>> {
        let start = self.watermark.get();
        let end = (start + MAX_WINDOW_MS).min(now_ms);

        let payload = self.build_payload(start, end)?;
        if payload.len() <= EMPTY_PAYLOAD_LEN {
            debug!("no records in this time period, setting start to best end time");
            // Skip ahead so empty historical windows are not rescanned
            // forever. With nothing recorded at all the watermark stays
            // where it is.
            if let Some(oldest) = self.oldest_record_timestamp(now_ms)? {
                self.watermark.set(end.max(oldest));
            }
            return Ok(None);
        }

        Ok(Some(PendingChunk {
            payload,
            session: SyncSession::new(start, end),
        }))
    }

    /// Serialize every not-yet-uploaded record in `[start, end]`
    ///
    /// Returns the empty string for a hollow or oversized window; the
    /// window is validated here rather than trusted from the caller.
    pub fn build_payload(&self, start: i64, end: i64) -> Result<String> {
        debug!(
            "syncing data between {} -> {}",
            format_timestamp(start),
            format_timestamp(end)
        );
        if end <= start {
            debug!("end <= start, nothing to select");
            return Ok(String::new());
        }
        if end - start > MAX_WINDOW_MS {
            debug!("window exceeds maximum range, rejecting");
            return Ok(String::new());
        }

        let records = self.collect_records(start, end)?;
        serde_json::to_string(&records).context("Failed to serialize upload records")
    }

    /// Gather all record kinds in their fixed upload order
    ///
    /// Order matters: a retried window must serialize identically so the
    /// remote can deduplicate the resubmission.
    fn collect_records(&self, start: i64, end: i64) -> Result<Vec<UploadRecord>> {
        let mut records = Vec::new();

        let treatments = self.records.treatments(start, end)?;
        let selected: Vec<UploadRecord> = treatments
            .iter()
            .filter_map(UploadRecord::from_treatment)
            .collect();
        self.notify_selected(selected.len(), "treatments");
        records.extend(selected);

        let readings = self.records.manual_glucose(start, end)?;
        self.notify_selected(readings.len(), "BGs");
        records.extend(readings.iter().map(UploadRecord::from_manual_glucose));

        let basals = self.records.basals(start, end)?;
        self.notify_selected(basals.len(), "TBRs");
        records.extend(basals.iter().map(UploadRecord::from_basal));

        let readings = self.records.sensor_glucose(start, end)?;
        self.notify_selected(readings.len(), "CGMs");
        records.extend(readings.iter().map(UploadRecord::from_sensor_glucose));

        let switches = self.records.profile_switches(start, end)?;
        self.notify_selected(switches.len(), "ProfileSwitches");
        records.extend(switches.iter().map(UploadRecord::from_profile_switch));

        Ok(records)
    }

    /// Timestamp of the oldest known record across all record kinds
    fn oldest_record_timestamp(&self, now_ms: i64) -> Result<Option<i64>> {
        let mut oldest: Option<i64> = None;
        let mut consider = |candidate: Option<i64>| {
            if let Some(ts) = candidate {
                oldest = Some(oldest.map_or(ts, |current| current.min(ts)));
            }
        };

        // Each query returns ascending order, so the first row is the
        // oldest of its kind.
        consider(self.records.treatments(0, now_ms)?.first().map(|t| t.timestamp));
        consider(self.records.manual_glucose(0, now_ms)?.first().map(|g| g.timestamp));
        consider(self.records.basals(0, now_ms)?.first().map(|b| b.timestamp));
        consider(self.records.sensor_glucose(0, now_ms)?.first().map(|g| g.timestamp));
        consider(self.records.profile_switches(0, now_ms)?.first().map(|p| p.timestamp));

        Ok(oldest)
    }

    fn notify_selected(&self, count: usize, kind: &str) {
        if count > 0 {
            self.bus.publish(UploadEvent::Status(StatusLogEntry::new(format!(
                "{} {} selected for upload",
                count, kind
            ))));
        }
    }
}

/// Human-readable form of an epoch-millisecond timestamp, for logs
pub(crate) fn format_timestamp(timestamp_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
        .unwrap_or(DateTime::UNIX_EPOCH)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}
