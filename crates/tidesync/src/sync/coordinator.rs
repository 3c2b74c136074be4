//! Upload coordination
//!
//! Owns the reaction to external triggers: policy gates, rate limiting,
//! login/upload/reset sequencing and the status log. Events are handled
//! one at a time on the dispatch thread; nothing here blocks the
//! producers publishing to the bus.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, info, warn};

use super::planner::{SyncWindowPlanner, format_timestamp};
use super::ratelimit::RateLimiter;
use super::status::{StatusLog, StatusLogEntry};
use super::uploader::{ConnectionState, Uploader};
use super::watermark::SyncWatermark;
use crate::events::{EventBus, Subscription, UploadEvent};
use crate::store::{RecordStore, SettingsStore, keys};

/// Rate limiter tag for uploads triggered by new data
pub const NEW_DATA_RATE_TAG: &str = "tidepool-new-data-upload";

/// Minimum seconds between new-data uploads (4 minutes)
pub const NEW_DATA_MIN_INTERVAL_SECS: i64 = 240;

/// Charging and network oracle
///
/// Answers the policy-gate questions; the host wires it to whatever the
/// platform reports.
pub trait DeviceState: Send + Sync {
    fn is_charging(&self) -> bool;
    fn is_unmetered(&self) -> bool;
}

/// Coordinates uploads against the remote service
///
/// Construct once, then either feed it events directly via
/// [`handle_event`](Self::handle_event) or subscribe it to a bus with
/// [`start`](Self::start).
pub struct UploadCoordinator {
    planner: SyncWindowPlanner,
    uploader: Arc<dyn Uploader>,
    settings: Arc<dyn SettingsStore>,
    device: Arc<dyn DeviceState>,
    watermark: SyncWatermark,
    rate_limiter: RateLimiter,
    status_log: StatusLog,
    bus: Arc<EventBus>,
}

impl UploadCoordinator {
    pub fn new(
        records: Arc<dyn RecordStore>,
        uploader: Arc<dyn Uploader>,
        settings: Arc<dyn SettingsStore>,
        device: Arc<dyn DeviceState>,
        bus: Arc<EventBus>,
    ) -> Self {
        let watermark = SyncWatermark::new(Arc::clone(&settings));
        let planner = SyncWindowPlanner::new(records, watermark.clone(), Arc::clone(&bus));
        Self {
            planner,
            uploader,
            settings,
            device,
            watermark,
            rate_limiter: RateLimiter::new(),
            status_log: StatusLog::new(),
            bus,
        }
    }

    /// Subscribe to the bus and dispatch events until the handle drops
    pub fn start(self: Arc<Self>) -> CoordinatorHandle {
        let Subscription { id, receiver } = self.bus.subscribe();
        let bus = Arc::clone(&self.bus);
        let thread = thread::spawn(move || {
            while let Ok(event) = receiver.recv() {
                self.handle_event(event);
            }
        });
        CoordinatorHandle {
            id,
            bus,
            thread: Some(thread),
        }
    }

    /// React to one event; the single dispatch point
    pub fn handle_event(&self, event: UploadEvent) {
        match event {
            UploadEvent::UploadRequested => self.do_upload(),
            UploadEvent::ResetRequested => self.reset_data(),
            UploadEvent::Status(entry) => {
                self.status_log.append(entry);
                self.bus.publish(UploadEvent::LogUpdated);
            }
            UploadEvent::NewRecord { timestamp } => self.on_new_record(timestamp),
            UploadEvent::PreferenceChanged { key } => self.on_preference_changed(&key),
            UploadEvent::NetworkChanged => {}
            UploadEvent::LogUpdated => {}
        }
    }

    /// Upload now, logging in first when disconnected
    pub fn do_upload(&self) {
        if self.uploader.connection_state() == ConnectionState::Disconnected {
            info!("not connected, logging in before upload");
            if let Err(e) = self.uploader.login(true) {
                warn!("login failed: {:#}", e);
                self.status(format!("Login failed: {}", e));
                return;
            }
        }
        self.upload_pending();
    }

    /// Push the next planned chunk, advancing the watermark on success
    fn upload_pending(&self) {
        let chunk = match self.planner.next_chunk() {
            Ok(Some(chunk)) => chunk,
            Ok(None) => {
                debug!("nothing to upload");
                return;
            }
            Err(e) => {
                warn!("failed to plan upload window: {:#}", e);
                self.status(format!("Upload preparation failed: {}", e));
                return;
            }
        };

        match self.uploader.upload(&chunk.payload) {
            Ok(()) => {
                self.watermark.set(chunk.session.end);
                self.status(format!(
                    "Uploaded data up to {}",
                    format_timestamp(chunk.session.end)
                ));
            }
            Err(e) => {
                // Watermark untouched: the same window is retried on the
                // next trigger.
                warn!("upload failed: {:#}", e);
                self.status(format!("Upload failed: {}", e));
            }
        }
    }

    /// Wipe the remote dataset and start over from zero
    fn reset_data(&self) {
        if self.uploader.connection_state() != ConnectionState::Connected {
            debug!("not connected, skipping dataset delete");
            return;
        }
        if let Err(e) = self.uploader.delete_dataset() {
            warn!("dataset delete failed: {:#}", e);
            self.status(format!("Dataset delete failed: {}", e));
            return;
        }
        self.watermark.reset();
        self.status("Remote dataset deleted, watermark reset");
        if let Err(e) = self.uploader.login(false) {
            warn!("re-login after reset failed: {:#}", e);
            self.status(format!("Login failed: {}", e));
        }
    }

    fn on_new_record(&self, timestamp: i64) {
        if timestamp < self.watermark.get() {
            // Backdated entry: pull the watermark back so the next window
            // covers it.
            self.watermark.set(timestamp);
        }

        if !self.enabled() {
            return;
        }
        if self.settings.get_bool(keys::ONLY_WHILE_CHARGING, false) && !self.device.is_charging() {
            debug!("charging gate closed, skipping upload");
            return;
        }
        if self.settings.get_bool(keys::ONLY_WHILE_UNMETERED, false) && !self.device.is_unmetered()
        {
            debug!("unmetered gate closed, skipping upload");
            return;
        }
        if !self
            .rate_limiter
            .allow(NEW_DATA_RATE_TAG, NEW_DATA_MIN_INTERVAL_SECS)
        {
            return;
        }
        self.do_upload();
    }

    fn on_preference_changed(&self, key: &str) {
        if matches!(key, keys::USERNAME | keys::PASSWORD | keys::DEV_SERVERS) {
            info!("connection settings changed, discarding cached session");
            self.uploader.invalidate_session();
        }
    }

    /// Record a status line and notify observers
    fn status(&self, message: impl Into<String>) {
        self.status_log.append(StatusLogEntry::new(message));
        self.bus.publish(UploadEvent::LogUpdated);
    }

    fn enabled(&self) -> bool {
        self.settings.get_bool(keys::ENABLED, false)
    }

    /// The bounded status log, for rendering by the host
    pub fn status_log(&self) -> &StatusLog {
        &self.status_log
    }
}

/// Keeps the dispatch loop alive; dropping it unsubscribes and joins
pub struct CoordinatorHandle {
    id: u64,
    bus: Arc<EventBus>,
    thread: Option<JoinHandle<()>>,
}

impl Drop for CoordinatorHandle {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.id);
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!("event dispatch thread panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Treatment;
    use crate::store::{InMemoryRecordStore, InMemorySettingsStore};
    use anyhow::bail;
    use chrono::Utc;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeUploader {
        state: Mutex<Option<ConnectionState>>,
        login_forces: Mutex<Vec<bool>>,
        uploads: Mutex<Vec<String>>,
        deletes: AtomicUsize,
        invalidations: AtomicUsize,
        fail_login: AtomicBool,
        fail_upload: AtomicBool,
    }

    impl FakeUploader {
        fn with_state(state: ConnectionState) -> Self {
            let uploader = Self::default();
            *uploader.state.lock().unwrap() = Some(state);
            uploader
        }
    }

    impl Uploader for FakeUploader {
        fn connection_state(&self) -> ConnectionState {
            self.state
                .lock()
                .unwrap()
                .unwrap_or(ConnectionState::Disconnected)
        }

        fn login(&self, force: bool) -> anyhow::Result<()> {
            self.login_forces.lock().unwrap().push(force);
            if self.fail_login.load(Ordering::SeqCst) {
                *self.state.lock().unwrap() = Some(ConnectionState::Failed);
                bail!("wrong credentials");
            }
            *self.state.lock().unwrap() = Some(ConnectionState::Connected);
            Ok(())
        }

        fn upload(&self, payload: &str) -> anyhow::Result<()> {
            if self.fail_upload.load(Ordering::SeqCst) {
                bail!("server unavailable");
            }
            self.uploads.lock().unwrap().push(payload.to_string());
            Ok(())
        }

        fn delete_dataset(&self) -> anyhow::Result<()> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn invalidate_session(&self) {
            self.invalidations.fetch_add(1, Ordering::SeqCst);
            *self.state.lock().unwrap() = Some(ConnectionState::Disconnected);
        }
    }

    struct FakeDevice {
        charging: bool,
        unmetered: bool,
    }

    impl DeviceState for FakeDevice {
        fn is_charging(&self) -> bool {
            self.charging
        }

        fn is_unmetered(&self) -> bool {
            self.unmetered
        }
    }

    struct Fixture {
        records: Arc<InMemoryRecordStore>,
        settings: Arc<InMemorySettingsStore>,
        uploader: Arc<FakeUploader>,
        bus: Arc<EventBus>,
        coordinator: Arc<UploadCoordinator>,
    }

    fn fixture_with(uploader: FakeUploader, device: FakeDevice) -> Fixture {
        let records = Arc::new(InMemoryRecordStore::new());
        let settings = Arc::new(InMemorySettingsStore::new());
        let uploader = Arc::new(uploader);
        let bus = Arc::new(EventBus::new());
        let coordinator = Arc::new(UploadCoordinator::new(
            Arc::clone(&records) as Arc<dyn RecordStore>,
            Arc::clone(&uploader) as Arc<dyn Uploader>,
            Arc::clone(&settings) as Arc<dyn SettingsStore>,
            Arc::new(device),
            Arc::clone(&bus),
        ));
        Fixture {
            records,
            settings,
            uploader,
            bus,
            coordinator,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(
            FakeUploader::with_state(ConnectionState::Disconnected),
            FakeDevice {
                charging: true,
                unmetered: true,
            },
        )
    }

    /// Seed the watermark an hour back and drop one treatment in the
    /// open window, so the next chunk is non-empty.
    fn seed_pending_record(f: &Fixture) {
        let now = Utc::now().timestamp_millis();
        f.settings.put_i64(keys::LAST_END, now - 3_600_000);
        f.records
            .add_treatment(Treatment::new(now - 1_800_000, 4.0, 0.0));
    }

    #[test]
    fn test_disconnected_upload_logs_in_first() {
        let f = fixture();
        seed_pending_record(&f);

        f.coordinator.do_upload();

        let forces = f.uploader.login_forces.lock().unwrap().clone();
        assert_eq!(forces, vec![true]);
        assert_eq!(f.uploader.uploads.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_connected_upload_skips_login() {
        let f = fixture_with(
            FakeUploader::with_state(ConnectionState::Connected),
            FakeDevice {
                charging: true,
                unmetered: true,
            },
        );
        seed_pending_record(&f);

        f.coordinator.do_upload();

        assert!(f.uploader.login_forces.lock().unwrap().is_empty());
        assert_eq!(f.uploader.uploads.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_failed_login_blocks_upload() {
        let f = fixture();
        seed_pending_record(&f);
        f.uploader.fail_login.store(true, Ordering::SeqCst);

        f.coordinator.do_upload();

        assert!(f.uploader.uploads.lock().unwrap().is_empty());
        let rendered = f.coordinator.status_log().render();
        assert!(rendered.contains("Login failed"));
    }

    #[test]
    fn test_successful_upload_advances_watermark() {
        let f = fixture();
        seed_pending_record(&f);
        let before = f.settings.get_i64(keys::LAST_END, 0);

        f.coordinator.do_upload();

        let after = f.settings.get_i64(keys::LAST_END, 0);
        assert!(after > before);
        let rendered = f.coordinator.status_log().render();
        assert!(rendered.contains("Uploaded data up to"));
    }

    #[test]
    fn test_failed_upload_keeps_watermark() {
        let f = fixture();
        seed_pending_record(&f);
        f.uploader.fail_upload.store(true, Ordering::SeqCst);
        let before = f.settings.get_i64(keys::LAST_END, 0);

        f.coordinator.do_upload();

        assert_eq!(f.settings.get_i64(keys::LAST_END, 0), before);
        let rendered = f.coordinator.status_log().render();
        assert!(rendered.contains("Upload failed"));
    }

    #[test]
    fn test_reset_requires_connection() {
        let f = fixture();
        f.settings.put_i64(keys::LAST_END, 5_000);

        f.coordinator.handle_event(UploadEvent::ResetRequested);

        assert_eq!(f.uploader.deletes.load(Ordering::SeqCst), 0);
        assert_eq!(f.settings.get_i64(keys::LAST_END, 0), 5_000);
    }

    #[test]
    fn test_reset_deletes_and_relogs_in() {
        let f = fixture_with(
            FakeUploader::with_state(ConnectionState::Connected),
            FakeDevice {
                charging: true,
                unmetered: true,
            },
        );
        f.settings.put_i64(keys::LAST_END, 5_000);

        f.coordinator.handle_event(UploadEvent::ResetRequested);

        assert_eq!(f.uploader.deletes.load(Ordering::SeqCst), 1);
        assert_eq!(f.settings.get_i64(keys::LAST_END, 0), 0);
        // Re-login after reset is not forced.
        assert_eq!(f.uploader.login_forces.lock().unwrap().clone(), vec![false]);
    }

    #[test]
    fn test_new_record_retreats_watermark() {
        let f = fixture();
        f.settings.put_i64(keys::LAST_END, 10_000);

        f.coordinator
            .handle_event(UploadEvent::NewRecord { timestamp: 4_000 });

        assert_eq!(f.settings.get_i64(keys::LAST_END, 0), 4_000);
    }

    #[test]
    fn test_new_record_disabled_plugin_does_not_upload() {
        let f = fixture();
        seed_pending_record(&f);

        f.coordinator.handle_event(UploadEvent::NewRecord {
            timestamp: Utc::now().timestamp_millis(),
        });

        assert!(f.uploader.login_forces.lock().unwrap().is_empty());
        assert!(f.uploader.uploads.lock().unwrap().is_empty());
    }

    #[test]
    fn test_new_record_uploads_when_enabled() {
        let f = fixture();
        seed_pending_record(&f);
        f.settings.put_bool(keys::ENABLED, true);

        f.coordinator.handle_event(UploadEvent::NewRecord {
            timestamp: Utc::now().timestamp_millis(),
        });

        assert_eq!(f.uploader.uploads.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_new_record_respects_charging_gate() {
        let f = fixture_with(
            FakeUploader::with_state(ConnectionState::Disconnected),
            FakeDevice {
                charging: false,
                unmetered: true,
            },
        );
        seed_pending_record(&f);
        f.settings.put_bool(keys::ENABLED, true);
        f.settings.put_bool(keys::ONLY_WHILE_CHARGING, true);

        f.coordinator.handle_event(UploadEvent::NewRecord {
            timestamp: Utc::now().timestamp_millis(),
        });

        assert!(f.uploader.uploads.lock().unwrap().is_empty());
    }

    #[test]
    fn test_new_record_respects_unmetered_gate() {
        let f = fixture_with(
            FakeUploader::with_state(ConnectionState::Disconnected),
            FakeDevice {
                charging: true,
                unmetered: false,
            },
        );
        seed_pending_record(&f);
        f.settings.put_bool(keys::ENABLED, true);
        f.settings.put_bool(keys::ONLY_WHILE_UNMETERED, true);

        f.coordinator.handle_event(UploadEvent::NewRecord {
            timestamp: Utc::now().timestamp_millis(),
        });

        assert!(f.uploader.uploads.lock().unwrap().is_empty());
    }

    #[test]
    fn test_new_record_bursts_are_rate_limited() {
        let f = fixture();
        seed_pending_record(&f);
        f.settings.put_bool(keys::ENABLED, true);
        let now = Utc::now().timestamp_millis();

        f.coordinator.handle_event(UploadEvent::NewRecord { timestamp: now });
        f.coordinator
            .handle_event(UploadEvent::NewRecord { timestamp: now + 1 });

        // Second event fell inside the 4 minute window.
        assert_eq!(f.uploader.uploads.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_credential_change_invalidates_session() {
        let f = fixture();

        f.coordinator.handle_event(UploadEvent::PreferenceChanged {
            key: keys::PASSWORD.to_string(),
        });
        assert_eq!(f.uploader.invalidations.load(Ordering::SeqCst), 1);

        f.coordinator.handle_event(UploadEvent::PreferenceChanged {
            key: keys::ONLY_WHILE_CHARGING.to_string(),
        });
        assert_eq!(f.uploader.invalidations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_status_event_lands_in_log_and_notifies() {
        let f = fixture();
        let sub = f.bus.subscribe();

        f.coordinator
            .handle_event(UploadEvent::Status(StatusLogEntry::new("3 CGMs selected")));

        assert_eq!(f.coordinator.status_log().len(), 1);
        assert!(matches!(
            sub.receiver.try_recv(),
            Ok(UploadEvent::LogUpdated)
        ));
    }

    #[test]
    fn test_network_change_is_ignored() {
        let f = fixture();
        f.coordinator.handle_event(UploadEvent::NetworkChanged);
        assert!(f.uploader.login_forces.lock().unwrap().is_empty());
        assert!(f.uploader.uploads.lock().unwrap().is_empty());
    }
}
