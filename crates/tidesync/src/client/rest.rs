//! Tidepool HTTP uploader

use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{SecondsFormat, Utc};
use log::{debug, info};
use url::Url;

use super::api::{DatasetResponse, LoginResponse, OpenDatasetRequest};
use crate::store::{SettingsStore, keys};
use crate::sync::{ConnectionState, Uploader};

/// Errors surfaced by the Tidepool client
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Username or password not configured")]
    NotConfigured,
    #[error("No active session, login first")]
    NotLoggedIn,
    #[error("Login rejected with HTTP {0}")]
    LoginRejected(u16),
    #[error("Dataset request rejected with HTTP {0}")]
    DatasetRejected(u16),
    #[error("Upload rejected with HTTP {0}")]
    UploadRejected(u16),
}

/// A logged-in session with an open upload dataset
#[derive(Debug, Clone)]
struct ActiveSession {
    token: String,
    user_id: String,
    upload_id: String,
}

/// HTTP implementation of [`Uploader`] against the Tidepool API
///
/// Login is HTTP Basic; the returned session token authorizes the
/// dataset calls. The session and its dataset are cached until
/// invalidated or replaced by a forced login.
pub struct TidepoolClient {
    settings: Arc<dyn SettingsStore>,
    state: RwLock<ConnectionState>,
    session: RwLock<Option<ActiveSession>>,
}

impl TidepoolClient {
    const PRODUCTION_BASE_URL: &'static str = "https://api.tidepool.org";
    const INTEGRATION_BASE_URL: &'static str = "https://int-api.tidepool.org";

    /// Header carrying the session token
    const SESSION_TOKEN_HEADER: &'static str = "x-tidepool-session-token";

    /// Device identity reported when opening a dataset
    const DEVICE_ID: &'static str = "tidesync";

    pub fn new(settings: Arc<dyn SettingsStore>) -> Self {
        Self {
            settings,
            state: RwLock::new(ConnectionState::Disconnected),
            session: RwLock::new(None),
        }
    }

    /// Base URL honoring the dev-servers toggle
    fn base_url(&self) -> Result<Url> {
        let raw = if self.settings.get_bool(keys::DEV_SERVERS, false) {
            Self::INTEGRATION_BASE_URL
        } else {
            Self::PRODUCTION_BASE_URL
        };
        Url::parse(raw).context("Invalid Tidepool base URL")
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url()?
            .join(path)
            .with_context(|| format!("Invalid endpoint path: {path}"))
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write().unwrap() = state;
    }

    /// Log in and open an upload dataset
    fn establish_session(&self) -> Result<ActiveSession> {
        let username = self.settings.get_string(keys::USERNAME, "");
        let password = self.settings.get_string(keys::PASSWORD, "");
        if username.is_empty() || password.is_empty() {
            return Err(ClientError::NotConfigured.into());
        }

        let url = self.endpoint("auth/login")?;
        let auth = BASE64.encode(format!("{username}:{password}"));

        let mut response = match ureq::post(url.as_str())
            .header("Authorization", &format!("Basic {auth}"))
            .send_empty()
        {
            Ok(response) => response,
            Err(ureq::Error::StatusCode(code)) => {
                return Err(ClientError::LoginRejected(code).into());
            }
            Err(e) => {
                return Err(anyhow::Error::new(e).context("Failed to send login request"));
            }
        };

        let token = response
            .headers()
            .get(Self::SESSION_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .context("Login response missing session token")?
            .to_string();

        let login: LoginResponse = response
            .body_mut()
            .read_json()
            .context("Failed to parse login response")?;

        let upload_id = self.open_dataset(&token, &login.userid)?;
        info!("session established for user {}", login.userid);

        Ok(ActiveSession {
            token,
            user_id: login.userid,
            upload_id,
        })
    }

    /// Open an upload dataset for the session's user
    fn open_dataset(&self, token: &str, user_id: &str) -> Result<String> {
        let url = self.endpoint(&format!("v1/users/{user_id}/datasets"))?;
        let request = OpenDatasetRequest {
            kind: "upload".to_string(),
            data_set_type: "continuous".to_string(),
            device_id: Self::DEVICE_ID.to_string(),
            device_manufacturers: vec![Self::DEVICE_ID.to_string()],
            device_model: Self::DEVICE_ID.to_string(),
            time: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            time_processing: "utc-bootstrapping".to_string(),
            timezone_offset: 0,
        };

        let mut response = match ureq::post(url.as_str())
            .header(Self::SESSION_TOKEN_HEADER, token)
            .send_json(&request)
        {
            Ok(response) => response,
            Err(ureq::Error::StatusCode(code)) => {
                return Err(ClientError::DatasetRejected(code).into());
            }
            Err(e) => {
                return Err(anyhow::Error::new(e).context("Failed to open upload dataset"));
            }
        };

        let dataset: DatasetResponse = response
            .body_mut()
            .read_json()
            .context("Failed to parse dataset response")?;

        debug!("opened dataset {}", dataset.data.upload_id);
        Ok(dataset.data.upload_id)
    }

    fn active_session(&self) -> Result<ActiveSession> {
        self.session
            .read()
            .unwrap()
            .clone()
            .ok_or_else(|| ClientError::NotLoggedIn.into())
    }
}

impl Uploader for TidepoolClient {
    fn connection_state(&self) -> ConnectionState {
        *self.state.read().unwrap()
    }

    fn login(&self, force: bool) -> Result<()> {
        if !force
            && self.connection_state() == ConnectionState::Connected
            && self.session.read().unwrap().is_some()
        {
            debug!("session still active, skipping login");
            return Ok(());
        }

        self.set_state(ConnectionState::Connecting);
        match self.establish_session() {
            Ok(session) => {
                *self.session.write().unwrap() = Some(session);
                self.set_state(ConnectionState::Connected);
                Ok(())
            }
            Err(e) => {
                *self.session.write().unwrap() = None;
                self.set_state(ConnectionState::Failed);
                Err(e)
            }
        }
    }

    fn upload(&self, payload: &str) -> Result<()> {
        let session = self.active_session()?;
        let url = self.endpoint(&format!("v1/datasets/{}/data", session.upload_id))?;

        match ureq::post(url.as_str())
            .header(Self::SESSION_TOKEN_HEADER, &session.token)
            .header("Content-Type", "application/json")
            .send(payload)
        {
            Ok(_) => {
                info!("uploaded {} bytes for user {}", payload.len(), session.user_id);
                Ok(())
            }
            Err(ureq::Error::StatusCode(code)) => Err(ClientError::UploadRejected(code).into()),
            Err(e) => Err(anyhow::Error::new(e).context("Failed to upload records")),
        }
    }

    fn delete_dataset(&self) -> Result<()> {
        let session = self.active_session()?;
        let url = self.endpoint(&format!("v1/datasets/{}", session.upload_id))?;

        match ureq::delete(url.as_str())
            .header(Self::SESSION_TOKEN_HEADER, &session.token)
            .call()
        {
            Ok(_) => {
                info!("deleted remote dataset {}", session.upload_id);
                // The cached dataset is gone; force a fresh login next cycle.
                self.invalidate_session();
                Ok(())
            }
            Err(ureq::Error::StatusCode(code)) => Err(ClientError::DatasetRejected(code).into()),
            Err(e) => Err(anyhow::Error::new(e).context("Failed to delete remote dataset")),
        }
    }

    fn invalidate_session(&self) {
        *self.session.write().unwrap() = None;
        self.set_state(ConnectionState::Disconnected);
    }
}
