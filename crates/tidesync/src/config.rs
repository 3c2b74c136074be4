//! Configuration loading for the Tidepool uploader
//!
//! Supports loading account credentials from (in order of priority):
//! 1. JSON file (~/.config/tidesync/tidepool-credentials.json)
//! 2. Runtime environment variables (fallback)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::store::{SettingsStore, keys};

/// Credentials filename in the tidesync config directory
const CREDENTIALS_FILE: &str = "tidepool-credentials.json";

/// Tidepool account credentials
#[derive(Debug, Clone)]
pub struct TidepoolCredentials {
    pub username: String,
    pub password: String,
}

/// Credential file format
#[derive(Serialize, Deserialize)]
struct CredentialFile {
    username: String,
    password: String,
}

impl TidepoolCredentials {
    /// Load credentials using the following priority:
    /// 1. JSON file (~/.config/tidesync/tidepool-credentials.json)
    /// 2. Runtime environment variables
    pub fn load() -> Result<Self> {
        if config::config_exists(CREDENTIALS_FILE) {
            let file: CredentialFile = config::load_json(CREDENTIALS_FILE)?;
            return Ok(Self::from_credential_file(file));
        }

        Self::from_env()
    }

    /// Load credentials from a specific JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let file: CredentialFile = config::load_json_file(path)?;
        Ok(Self::from_credential_file(file))
    }

    /// Parse credentials from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let file: CredentialFile =
            serde_json::from_str(json).context("Failed to parse credentials JSON")?;
        Ok(Self::from_credential_file(file))
    }

    fn from_credential_file(file: CredentialFile) -> Self {
        Self {
            username: file.username,
            password: file.password,
        }
    }

    /// Load credentials from environment variables
    pub fn from_env() -> Result<Self> {
        let username = std::env::var("TIDEPOOL_USERNAME")
            .context("TIDEPOOL_USERNAME environment variable not set")?;
        let password = std::env::var("TIDEPOOL_PASSWORD")
            .context("TIDEPOOL_PASSWORD environment variable not set")?;

        Ok(Self { username, password })
    }

    /// Persist credentials to the tidesync config directory
    pub fn save(&self) -> Result<()> {
        let file = CredentialFile {
            username: self.username.clone(),
            password: self.password.clone(),
        };
        config::save_json(CREDENTIALS_FILE, &file)
    }

    /// Get the default credentials file path
    pub fn default_credentials_path() -> Option<PathBuf> {
        config::config_path(CREDENTIALS_FILE)
    }

    /// Check if credentials are available (file or env vars)
    pub fn is_available() -> bool {
        if config::config_exists(CREDENTIALS_FILE) {
            return true;
        }
        std::env::var("TIDEPOOL_USERNAME").is_ok() && std::env::var("TIDEPOOL_PASSWORD").is_ok()
    }

    /// Push the credentials into the settings store the uploader reads
    pub fn apply(&self, settings: &dyn SettingsStore) {
        settings.put_string(keys::USERNAME, &self.username);
        settings.put_string(keys::PASSWORD, &self.password);
    }
}
