//! Tidepool API integration
//!
//! This module provides:
//! - Session management (Basic-auth login, dataset lifecycle)
//! - The HTTP uploader driven by the coordinator
//!
//! Uses synchronous HTTP (ureq) to be executor-agnostic.

mod rest;

pub use rest::{ClientError, TidepoolClient};

/// Tidepool API request/response types
pub mod api {
    use serde::{Deserialize, Serialize};

    /// Body of a successful login
    #[derive(Debug, Deserialize)]
    pub struct LoginResponse {
        pub userid: String,
        #[serde(default)]
        pub username: Option<String>,
    }

    /// Body sent when opening an upload dataset
    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct OpenDatasetRequest {
        #[serde(rename = "type")]
        pub kind: String,
        pub data_set_type: String,
        pub device_id: String,
        pub device_manufacturers: Vec<String>,
        pub device_model: String,
        pub time: String,
        pub time_processing: String,
        pub timezone_offset: i32,
    }

    /// Response from opening a dataset
    #[derive(Debug, Deserialize)]
    pub struct DatasetResponse {
        pub data: DatasetData,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct DatasetData {
        pub upload_id: String,
    }
}
