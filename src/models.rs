use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A payload staged in the scratch directory between upload and generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub filename: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub message: String,
    pub uploaded_files: Vec<String>,
}

impl UploadResponse {
    pub fn success(uploaded_files: Vec<String>) -> Self {
        Self {
            message: "success".to_string(),
            uploaded_files,
        }
    }
}

/// Query string of the generation endpoint, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateParams {
    pub question_header: Option<String>,
    pub question_description: Option<String>,
    pub api_key: Option<String>,
    pub model_name: Option<String>,
    pub uploaded_files: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
}

impl HealthStatus {
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
