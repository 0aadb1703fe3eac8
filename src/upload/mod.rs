//! Upload collaborator
//!
//! The recorder hands a finished take to an `Uploader` on save. The real
//! implementation posts it to the voice-notes server; tests substitute their own.

mod http;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audio::Artifact;

pub use http::{get_api_token, HttpUploader};

/// Everything the server needs to persist a recording.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub title: String,
    /// Wall-clock time at which capture started.
    pub recorded_at: DateTime<Utc>,
    /// Final duration computed at stop, excluding pauses.
    pub duration_ms: u64,
    pub artifact: Artifact,
}

/// Server-assigned identifier of a stored recording.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(pub String);

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Error)]
pub enum UploadError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },
    #[error("Failed to parse server response: {0}")]
    Parse(String),
}

/// Persists finished recordings. Implementations must be safe to retry.
#[async_trait::async_trait]
pub trait Uploader: Send + Sync + 'static {
    async fn upload(&self, request: UploadRequest) -> Result<RecordId, UploadError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_error_display_includes_status() {
        let err = UploadError::Server {
            status: 413,
            message: "Storage quota exceeded".to_string(),
        };
        assert!(err.to_string().contains("413"));
        assert!(err.to_string().contains("Storage quota exceeded"));
    }

    #[test]
    fn record_id_displays_raw_value() {
        assert_eq!(RecordId("42".to_string()).to_string(), "42");
    }
}
