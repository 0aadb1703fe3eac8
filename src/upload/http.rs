//! HTTP uploader for the voice-notes server
//!
//! Posts a multipart form to `{server_url}/api/recordings` and reads the new
//! record's id from the JSON response.

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;

use super::{RecordId, UploadError, UploadRequest, Uploader};

const API_TOKEN_ENV: &str = "VOXNOTE_API_TOKEN";

#[derive(Debug, Deserialize)]
struct UploadResponse {
    id: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

/// Get the API token from the environment, if any.
pub fn get_api_token() -> Option<String> {
    match std::env::var(API_TOKEN_ENV) {
        Ok(token) if !token.is_empty() => Some(token),
        _ => None,
    }
}

pub struct HttpUploader {
    client: Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpUploader {
    pub fn new(server_url: &str, timeout: Duration, token: Option<String>) -> Result<Self, UploadError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UploadError::Network(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: recordings_endpoint(server_url),
            token,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn recordings_endpoint(server_url: &str) -> String {
    format!("{}/api/recordings", server_url.trim_end_matches('/'))
}

fn record_id_from(value: serde_json::Value) -> Result<RecordId, UploadError> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Ok(RecordId(s)),
        serde_json::Value::Number(n) => Ok(RecordId(n.to_string())),
        other => Err(UploadError::Parse(format!("unexpected record id: {}", other))),
    }
}

fn error_message(body: String) -> String {
    match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(parsed) => parsed.error,
        Err(_) => body,
    }
}

#[async_trait::async_trait]
impl Uploader for HttpUploader {
    async fn upload(&self, request: UploadRequest) -> Result<RecordId, UploadError> {
        let artifact = request.artifact;
        let filename = format!("recording.{}", artifact.file_extension());

        log::info!(
            "Uploading recording \"{}\" ({} bytes, {} ms)",
            request.title,
            artifact.len(),
            request.duration_ms
        );

        let audio = Part::bytes(artifact.bytes().to_vec())
            .file_name(filename)
            .mime_str(artifact.mime_type())
            .map_err(|e| UploadError::Parse(e.to_string()))?;

        let form = Form::new()
            .text("title", request.title)
            .text("recordedAt", request.recorded_at.to_rfc3339())
            .text("durationMs", request.duration_ms.to_string())
            .part("audio", audio);

        let mut builder = self.client.post(&self.endpoint).multipart(form);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| UploadError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let body: UploadResponse = response
                .json()
                .await
                .map_err(|e| UploadError::Parse(e.to_string()))?;
            let id = record_id_from(body.id)?;
            log::info!("Upload complete: record {}", id);
            Ok(id)
        } else {
            let body = response.text().await.unwrap_or_default();
            let message = error_message(body);
            log::error!("Upload failed ({}): {}", status.as_u16(), message);
            Err(UploadError::Server {
                status: status.as_u16(),
                message,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_without_double_slash() {
        assert_eq!(
            recordings_endpoint("http://localhost:3000/"),
            "http://localhost:3000/api/recordings"
        );
        assert_eq!(
            recordings_endpoint("https://notes.example.com"),
            "https://notes.example.com/api/recordings"
        );
    }

    #[test]
    fn numeric_and_string_ids_are_accepted() {
        assert_eq!(
            record_id_from(serde_json::json!(17)).unwrap(),
            RecordId("17".to_string())
        );
        assert_eq!(
            record_id_from(serde_json::json!("abc")).unwrap(),
            RecordId("abc".to_string())
        );
        assert!(record_id_from(serde_json::json!(null)).is_err());
    }

    #[test]
    fn error_body_is_unwrapped_when_json() {
        assert_eq!(error_message(r#"{"error":"Unauthorized"}"#.to_string()), "Unauthorized");
        assert_eq!(error_message("Bad Gateway".to_string()), "Bad Gateway");
    }

    #[test]
    fn uploader_builds_with_timeout() {
        let uploader = HttpUploader::new("http://localhost:3000", Duration::from_secs(5), None).unwrap();
        assert_eq!(uploader.endpoint(), "http://localhost:3000/api/recordings");
    }
}
