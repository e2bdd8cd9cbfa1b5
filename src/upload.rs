use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::multipart::Form;
use serde_json::Value;

use crate::codec::{ImagePayload, FIELD_NAME};
use crate::error::{CaptureError, UploadError};

/// Submits a captured still and returns the service's JSON reply.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, payload: ImagePayload) -> Result<Value, CaptureError>;
}

/// Multipart client for `<base-url>/recognize`.
pub struct RecognitionClient {
    http: reqwest::Client,
    endpoint: String,
}

impl RecognitionClient {
    pub fn new(base_url: &str) -> Self {
        Self::with_client(base_url, reqwest::Client::new())
    }

    pub fn with_client(base_url: &str, http: reqwest::Client) -> Self {
        Self {
            http,
            endpoint: recognize_url(base_url),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn recognize_url(base_url: &str) -> String {
    format!("{}/recognize", base_url.trim_end_matches('/'))
}

#[async_trait]
impl Uploader for RecognitionClient {
    async fn upload(&self, payload: ImagePayload) -> Result<Value, CaptureError> {
        if payload.is_empty() {
            warn!("Submitting an empty {} image", payload.mime);
        }
        info!(
            "Uploading {} bytes ({}) to {}",
            payload.len(),
            payload.mime,
            self.endpoint
        );

        let form = Form::new().part(FIELD_NAME, payload.to_part()?);

        // reqwest sets the multipart Content-Type together with its boundary
        let response = self
            .http
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(UploadError::from)?;

        let status = response.status();
        let body = response.text().await.map_err(UploadError::from)?;
        debug!("Recognition service replied {} with {} bytes", status, body.len());

        if !status.is_success() {
            return Err(UploadError::Status {
                status: status.as_u16(),
                body,
            }
            .into());
        }

        serde_json::from_str(&body)
            .map_err(|e| UploadError::InvalidResponse(e.to_string()).into())
    }
}
