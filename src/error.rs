use thiserror::Error;

/// Failures of a single capture cycle and of device discovery.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("device enumeration unavailable: {0}")]
    DeviceEnumerationUnavailable(String),

    #[error("capture surface not ready")]
    NoCaptureSurface,

    #[error("malformed capture: {0}")]
    MalformedCapture(String),

    #[error("frame capture failed: {0}")]
    Capture(String),

    #[error(transparent)]
    Transport(#[from] UploadError),
}

/// Diagnostics from a failed submission to the recognition service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadError {
    #[error("server responded with {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request failed: {0}")]
    Request(String),

    #[error("invalid response body: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for UploadError {
    fn from(err: reqwest::Error) -> Self {
        UploadError::Request(err.to_string())
    }
}

impl CaptureError {
    /// Short text for the result banner; full detail goes to the log.
    pub fn summary(&self) -> String {
        match self {
            CaptureError::DeviceEnumerationUnavailable(_) => "No camera list available".to_string(),
            CaptureError::NoCaptureSurface => "Camera not ready".to_string(),
            CaptureError::MalformedCapture(_) => "Error uploading photo: unreadable capture".to_string(),
            CaptureError::Capture(_) => "Error uploading photo: capture failed".to_string(),
            CaptureError::Transport(UploadError::Status { status, .. }) => {
                format!("Error uploading photo: server returned {}", status)
            }
            CaptureError::Transport(_) => "Error uploading photo".to_string(),
        }
    }
}
