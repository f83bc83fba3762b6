use serde::Serialize;
use thiserror::Error;

use crate::recognition::RecognitionResult;
use crate::session::SessionState;

/// User-facing scanning failures
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum ScanError {
    #[error("camera access denied")]
    PermissionDenied,

    #[error("camera access restricted")]
    PermissionRestricted,

    #[error("camera could not be configured")]
    CameraConfigurationFailed,

    #[error("no frame available yet")]
    NoFrameAvailable,

    #[error("recognition failed: {0}")]
    RecognitionFailed(String),

    #[error("unexpected error: {0}")]
    Unknown(String),
}

/// Scanning flow state
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(tag = "state", content = "data", rename_all = "snake_case")]
pub enum ScannerState {
    #[default]
    Idle,
    Processing,
    Success(RecognitionResult),
    Error(ScanError),
}

impl ScannerState {
    pub fn label(&self) -> &'static str {
        match self {
            ScannerState::Idle => "idle",
            ScannerState::Processing => "processing",
            ScannerState::Success(_) => "success",
            ScannerState::Error(_) => "error",
        }
    }

    /// Recognized label or error text
    pub fn detail(&self) -> Option<String> {
        match self {
            ScannerState::Success(result) => Some(result.label.clone()),
            ScannerState::Error(e) => Some(e.to_string()),
            _ => None,
        }
    }
}

/// Camera readiness as seen by the scanning flow
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CameraStatus {
    pub has_permission: bool,
    /// Refused by the user (as opposed to restricted or undetermined)
    pub permission_denied: bool,
    pub session_state: SessionState,
    /// Permission granted and the session is running
    pub camera_ready: bool,
}
