//! System event types
//!
//! Defines all event types that can be broadcast through the event bus.

use serde::{Deserialize, Serialize};

/// System event enumeration
///
/// All events are tagged with their event name for serialization.
/// The `serde(tag = "event", content = "data")` attribute creates a
/// JSON structure like:
/// ```json
/// {
///   "event": "camera.state_changed",
///   "data": { "state": "running", "device": "synthetic:back" }
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum SystemEvent {
    // ============================================================================
    // Application Lifecycle Events
    // ============================================================================
    /// The application moved to the background
    #[serde(rename = "app.entered_background")]
    AppEnteredBackground,

    /// The application returned to the foreground
    #[serde(rename = "app.left_background")]
    AppLeftBackground,

    // ============================================================================
    // Camera Events
    // ============================================================================
    /// The capture session was interrupted by the system
    #[serde(rename = "camera.interrupted")]
    CameraInterrupted {
        /// Interruption reason if the source reported one
        reason: Option<String>,
    },

    /// A previous interruption ended
    #[serde(rename = "camera.interruption_ended")]
    CameraInterruptionEnded,

    /// Published session state changed
    #[serde(rename = "camera.state_changed")]
    CameraStateChanged {
        /// Current state: "stopped", "running", "interrupted"
        state: String,
        /// Device id if configured
        device: Option<String>,
    },

    /// Capture graph configured
    #[serde(rename = "camera.configured")]
    CameraConfigured {
        /// Device id
        device: String,
        /// Backend name: "synthetic", "v4l2"
        backend: String,
        /// Output pixel format
        format: String,
    },

    // ============================================================================
    // Scanner Events
    // ============================================================================
    /// Scanner state changed
    #[serde(rename = "scanner.state_changed")]
    ScannerStateChanged {
        /// Current state: "idle", "processing", "success", "error"
        state: String,
        /// Recognized label or error message
        detail: Option<String>,
    },

    // ============================================================================
    // System Events
    // ============================================================================
    /// System error or warning
    #[serde(rename = "system.error")]
    SystemError {
        /// Module name: "camera", "scanner", "config"
        module: String,
        /// Severity: "warning", "error", "critical"
        severity: String,
        /// Error message
        message: String,
    },
}

impl SystemEvent {
    /// Get the event name (for filtering/routing)
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::AppEnteredBackground => "app.entered_background",
            Self::AppLeftBackground => "app.left_background",
            Self::CameraInterrupted { .. } => "camera.interrupted",
            Self::CameraInterruptionEnded => "camera.interruption_ended",
            Self::CameraStateChanged { .. } => "camera.state_changed",
            Self::CameraConfigured { .. } => "camera.configured",
            Self::ScannerStateChanged { .. } => "scanner.state_changed",
            Self::SystemError { .. } => "system.error",
        }
    }

    /// Check if event name matches a topic pattern
    ///
    /// Supports wildcards:
    /// - `*` matches all events
    /// - `camera.*` matches all camera events
    /// - `camera.state_changed` matches exact event
    pub fn matches_topic(&self, topic: &str) -> bool {
        if topic == "*" {
            return true;
        }

        let event_name = self.event_name();

        if let Some(prefix) = topic.strip_suffix(".*") {
            event_name
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('.'))
        } else {
            event_name == topic
        }
    }
}
