//! Session state and the flags it is derived from

use serde::{Deserialize, Serialize};
use std::fmt;

/// Published capture session state
///
/// When several conditions hold at once, the label is chosen by priority:
/// `Interrupted` > `Running` > `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Stopped,
    Running,
    Interrupted,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Stopped => "stopped",
            SessionState::Running => "running",
            SessionState::Interrupted => "interrupted",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Controller-owned flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionFlags {
    /// Set once by a successful configuration, never cleared
    pub configured: bool,
    /// Last explicit start/stop request
    pub desired_run: bool,
    pub in_background: bool,
    pub interrupted: bool,
}

impl SessionFlags {
    /// Whether the device should be running right now
    pub fn should_run(&self) -> bool {
        self.desired_run && self.configured && !self.in_background && !self.interrupted
    }

    /// State to publish given whether the device actually runs
    pub fn published_state(&self, device_running: bool) -> SessionState {
        if self.interrupted {
            SessionState::Interrupted
        } else if device_running {
            SessionState::Running
        } else {
            SessionState::Stopped
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_run_requires_every_condition() {
        let ready = SessionFlags {
            configured: true,
            desired_run: true,
            in_background: false,
            interrupted: false,
        };
        assert!(ready.should_run());

        assert!(!SessionFlags {
            configured: false,
            ..ready
        }
        .should_run());
        assert!(!SessionFlags {
            desired_run: false,
            ..ready
        }
        .should_run());
        assert!(!SessionFlags {
            in_background: true,
            ..ready
        }
        .should_run());
        assert!(!SessionFlags {
            interrupted: true,
            ..ready
        }
        .should_run());
    }

    #[test]
    fn test_interrupted_has_priority() {
        let flags = SessionFlags {
            interrupted: true,
            ..Default::default()
        };
        assert_eq!(flags.published_state(true), SessionState::Interrupted);
        assert_eq!(flags.published_state(false), SessionState::Interrupted);
    }

    #[test]
    fn test_running_follows_device() {
        let flags = SessionFlags {
            configured: true,
            desired_run: true,
            ..Default::default()
        };
        assert_eq!(flags.published_state(true), SessionState::Running);
        // A start that silently failed degrades to stopped
        assert_eq!(flags.published_state(false), SessionState::Stopped);
    }

    #[test]
    fn test_state_serialization() {
        assert_eq!(
            serde_json::to_string(&SessionState::Interrupted).unwrap(),
            "\"interrupted\""
        );
        assert_eq!(SessionState::default(), SessionState::Stopped);
        assert_eq!(SessionState::Running.to_string(), "running");
    }
}
