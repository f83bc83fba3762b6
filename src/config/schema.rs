use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::session::SessionOptions;
use crate::video::backend::{CameraPosition, OutputSettings, SessionPreset};
use crate::video::synthetic::SyntheticConfig;
use crate::video::v4l2::V4l2Config;

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Camera selection and output settings
    pub camera: CameraConfig,
    /// Synthetic camera settings
    pub synthetic: SyntheticConfig,
    /// Scanning flow settings
    pub scanner: ScannerConfig,
}

/// Capture backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraBackendKind {
    /// In-process test pattern
    #[default]
    Synthetic,
    /// Linux V4L2 device
    V4l2,
}

impl std::str::FromStr for CameraBackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "synthetic" => Ok(Self::Synthetic),
            "v4l2" => Ok(Self::V4l2),
            other => Err(format!("unknown camera backend: {}", other)),
        }
    }
}

/// Camera configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub backend: CameraBackendKind,
    /// Preferred camera facing
    pub position: CameraPosition,
    /// Quality preset (sets the V4L2 capture resolution)
    pub preset: SessionPreset,
    /// V4L2 device path; empty picks the best capture device
    pub device: Option<PathBuf>,
    /// V4L2 mmap buffer count
    pub buffer_count: u32,
    /// Frame output settings
    pub output: OutputSettings,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            backend: CameraBackendKind::default(),
            position: CameraPosition::Back,
            preset: SessionPreset::High,
            device: None,
            buffer_count: 4,
            output: OutputSettings::default(),
        }
    }
}

impl CameraConfig {
    /// Options handed to the session controller
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            position: self.position,
            preset: self.preset,
            output: self.output.clone(),
        }
    }

    pub fn v4l2_config(&self) -> V4l2Config {
        V4l2Config {
            device: self.device.clone(),
            buffer_count: self.buffer_count,
        }
    }
}

/// Scanning flow configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Simulated recognition latency in milliseconds
    pub recognition_delay_ms: u64,
    /// Labels the mock recognizer picks from
    pub labels: Vec<String>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            recognition_delay_ms: 1500,
            labels: vec![
                "Grilled Chicken Salad".to_string(),
                "Avocado Toast".to_string(),
                "Spaghetti Bolognese".to_string(),
                "Chocolate Cake".to_string(),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::format::PixelFormat;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [camera]
            backend = "v4l2"
            device = "/dev/video2"

            [camera.output]
            format = "NV12"
            "#,
        )
        .unwrap();

        assert_eq!(config.camera.backend, CameraBackendKind::V4l2);
        assert_eq!(config.camera.device, Some(PathBuf::from("/dev/video2")));
        assert_eq!(config.camera.output.format, PixelFormat::Nv12);
        assert!(config.camera.output.discard_late_frames);
        assert_eq!(config.camera.position, CameraPosition::Back);
        assert_eq!(config.synthetic, SyntheticConfig::default());
        assert_eq!(config.scanner.labels.len(), 4);
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!("V4L2".parse::<CameraBackendKind>(), Ok(CameraBackendKind::V4l2));
        assert!("usb".parse::<CameraBackendKind>().is_err());
    }

    #[test]
    fn test_session_options() {
        let camera = CameraConfig {
            position: CameraPosition::Front,
            preset: SessionPreset::Low,
            ..Default::default()
        };
        let options = camera.session_options();
        assert_eq!(options.position, CameraPosition::Front);
        assert_eq!(options.preset, SessionPreset::Low);
        assert_eq!(options.output.format, PixelFormat::Bgra32);
    }
}
