//! Capture backend abstraction
//!
//! A backend models one device capture session: a graph with at most one
//! video input and one frame output, edited inside a begin/commit bracket,
//! plus blocking start/stop of the hardware pipeline.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::copy::copy_frame;
use super::format::PixelFormat;
use super::frame::CapturedFrame;
use super::store::FrameStore;
use crate::error::Result;
use crate::utils::LogThrottler;

/// Which side of the device a camera faces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraPosition {
    #[default]
    Back,
    Front,
    /// Position not reported (typical for USB cameras)
    Unspecified,
}

/// Session quality preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPreset {
    #[default]
    High,
    Medium,
    Low,
}

impl SessionPreset {
    /// Target resolution for this preset
    pub fn resolution(&self) -> super::format::Resolution {
        use super::format::Resolution;
        match self {
            SessionPreset::High => Resolution::HD1080,
            SessionPreset::Medium => Resolution::HD720,
            SessionPreset::Low => Resolution::VGA,
        }
    }
}

/// A discoverable capture device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureDeviceInfo {
    /// Stable identifier (device path for V4L2)
    pub id: String,
    /// Human readable name
    pub name: String,
    pub position: CameraPosition,
}

/// Frame output configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Pixel format requested from the device
    pub format: PixelFormat,
    /// Drop frames that arrive while the sink is still busy
    pub discard_late_frames: bool,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            format: PixelFormat::Bgra32,
            discard_late_frames: true,
        }
    }
}

/// Device capture session
///
/// Graph edits (`add_*`/`remove_input`) are only made between
/// `begin_configuration` and `commit_configuration`. `start_running` and
/// `stop_running` block until the hardware settles and are expected to be
/// called from a blocking-capable thread.
pub trait CaptureBackend: Send + Sync + 'static {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    fn begin_configuration(&self);

    fn commit_configuration(&self);

    fn set_preset(&self, preset: SessionPreset);

    /// Find the default video device at `position`
    fn default_device(&self, position: CameraPosition) -> Option<CaptureDeviceInfo>;

    /// Validate that the device can be opened as an input
    fn open_input(&self, device: &CaptureDeviceInfo) -> Result<()>;

    fn can_add_input(&self, device: &CaptureDeviceInfo) -> bool;

    fn can_add_output(&self, settings: &OutputSettings) -> bool;

    fn add_input(&self, device: &CaptureDeviceInfo) -> Result<()>;

    fn remove_input(&self, device: &CaptureDeviceInfo);

    /// Attach the frame output; `sink` is invoked on the backend's own
    /// capture thread for every delivered frame, and told through
    /// [`FrameSink::device_stopped`] when the pipeline stops unrequested
    fn add_output(&self, settings: &OutputSettings, sink: FrameSink) -> Result<()>;

    /// Start the pipeline; may fail silently, check `is_running` afterwards
    fn start_running(&self);

    fn stop_running(&self);

    fn is_running(&self) -> bool;
}

/// Called with a reason when the device stops without being asked to
pub type StopNotifier = Arc<dyn Fn(&str) + Send + Sync>;

/// Receives frames on the capture thread and parks a deep copy in the store
///
/// Only touches the [`FrameStore`]; it never reaches into controller state.
/// Device-side stops are reported through the optional [`StopNotifier`].
#[derive(Clone)]
pub struct FrameSink {
    store: Arc<FrameStore>,
    stats: Arc<SinkStats>,
    throttler: Arc<LogThrottler>,
    on_stop: Option<StopNotifier>,
}

/// Delivery counters
#[derive(Debug, Default)]
pub struct SinkStats {
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl SinkStats {
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl FrameSink {
    pub fn new(store: Arc<FrameStore>) -> Self {
        Self {
            store,
            stats: Arc::new(SinkStats::default()),
            throttler: Arc::new(LogThrottler::with_secs(5)),
            on_stop: None,
        }
    }

    /// Report device-side stops to `notifier`
    pub fn with_stop_notifier(mut self, notifier: StopNotifier) -> Self {
        self.on_stop = Some(notifier);
        self
    }

    /// The pipeline stopped on its own (device lost, halted by the system)
    pub fn device_stopped(&self, reason: &str) {
        match &self.on_stop {
            Some(notify) => notify(reason),
            None => debug!("Device stopped with nobody listening: {}", reason),
        }
    }

    /// Copy one captured frame into the store, or skip it if the copy fails
    pub fn deliver(&self, frame: &CapturedFrame<'_>) {
        match copy_frame(frame) {
            Some(copy) => {
                self.store.put(copy);
                self.stats.delivered.fetch_add(1, Ordering::Relaxed);
            }
            None => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                if let Some(suppressed) = self.throttler.admit("frame_copy_failed") {
                    warn!(
                        "Dropping frame #{} ({} {}): copy failed (suppressed {} repeats)",
                        frame.sequence, frame.format, frame.resolution, suppressed
                    );
                } else {
                    debug!("Dropping frame #{}: copy failed", frame.sequence);
                }
            }
        }
    }

    pub fn stats(&self) -> &SinkStats {
        &self.stats
    }

    pub fn store(&self) -> &Arc<FrameStore> {
        &self.store
    }
}
