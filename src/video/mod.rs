//! Video capture module
//!
//! Frame representation, deep copy, the latest-frame store and the capture
//! backends that feed it.

pub mod backend;
pub mod copy;
pub mod format;
pub mod frame;
pub mod store;
pub mod synthetic;
pub mod v4l2;

pub use backend::{
    CameraPosition, CaptureBackend, CaptureDeviceInfo, FrameSink, OutputSettings, SessionPreset,
    StopNotifier,
};
pub use copy::copy_frame;
pub use format::{PixelFormat, Resolution};
pub use frame::{CapturedFrame, FrameMeta, VideoFrame};
pub use store::FrameStore;
pub use synthetic::{SyntheticCamera, SyntheticConfig};
pub use v4l2::{V4l2Camera, V4l2Config};
