//! Video frame data structures
//!
//! Two views of a frame exist:
//! - [`CapturedFrame`] borrows the device's buffer and is only valid for the
//!   duration of the capture callback.
//! - [`VideoFrame`] owns its planes and can be stored, shared and read later.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;

use super::format::{PixelFormat, Resolution};

/// Platform hint about how a buffer should be backed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferBacking {
    /// Ordinary heap memory
    #[default]
    Heap,
    /// Buffer shareable with GPU/display surfaces
    Surface,
}

/// Per-frame metadata carried alongside pixel data
/// (color space, orientation, exposure and similar driver tags)
pub type FrameAttachments = BTreeMap<String, String>;

/// One borrowed plane of a captured frame
#[derive(Debug, Clone, Copy)]
pub struct PlaneRef<'a> {
    /// Plane memory starting at the first row
    pub data: &'a [u8],
    /// Bytes between the starts of two consecutive rows
    pub stride: usize,
    /// Number of rows
    pub height: usize,
}

/// A frame as handed over by the capture device
///
/// The underlying buffer is recycled by the device as soon as the callback
/// returns, so this type cannot outlive the callback.
#[derive(Debug, Clone)]
pub struct CapturedFrame<'a> {
    pub resolution: Resolution,
    pub format: PixelFormat,
    pub planes: Vec<PlaneRef<'a>>,
    pub attachments: &'a FrameAttachments,
    pub backing: BufferBacking,
    pub sequence: u64,
}

/// One owned plane
#[derive(Debug, Clone)]
pub struct Plane {
    data: Bytes,
    stride: usize,
    height: usize,
}

impl Plane {
    pub fn new(data: Bytes, stride: usize, height: usize) -> Self {
        Self {
            data,
            stride,
            height,
        }
    }

    /// Plane bytes (including row padding)
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Bytes per row including padding
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Number of rows
    pub fn height(&self) -> usize {
        self.height
    }

    /// Slice of one row, `len` bytes long
    pub fn row(&self, index: usize, len: usize) -> Option<&[u8]> {
        let start = index.checked_mul(self.stride)?;
        self.data.get(start..start.checked_add(len)?)
    }
}

/// An owned video frame with metadata
#[derive(Debug, Clone)]
pub struct VideoFrame {
    planes: Vec<Plane>,
    /// Frame resolution
    pub resolution: Resolution,
    /// Pixel format
    pub format: PixelFormat,
    /// Metadata propagated from the source buffer
    pub attachments: FrameAttachments,
    /// Backing hint preserved from the source buffer
    pub backing: BufferBacking,
    /// Frame sequence number
    pub sequence: u64,
    /// Timestamp when frame was captured
    pub capture_ts: Instant,
}

impl VideoFrame {
    /// Create a new video frame from already owned planes
    pub fn new(
        planes: Vec<Plane>,
        resolution: Resolution,
        format: PixelFormat,
        sequence: u64,
    ) -> Self {
        Self {
            planes,
            resolution,
            format,
            attachments: FrameAttachments::new(),
            backing: BufferBacking::Heap,
            sequence,
            capture_ts: Instant::now(),
        }
    }

    /// Build a tightly packed single-plane frame from a Vec<u8>
    pub fn packed(data: Vec<u8>, resolution: Resolution, format: PixelFormat, sequence: u64) -> Self {
        let stride = format
            .plane_layouts(resolution)
            .first()
            .map(|p| p.row_bytes)
            .unwrap_or(0);
        let height = resolution.height as usize;
        Self::new(
            vec![Plane::new(Bytes::from(data), stride, height)],
            resolution,
            format,
            sequence,
        )
    }

    /// All planes in order
    pub fn planes(&self) -> &[Plane] {
        &self.planes
    }

    /// Get a plane by index
    pub fn plane(&self, index: usize) -> Option<&Plane> {
        self.planes.get(index)
    }

    /// Whether the frame has several planes
    pub fn is_planar(&self) -> bool {
        self.planes.len() > 1
    }

    /// Get width
    pub fn width(&self) -> u32 {
        self.resolution.width
    }

    /// Get height
    pub fn height(&self) -> u32 {
        self.resolution.height
    }

    /// Total bytes held by all planes
    pub fn len(&self) -> usize {
        self.planes.iter().map(|p| p.data.len()).sum()
    }

    /// Check if frame holds no pixel data
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get age of this frame (time since capture)
    pub fn age(&self) -> std::time::Duration {
        self.capture_ts.elapsed()
    }

    /// Check if this frame is still fresh (within threshold)
    pub fn is_fresh(&self, max_age_ms: u64) -> bool {
        self.age().as_millis() < max_age_ms as u128
    }

    /// Borrow this frame as a capture-side view
    pub fn as_captured(&self) -> CapturedFrame<'_> {
        CapturedFrame {
            resolution: self.resolution,
            format: self.format,
            planes: self
                .planes
                .iter()
                .map(|p| PlaneRef {
                    data: p.data(),
                    stride: p.stride,
                    height: p.height,
                })
                .collect(),
            attachments: &self.attachments,
            backing: self.backing,
            sequence: self.sequence,
        }
    }
}

/// Frame metadata without actual data (for logging/stats)
#[derive(Debug, Clone, Serialize)]
pub struct FrameMeta {
    pub resolution: Resolution,
    pub format: PixelFormat,
    pub size: usize,
    pub planes: usize,
    pub sequence: u64,
    pub age_ms: u64,
}

impl From<&VideoFrame> for FrameMeta {
    fn from(frame: &VideoFrame) -> Self {
        Self {
            resolution: frame.resolution,
            format: frame.format,
            size: frame.len(),
            planes: frame.planes.len(),
            sequence: frame.sequence,
            age_ms: frame.age().as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packed_frame() {
        let res = Resolution::new(4, 2);
        let frame = VideoFrame::packed(vec![7u8; 32], res, PixelFormat::Bgra32, 3);
        assert_eq!(frame.planes().len(), 1);
        assert_eq!(frame.plane(0).map(|p| p.stride()), Some(16));
        assert_eq!(frame.len(), 32);
        assert!(!frame.is_planar());
        assert_eq!(frame.plane(0).and_then(|p| p.row(1, 16)), Some(&[7u8; 16][..]));
    }

    #[test]
    fn test_row_out_of_bounds() {
        let plane = Plane::new(Bytes::from_static(&[1, 2, 3, 4]), 2, 2);
        assert_eq!(plane.row(1, 2), Some(&[3u8, 4][..]));
        assert_eq!(plane.row(2, 2), None);
        assert_eq!(plane.row(1, 3), None);
    }

    #[test]
    fn test_as_captured_roundtrip_geometry() {
        let mut frame = VideoFrame::packed(vec![0u8; 12], Resolution::new(2, 2), PixelFormat::Rgb24, 9);
        frame.attachments.insert("colorspace".into(), "srgb".into());
        let captured = frame.as_captured();
        assert_eq!(captured.planes.len(), 1);
        assert_eq!(captured.planes[0].stride, 6);
        assert_eq!(captured.planes[0].height, 2);
        assert_eq!(captured.attachments.get("colorspace").map(String::as_str), Some("srgb"));
        assert_eq!(captured.sequence, 9);
    }
}
