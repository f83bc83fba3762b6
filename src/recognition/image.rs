//! Still images handed to recognizers
//!
//! Recognizers take a tightly packed RGB24 image regardless of the layout the
//! camera delivered. YUV sources are converted with BT.601 limited-range
//! coefficients.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::video::format::{PixelFormat, Resolution};
use crate::video::frame::VideoFrame;

/// Packed RGB24 still image
#[derive(Debug, Clone, Serialize)]
pub struct StillImage {
    pub resolution: Resolution,
    /// Sequence number of the source frame
    pub sequence: u64,
    pub captured_at: DateTime<Utc>,
    #[serde(skip)]
    rgb: Vec<u8>,
}

impl StillImage {
    /// Build from packed RGB24 bytes; `None` if the length does not match
    pub fn from_rgb(rgb: Vec<u8>, resolution: Resolution) -> Option<Self> {
        if rgb.len() != resolution.pixels() as usize * 3 {
            return None;
        }
        Some(Self {
            resolution,
            sequence: 0,
            captured_at: Utc::now(),
            rgb,
        })
    }

    /// Convert a captured frame
    ///
    /// Returns `None` if the frame's planes are shorter than its format
    /// requires.
    pub fn from_frame(frame: &VideoFrame) -> Option<Self> {
        let resolution = frame.resolution;
        if !resolution.is_valid() {
            return None;
        }
        let width = resolution.width as usize;
        let height = resolution.height as usize;
        let layouts = frame.format.plane_layouts(resolution);
        if frame.planes().len() != layouts.len() {
            return None;
        }

        let mut rgb = Vec::with_capacity(width * height * 3);
        for y in 0..height {
            match frame.format {
                PixelFormat::Bgra32 => {
                    let row = frame.plane(0)?.row(y, layouts[0].row_bytes)?;
                    for px in row.chunks_exact(4) {
                        rgb.extend_from_slice(&[px[2], px[1], px[0]]);
                    }
                }
                PixelFormat::Rgb24 => {
                    rgb.extend_from_slice(frame.plane(0)?.row(y, layouts[0].row_bytes)?);
                }
                PixelFormat::Bgr24 => {
                    let row = frame.plane(0)?.row(y, layouts[0].row_bytes)?;
                    for px in row.chunks_exact(3) {
                        rgb.extend_from_slice(&[px[2], px[1], px[0]]);
                    }
                }
                PixelFormat::Grey => {
                    let row = frame.plane(0)?.row(y, layouts[0].row_bytes)?;
                    for &luma in row {
                        rgb.extend_from_slice(&[luma, luma, luma]);
                    }
                }
                PixelFormat::Yuyv | PixelFormat::Uyvy => {
                    let row = frame.plane(0)?.row(y, layouts[0].row_bytes)?;
                    let uyvy = frame.format == PixelFormat::Uyvy;
                    for x in 0..width {
                        let pair = &row[(x / 2) * 4..(x / 2) * 4 + 4];
                        let (y0, u, y1, v) = if uyvy {
                            (pair[1], pair[0], pair[3], pair[2])
                        } else {
                            (pair[0], pair[1], pair[2], pair[3])
                        };
                        let luma = if x % 2 == 0 { y0 } else { y1 };
                        rgb.extend_from_slice(&yuv_to_rgb(luma, u, v));
                    }
                }
                PixelFormat::Nv12 => {
                    let luma = frame.plane(0)?.row(y, layouts[0].row_bytes)?;
                    let chroma = frame.plane(1)?.row(y / 2, layouts[1].row_bytes)?;
                    for x in 0..width {
                        let c = (x / 2) * 2;
                        rgb.extend_from_slice(&yuv_to_rgb(luma[x], chroma[c], chroma[c + 1]));
                    }
                }
                PixelFormat::Yuv420 => {
                    let luma = frame.plane(0)?.row(y, layouts[0].row_bytes)?;
                    let u = frame.plane(1)?.row(y / 2, layouts[1].row_bytes)?;
                    let v = frame.plane(2)?.row(y / 2, layouts[2].row_bytes)?;
                    for x in 0..width {
                        rgb.extend_from_slice(&yuv_to_rgb(luma[x], u[x / 2], v[x / 2]));
                    }
                }
            }
        }

        Some(Self {
            resolution,
            sequence: frame.sequence,
            captured_at: Utc::now(),
            rgb,
        })
    }

    pub fn width(&self) -> u32 {
        self.resolution.width
    }

    pub fn height(&self) -> u32 {
        self.resolution.height
    }

    /// Packed RGB24 pixels, row-major, no padding
    pub fn rgb(&self) -> &[u8] {
        &self.rgb
    }

    /// RGB of one pixel
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.resolution.width || y >= self.resolution.height {
            return None;
        }
        let i = (y as usize * self.resolution.width as usize + x as usize) * 3;
        Some([self.rgb[i], self.rgb[i + 1], self.rgb[i + 2]])
    }
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| x.clamp(0, 255) as u8;
    [
        clamp((298 * c + 409 * e + 128) >> 8),
        clamp((298 * c - 100 * d - 208 * e + 128) >> 8),
        clamp((298 * c + 516 * d + 128) >> 8),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::copy::copy_frame;
    use crate::video::frame::{BufferBacking, CapturedFrame, FrameAttachments, PlaneRef};

    #[test]
    fn test_bgra_swaps_channels() {
        let frame = VideoFrame::packed(
            vec![10, 20, 30, 255, 1, 2, 3, 255],
            Resolution::new(2, 1),
            PixelFormat::Bgra32,
            1,
        );
        let image = StillImage::from_frame(&frame).unwrap();
        assert_eq!(image.rgb(), &[30, 20, 10, 3, 2, 1]);
    }

    #[test]
    fn test_yuv_reference_colors() {
        assert_eq!(yuv_to_rgb(16, 128, 128), [0, 0, 0]);
        assert_eq!(yuv_to_rgb(235, 128, 128), [255, 255, 255]);
        let red = yuv_to_rgb(81, 90, 240);
        assert!(red[0] > 250 && red[1] < 5 && red[2] < 5);
    }

    #[test]
    fn test_nv12_honors_padded_strides() {
        // 4x2 NV12 delivered with 8-byte strides, then copied to aligned planes
        let y = [
            235, 235, 16, 16, 0, 0, 0, 0, //
            235, 235, 16, 16, 0, 0, 0, 0,
        ];
        let uv = [128, 128, 128, 128, 9, 9, 9, 9];
        let attachments = FrameAttachments::new();
        let captured = CapturedFrame {
            resolution: Resolution::new(4, 2),
            format: PixelFormat::Nv12,
            planes: vec![
                PlaneRef {
                    data: &y,
                    stride: 8,
                    height: 2,
                },
                PlaneRef {
                    data: &uv,
                    stride: 8,
                    height: 1,
                },
            ],
            attachments: &attachments,
            backing: BufferBacking::Heap,
            sequence: 3,
        };
        let frame = copy_frame(&captured).unwrap();
        let image = StillImage::from_frame(&frame).unwrap();

        assert_eq!(image.sequence, 3);
        assert_eq!(image.rgb().len(), 4 * 2 * 3);
        assert_eq!(image.pixel(0, 1), Some([255, 255, 255]));
        assert_eq!(image.pixel(3, 0), Some([0, 0, 0]));
        assert_eq!(image.pixel(4, 0), None);
    }

    #[test]
    fn test_yuyv_odd_width() {
        // 3 pixels need two YUYV pairs
        let frame = VideoFrame::packed(
            vec![235, 128, 16, 128, 235, 128, 0, 128],
            Resolution::new(3, 1),
            PixelFormat::Yuyv,
            1,
        );
        let image = StillImage::from_frame(&frame).unwrap();
        assert_eq!(image.pixel(0, 0), Some([255, 255, 255]));
        assert_eq!(image.pixel(1, 0), Some([0, 0, 0]));
        assert_eq!(image.pixel(2, 0), Some([255, 255, 255]));
    }

    #[test]
    fn test_short_plane_is_rejected() {
        let frame = VideoFrame::packed(vec![0; 5], Resolution::new(2, 2), PixelFormat::Rgb24, 1);
        assert!(StillImage::from_frame(&frame).is_none());
    }

    #[test]
    fn test_from_rgb_checks_length() {
        assert!(StillImage::from_rgb(vec![0; 12], Resolution::new(2, 2)).is_some());
        assert!(StillImage::from_rgb(vec![0; 11], Resolution::new(2, 2)).is_none());
    }
}
