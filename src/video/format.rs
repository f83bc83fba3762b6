//! Pixel format definitions and plane geometry

use serde::{Deserialize, Serialize};
use std::fmt;
use v4l::format::fourcc;

/// Row alignment used when allocating frame buffers
pub const STRIDE_ALIGNMENT: usize = 64;

/// Supported (uncompressed) pixel formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PixelFormat {
    /// 32-bit BGRA packed format (camera preview default)
    Bgra32,
    /// RGB24 format (3 bytes per pixel)
    Rgb24,
    /// BGR24 format (3 bytes per pixel)
    Bgr24,
    /// YUYV 4:2:2 packed format
    Yuyv,
    /// UYVY 4:2:2 packed format
    Uyvy,
    /// NV12 semi-planar format (Y plane + interleaved UV)
    Nv12,
    /// YUV420 planar format (Y, U, V planes)
    Yuv420,
    /// Grayscale format
    Grey,
}

/// Geometry of one plane for a given resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneLayout {
    /// Meaningful bytes in one row (without padding)
    pub row_bytes: usize,
    /// Number of rows in the plane
    pub rows: usize,
}

impl PlaneLayout {
    /// Stride of a freshly allocated plane (row bytes rounded up to the alignment)
    pub fn aligned_stride(&self) -> usize {
        align_up(self.row_bytes, STRIDE_ALIGNMENT)
    }
}

/// Round `value` up to a multiple of `align` (power of two)
pub fn align_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

impl PixelFormat {
    /// Convert to V4L2 FourCC
    pub fn to_fourcc(&self) -> fourcc::FourCC {
        match self {
            PixelFormat::Bgra32 => fourcc::FourCC::new(b"AR24"),
            PixelFormat::Rgb24 => fourcc::FourCC::new(b"RGB3"),
            PixelFormat::Bgr24 => fourcc::FourCC::new(b"BGR3"),
            PixelFormat::Yuyv => fourcc::FourCC::new(b"YUYV"),
            PixelFormat::Uyvy => fourcc::FourCC::new(b"UYVY"),
            PixelFormat::Nv12 => fourcc::FourCC::new(b"NV12"),
            PixelFormat::Yuv420 => fourcc::FourCC::new(b"YU12"),
            PixelFormat::Grey => fourcc::FourCC::new(b"GREY"),
        }
    }

    /// Try to convert from V4L2 FourCC
    pub fn from_fourcc(fourcc: fourcc::FourCC) -> Option<Self> {
        let repr = fourcc.repr;
        match &repr {
            b"AR24" | b"BGR4" => Some(PixelFormat::Bgra32),
            b"RGB3" => Some(PixelFormat::Rgb24),
            b"BGR3" => Some(PixelFormat::Bgr24),
            b"YUYV" => Some(PixelFormat::Yuyv),
            b"UYVY" => Some(PixelFormat::Uyvy),
            b"NV12" => Some(PixelFormat::Nv12),
            b"YU12" | b"I420" => Some(PixelFormat::Yuv420),
            b"GREY" | b"Y800" => Some(PixelFormat::Grey),
            _ => None,
        }
    }

    /// Whether the format stores its samples in more than one plane
    pub fn is_planar(&self) -> bool {
        self.plane_count() > 1
    }

    /// Number of memory planes
    pub fn plane_count(&self) -> usize {
        match self {
            PixelFormat::Nv12 => 2,
            PixelFormat::Yuv420 => 3,
            _ => 1,
        }
    }

    /// Bytes per pixel for packed formats
    /// Returns None for planar formats
    pub fn bytes_per_pixel(&self) -> Option<usize> {
        match self {
            PixelFormat::Bgra32 => Some(4),
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => Some(3),
            PixelFormat::Yuyv | PixelFormat::Uyvy => Some(2),
            PixelFormat::Grey => Some(1),
            PixelFormat::Nv12 | PixelFormat::Yuv420 => None,
        }
    }

    /// Per-plane geometry for a resolution
    ///
    /// Chroma planes of 4:2:0 formats round odd dimensions up.
    pub fn plane_layouts(&self, resolution: Resolution) -> Vec<PlaneLayout> {
        let width = resolution.width as usize;
        let height = resolution.height as usize;
        let chroma_width = width.div_ceil(2);
        let chroma_height = height.div_ceil(2);

        match self {
            PixelFormat::Nv12 => vec![
                PlaneLayout {
                    row_bytes: width,
                    rows: height,
                },
                PlaneLayout {
                    row_bytes: chroma_width * 2,
                    rows: chroma_height,
                },
            ],
            PixelFormat::Yuv420 => vec![
                PlaneLayout {
                    row_bytes: width,
                    rows: height,
                },
                PlaneLayout {
                    row_bytes: chroma_width,
                    rows: chroma_height,
                },
                PlaneLayout {
                    row_bytes: chroma_width,
                    rows: chroma_height,
                },
            ],
            PixelFormat::Yuyv | PixelFormat::Uyvy => vec![PlaneLayout {
                row_bytes: chroma_width * 4,
                rows: height,
            }],
            packed => vec![PlaneLayout {
                row_bytes: width * packed.bytes_per_pixel().unwrap_or(1),
                rows: height,
            }],
        }
    }

    /// Size of a tightly packed frame (no row padding)
    pub fn frame_size(&self, resolution: Resolution) -> usize {
        self.plane_layouts(resolution)
            .iter()
            .map(|p| p.row_bytes * p.rows)
            .sum()
    }

    /// Get priority for capture format negotiation (higher is better)
    ///
    /// Formats that copy cheaply and convert directly for recognition win.
    pub fn priority(&self) -> u8 {
        match self {
            PixelFormat::Bgra32 => 100,
            PixelFormat::Nv12 => 90,
            PixelFormat::Yuv420 => 85,
            PixelFormat::Yuyv => 80,
            PixelFormat::Uyvy => 75,
            PixelFormat::Rgb24 => 60,
            PixelFormat::Bgr24 => 59,
            PixelFormat::Grey => 10,
        }
    }

    /// Get all supported formats
    pub fn all() -> &'static [PixelFormat] {
        &[
            PixelFormat::Bgra32,
            PixelFormat::Rgb24,
            PixelFormat::Bgr24,
            PixelFormat::Yuyv,
            PixelFormat::Uyvy,
            PixelFormat::Nv12,
            PixelFormat::Yuv420,
            PixelFormat::Grey,
        ]
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelFormat::Bgra32 => "BGRA32",
            PixelFormat::Rgb24 => "RGB24",
            PixelFormat::Bgr24 => "BGR24",
            PixelFormat::Yuyv => "YUYV",
            PixelFormat::Uyvy => "UYVY",
            PixelFormat::Nv12 => "NV12",
            PixelFormat::Yuv420 => "YUV420",
            PixelFormat::Grey => "GREY",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for PixelFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "BGRA32" | "BGRA" => Ok(PixelFormat::Bgra32),
            "RGB24" => Ok(PixelFormat::Rgb24),
            "BGR24" => Ok(PixelFormat::Bgr24),
            "YUYV" => Ok(PixelFormat::Yuyv),
            "UYVY" => Ok(PixelFormat::Uyvy),
            "NV12" => Ok(PixelFormat::Nv12),
            "YUV420" | "I420" => Ok(PixelFormat::Yuv420),
            "GREY" | "GRAY" => Ok(PixelFormat::Grey),
            _ => Err(format!("Unknown pixel format: {}", s)),
        }
    }
}

/// Resolution (width x height)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Check if resolution is usable
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.width <= 15360 && self.height > 0 && self.height <= 8640
    }

    /// Get total pixels
    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Common resolutions
    pub const VGA: Resolution = Resolution {
        width: 640,
        height: 480,
    };
    pub const HD720: Resolution = Resolution {
        width: 1280,
        height: 720,
    };
    pub const HD1080: Resolution = Resolution {
        width: 1920,
        height: 1080,
    };
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl From<(u32, u32)> for Resolution {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}
