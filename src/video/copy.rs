//! Deep copy of captured frames
//!
//! Capture devices recycle their buffers as soon as the delivery callback
//! returns. Anything that wants to keep a frame past that point has to copy it
//! into memory it owns, plane by plane and row by row, because source and
//! destination strides are chosen independently.

use bytes::Bytes;

use super::frame::{CapturedFrame, Plane, PlaneRef, VideoFrame};

/// A freshly allocated destination plane
struct DestinationPlane {
    data: Vec<u8>,
    stride: usize,
    row_bytes: usize,
    rows: usize,
}

/// Copy a captured frame into a newly allocated, independently owned frame
///
/// The destination has the same resolution, pixel format and backing hint as
/// the source, carries the source attachments, and uses its own aligned
/// strides. Each row copies `min(source stride, destination stride)` bytes.
///
/// Returns `None` when the destination cannot be allocated or the source
/// planes do not describe readable memory. A partially copied frame is never
/// returned; callers skip the frame instead.
pub fn copy_frame(source: &CapturedFrame<'_>) -> Option<VideoFrame> {
    if !source.resolution.is_valid() || source.planes.len() != source.format.plane_count() {
        return None;
    }

    let mut destination = allocate_destination(source)?;

    for (src, dst) in source.planes.iter().zip(destination.iter_mut()) {
        copy_plane(src, dst)?;
    }

    let planes = destination
        .into_iter()
        .map(|p| Plane::new(Bytes::from(p.data), p.stride, p.rows))
        .collect();

    let mut frame = VideoFrame::new(planes, source.resolution, source.format, source.sequence);
    frame.attachments = source.attachments.clone();
    frame.backing = source.backing;
    Some(frame)
}

fn allocate_destination(source: &CapturedFrame<'_>) -> Option<Vec<DestinationPlane>> {
    source
        .format
        .plane_layouts(source.resolution)
        .into_iter()
        .map(|layout| {
            let stride = layout.aligned_stride();
            let len = stride.checked_mul(layout.rows)?;

            let mut data = Vec::new();
            data.try_reserve_exact(len).ok()?;
            data.resize(len, 0);

            Some(DestinationPlane {
                data,
                stride,
                row_bytes: layout.row_bytes,
                rows: layout.rows,
            })
        })
        .collect()
}

fn copy_plane(source: &PlaneRef<'_>, destination: &mut DestinationPlane) -> Option<()> {
    // Row count comes from the source plane; it must fit the destination.
    if source.height > destination.rows || source.stride < destination.row_bytes {
        return None;
    }

    let bytes_per_row = source.stride.min(destination.stride);
    copy_rows(
        source.data,
        source.stride,
        &mut destination.data,
        destination.stride,
        source.height,
        bytes_per_row,
    )
}

/// Copy `rows` rows of `bytes_per_row` bytes between two strided buffers
///
/// Both buffers are bounds-checked up front; nothing is written unless every
/// row fits in both.
pub(crate) fn copy_rows(
    src: &[u8],
    src_stride: usize,
    dst: &mut [u8],
    dst_stride: usize,
    rows: usize,
    bytes_per_row: usize,
) -> Option<()> {
    if rows == 0 {
        return Some(());
    }
    if bytes_per_row > src_stride || bytes_per_row > dst_stride {
        return None;
    }

    let src_needed = (rows - 1).checked_mul(src_stride)?.checked_add(bytes_per_row)?;
    let dst_needed = (rows - 1).checked_mul(dst_stride)?.checked_add(bytes_per_row)?;
    if src.len() < src_needed || dst.len() < dst_needed {
        return None;
    }

    for row in 0..rows {
        let s = row * src_stride;
        let d = row * dst_stride;
        dst[d..d + bytes_per_row].copy_from_slice(&src[s..s + bytes_per_row]);
    }

    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::format::{PixelFormat, Resolution};
    use crate::video::frame::{BufferBacking, FrameAttachments};

    fn patterned(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
    }

    #[test]
    fn test_packed_copy_with_wider_source_stride() {
        // 40 px BGRA = 160 row bytes; destination aligns to 192, source uses 256
        let res = Resolution::new(40, 4);
        let src = patterned(256 * 4, 1);
        let attachments = FrameAttachments::new();
        let frame = CapturedFrame {
            resolution: res,
            format: PixelFormat::Bgra32,
            planes: vec![PlaneRef {
                data: &src,
                stride: 256,
                height: 4,
            }],
            attachments: &attachments,
            backing: BufferBacking::Heap,
            sequence: 1,
        };

        let copy = copy_frame(&frame).expect("copy");
        let plane = copy.plane(0).expect("plane");
        assert_eq!(plane.stride(), 192);
        for row in 0..4 {
            assert_eq!(
                plane.row(row, 192).expect("row"),
                &src[row * 256..row * 256 + 192]
            );
        }
    }

    #[test]
    fn test_packed_copy_with_narrower_source_stride() {
        let res = Resolution::new(40, 3);
        let src = patterned(160 * 3, 5);
        let attachments = FrameAttachments::new();
        let frame = CapturedFrame {
            resolution: res,
            format: PixelFormat::Bgra32,
            planes: vec![PlaneRef {
                data: &src,
                stride: 160,
                height: 3,
            }],
            attachments: &attachments,
            backing: BufferBacking::Heap,
            sequence: 2,
        };

        let copy = copy_frame(&frame).expect("copy");
        let plane = copy.plane(0).expect("plane");
        for row in 0..3 {
            let dst_row = plane.row(row, 192).expect("row");
            assert_eq!(&dst_row[..160], &src[row * 160..row * 160 + 160]);
            // Only min(stride) bytes are written; padding stays zeroed
            assert!(dst_row[160..].iter().all(|b| *b == 0));
        }
    }

    #[test]
    fn test_planar_copy_uses_per_plane_strides() {
        // NV12 8x4: Y 8 bytes x 4 rows, UV 8 bytes x 2 rows
        let res = Resolution::new(8, 4);
        let y = patterned(100 * 4, 3);
        let uv = patterned(72 * 2, 9);
        let attachments = FrameAttachments::new();
        let frame = CapturedFrame {
            resolution: res,
            format: PixelFormat::Nv12,
            planes: vec![
                PlaneRef {
                    data: &y,
                    stride: 100,
                    height: 4,
                },
                PlaneRef {
                    data: &uv,
                    stride: 72,
                    height: 2,
                },
            ],
            attachments: &attachments,
            backing: BufferBacking::Surface,
            sequence: 3,
        };

        let copy = copy_frame(&frame).expect("copy");
        assert!(copy.is_planar());
        assert_eq!(copy.backing, BufferBacking::Surface);

        let y_plane = copy.plane(0).expect("y");
        let uv_plane = copy.plane(1).expect("uv");
        assert_eq!(y_plane.stride(), 64);
        assert_eq!(uv_plane.stride(), 64);
        assert_eq!(y_plane.height(), 4);
        assert_eq!(uv_plane.height(), 2);

        for row in 0..4 {
            assert_eq!(y_plane.row(row, 64).expect("row"), &y[row * 100..row * 100 + 64]);
        }
        for row in 0..2 {
            assert_eq!(uv_plane.row(row, 64).expect("row"), &uv[row * 72..row * 72 + 64]);
        }
    }

    #[test]
    fn test_short_source_buffer_is_rejected() {
        let res = Resolution::new(40, 4);
        // Last row is missing half its bytes
        let src = vec![0u8; 160 * 3 + 80];
        let attachments = FrameAttachments::new();
        let frame = CapturedFrame {
            resolution: res,
            format: PixelFormat::Bgra32,
            planes: vec![PlaneRef {
                data: &src,
                stride: 160,
                height: 4,
            }],
            attachments: &attachments,
            backing: BufferBacking::Heap,
            sequence: 4,
        };
        assert!(copy_frame(&frame).is_none());
    }

    #[test]
    fn test_missing_plane_is_rejected() {
        let res = Resolution::new(8, 4);
        let y = vec![0u8; 8 * 4];
        let attachments = FrameAttachments::new();
        let frame = CapturedFrame {
            resolution: res,
            format: PixelFormat::Nv12,
            planes: vec![PlaneRef {
                data: &y,
                stride: 8,
                height: 4,
            }],
            attachments: &attachments,
            backing: BufferBacking::Heap,
            sequence: 5,
        };
        assert!(copy_frame(&frame).is_none());
    }

    #[test]
    fn test_empty_base_address_is_rejected() {
        let attachments = FrameAttachments::new();
        let frame = CapturedFrame {
            resolution: Resolution::new(4, 4),
            format: PixelFormat::Grey,
            planes: vec![PlaneRef {
                data: &[],
                stride: 4,
                height: 4,
            }],
            attachments: &attachments,
            backing: BufferBacking::Heap,
            sequence: 6,
        };
        assert!(copy_frame(&frame).is_none());
    }

    #[test]
    fn test_attachments_and_sequence_propagate() {
        let src = vec![42u8; 16];
        let mut attachments = FrameAttachments::new();
        attachments.insert("orientation".into(), "90".into());
        let frame = CapturedFrame {
            resolution: Resolution::new(4, 4),
            format: PixelFormat::Grey,
            planes: vec![PlaneRef {
                data: &src,
                stride: 4,
                height: 4,
            }],
            attachments: &attachments,
            backing: BufferBacking::Heap,
            sequence: 77,
        };

        let copy = copy_frame(&frame).expect("copy");
        assert_eq!(copy.sequence, 77);
        assert_eq!(copy.attachments.get("orientation").map(String::as_str), Some("90"));
        assert_eq!(copy.format, PixelFormat::Grey);
        assert_eq!(copy.resolution, Resolution::new(4, 4));
    }

    #[test]
    fn test_copy_rows_never_writes_on_overflow() {
        let src = vec![1u8; 10];
        let mut dst = vec![0u8; 10];
        assert!(copy_rows(&src, 4, &mut dst, 4, 3, 4).is_none());
        assert!(dst.iter().all(|b| *b == 0));
        assert!(copy_rows(&src, 4, &mut dst, 4, 3, 2).is_some());
        assert_eq!(&dst[..2], &[1, 1]);
        assert_eq!(&dst[8..10], &[1, 1]);
    }
}
