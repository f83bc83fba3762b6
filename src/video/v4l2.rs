//! V4L2 capture backend
//!
//! Device discovery follows the usual `/dev/video*` scan; streaming uses the
//! driver's mmap buffers on a dedicated thread and hands each dequeued buffer
//! to the frame sink before it is re-queued.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use tracing::{debug, info, warn};
use v4l::buffer::Type;
use v4l::capability::Flags;
use v4l::io::mmap::Stream as MmapStream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::Format;

use super::backend::{
    CameraPosition, CaptureBackend, CaptureDeviceInfo, FrameSink, OutputSettings, SessionPreset,
};
use super::format::{PixelFormat, Resolution};
use super::frame::{BufferBacking, CapturedFrame, FrameAttachments, PlaneRef};
use crate::error::{AppError, Result};
use crate::utils::LogThrottler;

/// Consecutive dequeue failures before the device is considered lost
const MAX_CONSECUTIVE_ERRORS: u32 = 10;

/// V4L2 backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct V4l2Config {
    /// Device node to use; `None` picks the best capture device
    pub device: Option<PathBuf>,
    /// Number of mmap buffers
    pub buffer_count: u32,
}

impl Default for V4l2Config {
    fn default() -> Self {
        Self {
            device: None,
            buffer_count: 4,
        }
    }
}

/// Summary of one capture-capable device node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct V4l2DeviceInfo {
    pub path: PathBuf,
    pub card: String,
    pub driver: String,
    pub bus_info: String,
    /// Uncompressed formats the driver offers that we can copy
    pub formats: Vec<PixelFormat>,
}

impl V4l2DeviceInfo {
    fn priority(&self) -> u32 {
        let best_format = self
            .formats
            .iter()
            .map(|f| f.priority() as u32)
            .max()
            .unwrap_or(0);
        let bonus = if self.driver.contains("uvcvideo") { 50 } else { 0 };
        best_format + bonus
    }

    fn to_capture_info(&self) -> CaptureDeviceInfo {
        CaptureDeviceInfo {
            id: self.path.display().to_string(),
            name: self.card.clone(),
            position: CameraPosition::Unspecified,
        }
    }
}

/// Query one device node; `None` if it is not a streaming capture device
pub fn probe_device(path: &Path) -> Result<Option<V4l2DeviceInfo>> {
    let device = Device::with_path(path)
        .map_err(|e| AppError::VideoError(format!("Failed to open device {:?}: {}", path, e)))?;
    let caps = device
        .query_caps()
        .map_err(|e| AppError::VideoError(format!("Failed to query capabilities: {}", e)))?;

    if !caps.capabilities.contains(Flags::VIDEO_CAPTURE)
        || !caps.capabilities.contains(Flags::STREAMING)
    {
        return Ok(None);
    }

    let formats = device
        .enum_formats()
        .map_err(|e| AppError::VideoError(format!("Failed to enumerate formats: {}", e)))?
        .into_iter()
        .filter_map(|desc| PixelFormat::from_fourcc(desc.fourcc))
        .collect();

    Ok(Some(V4l2DeviceInfo {
        path: path.to_path_buf(),
        card: caps.card,
        driver: caps.driver,
        bus_info: caps.bus,
        formats,
    }))
}

/// Enumerate capture devices, best first
pub fn enumerate_devices() -> Result<Vec<V4l2DeviceInfo>> {
    let mut devices = Vec::new();

    for entry in std::fs::read_dir("/dev")
        .map_err(|e| AppError::VideoError(format!("Failed to read /dev: {}", e)))?
    {
        let Ok(entry) = entry else { continue };
        let path = entry.path();
        let is_video = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("video"));
        if !is_video {
            continue;
        }

        match probe_device(&path) {
            Ok(Some(info)) => {
                debug!("Found capture device: {} ({:?})", info.card, info.path);
                devices.push(info);
            }
            Ok(None) => debug!("Skipping non-capture device: {:?}", path),
            Err(e) => debug!("Failed to probe {:?}: {}", path, e),
        }
    }

    devices.sort_by_key(|d| std::cmp::Reverse(d.priority()));
    info!("Found {} video capture devices", devices.len());
    Ok(devices)
}

#[derive(Default)]
struct Graph {
    configuring: bool,
    preset: SessionPreset,
    input: Option<CaptureDeviceInfo>,
    output: Option<(OutputSettings, FrameSink)>,
}

/// Camera backed by a V4L2 device node
pub struct V4l2Camera {
    config: V4l2Config,
    graph: Mutex<Graph>,
    running: Arc<AtomicBool>,
    stop_flag: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl V4l2Camera {
    pub fn new(config: V4l2Config) -> Self {
        Self {
            config,
            graph: Mutex::new(Graph::default()),
            running: Arc::new(AtomicBool::new(false)),
            stop_flag: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    fn join_worker(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                warn!("V4L2 capture thread panicked");
            }
        }
        self.running.store(false, Ordering::SeqCst);
    }
}

impl CaptureBackend for V4l2Camera {
    fn name(&self) -> &'static str {
        "v4l2"
    }

    fn begin_configuration(&self) {
        self.graph.lock().configuring = true;
    }

    fn commit_configuration(&self) {
        self.graph.lock().configuring = false;
    }

    fn set_preset(&self, preset: SessionPreset) {
        self.graph.lock().preset = preset;
    }

    fn default_device(&self, position: CameraPosition) -> Option<CaptureDeviceInfo> {
        if let Some(path) = &self.config.device {
            return match probe_device(path) {
                Ok(Some(info)) => Some(info.to_capture_info()),
                Ok(None) => {
                    warn!("{:?} is not a streaming capture device", path);
                    None
                }
                Err(e) => {
                    warn!("Configured camera unavailable: {}", e);
                    None
                }
            };
        }

        // V4L2 does not report facing; any capture device serves every position
        debug!("Looking up default V4L2 device for {:?} position", position);
        match enumerate_devices() {
            Ok(devices) => devices.first().map(V4l2DeviceInfo::to_capture_info),
            Err(e) => {
                warn!("Device enumeration failed: {}", e);
                None
            }
        }
    }

    fn open_input(&self, device: &CaptureDeviceInfo) -> Result<()> {
        match probe_device(Path::new(&device.id))? {
            Some(_) => Ok(()),
            None => Err(AppError::VideoError(format!(
                "{} does not support streaming capture",
                device.id
            ))),
        }
    }

    fn can_add_input(&self, _device: &CaptureDeviceInfo) -> bool {
        self.graph.lock().input.is_none()
    }

    fn can_add_output(&self, _settings: &OutputSettings) -> bool {
        self.graph.lock().output.is_none()
    }

    fn add_input(&self, device: &CaptureDeviceInfo) -> Result<()> {
        let mut graph = self.graph.lock();
        if !graph.configuring || graph.input.is_some() {
            return Err(AppError::VideoError("input slot unavailable".to_string()));
        }
        graph.input = Some(device.clone());
        Ok(())
    }

    fn remove_input(&self, device: &CaptureDeviceInfo) {
        let mut graph = self.graph.lock();
        if graph.input.as_ref() == Some(device) {
            graph.input = None;
        }
    }

    fn add_output(&self, settings: &OutputSettings, sink: FrameSink) -> Result<()> {
        let mut graph = self.graph.lock();
        if !graph.configuring || graph.output.is_some() {
            return Err(AppError::VideoError("output slot unavailable".to_string()));
        }
        graph.output = Some((settings.clone(), sink));
        Ok(())
    }

    fn start_running(&self) {
        if self.running.load(Ordering::SeqCst) {
            return;
        }
        // Reap a thread that exited on its own (device lost)
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }

        let (path, resolution, settings, sink) = {
            let graph = self.graph.lock();
            match (&graph.input, &graph.output) {
                (Some(input), Some((settings, sink))) => (
                    PathBuf::from(&input.id),
                    graph.preset.resolution(),
                    settings.clone(),
                    sink.clone(),
                ),
                _ => {
                    debug!("V4L2 graph incomplete, not starting");
                    return;
                }
            }
        };

        self.stop_flag.store(false, Ordering::SeqCst);
        let stop_flag = self.stop_flag.clone();
        let running = self.running.clone();
        let buffer_count = self.config.buffer_count.max(2);
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        let spawned = std::thread::Builder::new()
            .name("v4l2-capture".to_string())
            .spawn(move || {
                run_capture(
                    &path,
                    resolution,
                    &settings,
                    &sink,
                    buffer_count,
                    &stop_flag,
                    &running,
                    ready_tx,
                )
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Failed to spawn V4L2 capture thread: {}", e);
                return;
            }
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {
                *self.worker.lock() = Some(handle);
            }
            Ok(Err(e)) => {
                // Start failures leave the camera stopped; the controller
                // observes that through is_running()
                warn!("V4L2 capture failed to start: {}", e);
                let _ = handle.join();
            }
            Err(_) => {
                warn!("V4L2 capture thread exited before reporting readiness");
                let _ = handle.join();
            }
        }
    }

    fn stop_running(&self) {
        self.join_worker();
        info!("V4L2 capture stopped");
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for V4l2Camera {
    fn drop(&mut self) {
        self.join_worker();
    }
}

/// Negotiate the format, then stream until told to stop or the device fails
#[allow(clippy::too_many_arguments)]
fn run_capture(
    path: &Path,
    resolution: Resolution,
    settings: &OutputSettings,
    sink: &FrameSink,
    buffer_count: u32,
    stop_flag: &AtomicBool,
    running: &AtomicBool,
    ready: mpsc::Sender<Result<()>>,
) {
    let opened = open_stream(path, resolution, settings.format, buffer_count);
    let (device, mut stream, format) = match opened {
        Ok(parts) => parts,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let Some(pixel_format) = PixelFormat::from_fourcc(format.fourcc) else {
        let _ = ready.send(Err(AppError::VideoError(format!(
            "driver chose unsupported format {}",
            format.fourcc
        ))));
        return;
    };

    running.store(true, Ordering::SeqCst);
    let _ = ready.send(Ok(()));
    info!(
        "V4L2 capture started on {:?}: {}x{} {} stride={}",
        path, format.width, format.height, pixel_format, format.stride
    );

    let resolution = Resolution::new(format.width, format.height);
    let stride = format.stride as usize;
    let mut attachments = FrameAttachments::new();
    attachments.insert("device".to_string(), path.display().to_string());

    let throttler = LogThrottler::with_secs(5);
    let mut consecutive_errors = 0u32;
    let mut lost = None;

    while !stop_flag.load(Ordering::SeqCst) {
        let (buf, meta) = match stream.next() {
            Ok(item) => item,
            Err(e) => {
                consecutive_errors += 1;
                if throttler.should_log("dequeue") {
                    warn!("Failed to dequeue V4L2 buffer: {}", e);
                }
                if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                    let error = AppError::VideoDeviceLost {
                        device: path.display().to_string(),
                        reason: e.to_string(),
                    };
                    warn!("{}", error);
                    lost = Some(error);
                    break;
                }
                continue;
            }
        };
        consecutive_errors = 0;

        let used = (meta.bytesused as usize).min(buf.len());
        let data = if used > 0 { &buf[..used] } else { buf };
        let planes = split_planes(data, pixel_format, resolution, stride);

        sink.deliver(&CapturedFrame {
            resolution,
            format: pixel_format,
            planes,
            attachments: &attachments,
            backing: BufferBacking::Surface,
            sequence: meta.sequence as u64,
        });
    }

    drop(stream);
    drop(device);
    running.store(false, Ordering::SeqCst);
    debug!("V4L2 capture loop exited");

    if let Some(error) = lost {
        sink.device_stopped(&error.to_string());
    }
}

fn open_stream(
    path: &Path,
    resolution: Resolution,
    format: PixelFormat,
    buffer_count: u32,
) -> Result<(Device, MmapStream<'static>, Format)> {
    let device = Device::with_path(path)
        .map_err(|e| AppError::VideoError(format!("Failed to open device {:?}: {}", path, e)))?;

    let requested = Format::new(resolution.width, resolution.height, format.to_fourcc());
    let actual = device
        .set_format(&requested)
        .map_err(|e| AppError::VideoError(format!("Failed to set format: {}", e)))?;
    if actual.width != resolution.width || actual.height != resolution.height {
        warn!(
            "Requested {}, got {}x{}",
            resolution, actual.width, actual.height
        );
    }

    let stream = MmapStream::with_buffers(&device, Type::VideoCapture, buffer_count)
        .map_err(|e| AppError::VideoError(format!("Failed to create mmap stream: {}", e)))?;

    Ok((device, stream, actual))
}

/// Split a single-planar V4L2 buffer into per-plane views
///
/// Multi-plane formats in the single-planar API are laid out back to back:
/// NV12 chroma shares the luma stride, I420 chroma planes use half of it.
fn split_planes(
    data: &[u8],
    format: PixelFormat,
    resolution: Resolution,
    stride: usize,
) -> Vec<PlaneRef<'_>> {
    let layouts = format.plane_layouts(resolution);
    let strides: Vec<usize> = match format {
        PixelFormat::Yuv420 => vec![stride, stride / 2, stride / 2],
        _ => vec![stride; layouts.len()],
    };

    let mut planes = Vec::with_capacity(layouts.len());
    let mut offset = 0usize;
    for (layout, plane_stride) in layouts.iter().zip(strides) {
        let len = plane_stride.saturating_mul(layout.rows);
        let start = offset.min(data.len());
        let end = offset.saturating_add(len).min(data.len());
        // A short buffer yields a short plane; the copier rejects it
        planes.push(PlaneRef {
            data: &data[start..end],
            stride: plane_stride,
            height: layout.rows,
        });
        offset = offset.saturating_add(len);
    }
    planes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_nv12() {
        let res = Resolution::new(8, 4);
        let data = vec![0u8; 16 * 4 + 16 * 2];
        let planes = split_planes(&data, PixelFormat::Nv12, res, 16);
        assert_eq!(planes.len(), 2);
        assert_eq!(planes[0].data.len(), 64);
        assert_eq!(planes[1].data.len(), 32);
        assert_eq!(planes[1].stride, 16);
        assert_eq!(planes[1].height, 2);
    }

    #[test]
    fn test_split_i420_uses_half_stride() {
        let res = Resolution::new(8, 4);
        let data = vec![0u8; 8 * 4 + 4 * 2 * 2];
        let planes = split_planes(&data, PixelFormat::Yuv420, res, 8);
        assert_eq!(planes.len(), 3);
        assert_eq!(planes[1].stride, 4);
        assert_eq!(planes[2].data.len(), 8);
    }

    #[test]
    fn test_split_short_buffer_produces_short_plane() {
        let res = Resolution::new(8, 4);
        let data = vec![0u8; 40];
        let planes = split_planes(&data, PixelFormat::Nv12, res, 8);
        assert_eq!(planes[0].data.len(), 32);
        assert_eq!(planes[1].data.len(), 8);
    }

    #[test]
    fn test_missing_device_is_error() {
        assert!(probe_device(Path::new("/dev/scancam-does-not-exist")).is_err());
    }
}
