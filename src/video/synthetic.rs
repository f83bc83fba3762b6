//! Synthetic capture backend
//!
//! Generates a moving test pattern on a dedicated thread, delivering every
//! frame from one reused buffer the way real drivers recycle theirs. Faults
//! can be injected at runtime to exercise the controller's failure paths.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::backend::{
    CameraPosition, CaptureBackend, CaptureDeviceInfo, FrameSink, OutputSettings, SessionPreset,
};
use super::format::Resolution;
use super::frame::{BufferBacking, CapturedFrame, FrameAttachments, PlaneRef};
use crate::error::{AppError, Result};

/// Synthetic camera configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    /// Frame width (0 = follow session preset)
    pub width: u32,
    /// Frame height (0 = follow session preset)
    pub height: u32,
    /// Frames per second
    pub fps: u32,
    /// Extra bytes appended to every source row
    pub row_padding: usize,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30,
            row_padding: 16,
        }
    }
}

/// Snapshot of backend call counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyntheticStats {
    pub inputs_added: u64,
    pub outputs_added: u64,
    pub inputs_removed: u64,
    pub commits: u64,
    pub starts: u64,
    pub stops: u64,
}

#[derive(Default)]
struct Counters {
    inputs_added: AtomicU64,
    outputs_added: AtomicU64,
    inputs_removed: AtomicU64,
    commits: AtomicU64,
    starts: AtomicU64,
    stops: AtomicU64,
}

#[derive(Default)]
struct Faults {
    device_unavailable: AtomicBool,
    refuse_start: AtomicBool,
    reject_output: AtomicBool,
    fail_add_output: AtomicBool,
}

#[derive(Default)]
struct Graph {
    configuring: bool,
    preset: SessionPreset,
    input: Option<CaptureDeviceInfo>,
    output: Option<(OutputSettings, FrameSink)>,
}

/// In-process camera producing a test pattern
pub struct SyntheticCamera {
    config: SyntheticConfig,
    graph: Mutex<Graph>,
    faults: Faults,
    counters: Counters,
    running: Arc<AtomicBool>,
    stop_flag: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SyntheticCamera {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            graph: Mutex::new(Graph::default()),
            faults: Faults::default(),
            counters: Counters::default(),
            running: Arc::new(AtomicBool::new(false)),
            stop_flag: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    /// Make device discovery and input creation fail
    pub fn set_device_available(&self, available: bool) {
        self.faults
            .device_unavailable
            .store(!available, Ordering::SeqCst);
    }

    /// Make `start_running` return without starting
    pub fn set_refuse_start(&self, refuse: bool) {
        self.faults.refuse_start.store(refuse, Ordering::SeqCst);
    }

    /// Make `can_add_output` report no free output slot
    pub fn set_reject_output(&self, reject: bool) {
        self.faults.reject_output.store(reject, Ordering::SeqCst);
    }

    /// Make `add_output` fail after `can_add_output` succeeded
    pub fn set_fail_add_output(&self, fail: bool) {
        self.faults.fail_add_output.store(fail, Ordering::SeqCst);
    }

    /// Stop the pipeline from the device side and report it through the sink
    pub fn halt(&self) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        self.shutdown_worker();
        let sink = self.graph.lock().output.as_ref().map(|(_, sink)| sink.clone());
        if let Some(sink) = sink {
            sink.device_stopped("synthetic camera halted");
        }
    }

    /// Whether an input is attached to the graph
    pub fn has_input(&self) -> bool {
        self.graph.lock().input.is_some()
    }

    /// Whether an output is attached to the graph
    pub fn has_output(&self) -> bool {
        self.graph.lock().output.is_some()
    }

    pub fn stats(&self) -> SyntheticStats {
        SyntheticStats {
            inputs_added: self.counters.inputs_added.load(Ordering::SeqCst),
            outputs_added: self.counters.outputs_added.load(Ordering::SeqCst),
            inputs_removed: self.counters.inputs_removed.load(Ordering::SeqCst),
            commits: self.counters.commits.load(Ordering::SeqCst),
            starts: self.counters.starts.load(Ordering::SeqCst),
            stops: self.counters.stops.load(Ordering::SeqCst),
        }
    }

    fn resolution(&self, preset: SessionPreset) -> Resolution {
        if self.config.width > 0 && self.config.height > 0 {
            Resolution::new(self.config.width, self.config.height)
        } else {
            preset.resolution()
        }
    }

    fn device_available(&self) -> bool {
        !self.faults.device_unavailable.load(Ordering::SeqCst)
    }

    fn shutdown_worker(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                warn!("Synthetic capture thread panicked");
            }
        }
        self.running.store(false, Ordering::SeqCst);
    }
}

impl CaptureBackend for SyntheticCamera {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn begin_configuration(&self) {
        self.graph.lock().configuring = true;
    }

    fn commit_configuration(&self) {
        self.graph.lock().configuring = false;
        self.counters.commits.fetch_add(1, Ordering::SeqCst);
    }

    fn set_preset(&self, preset: SessionPreset) {
        self.graph.lock().preset = preset;
    }

    fn default_device(&self, position: CameraPosition) -> Option<CaptureDeviceInfo> {
        if !self.device_available() {
            return None;
        }
        let side = match position {
            CameraPosition::Front => "front",
            _ => "back",
        };
        Some(CaptureDeviceInfo {
            id: format!("synthetic:{}", side),
            name: format!("Synthetic {} camera", side),
            position,
        })
    }

    fn open_input(&self, device: &CaptureDeviceInfo) -> Result<()> {
        if self.device_available() {
            Ok(())
        } else {
            Err(AppError::VideoError(format!("{} is unavailable", device.id)))
        }
    }

    fn can_add_input(&self, _device: &CaptureDeviceInfo) -> bool {
        self.graph.lock().input.is_none()
    }

    fn can_add_output(&self, _settings: &OutputSettings) -> bool {
        !self.faults.reject_output.load(Ordering::SeqCst) && self.graph.lock().output.is_none()
    }

    fn add_input(&self, device: &CaptureDeviceInfo) -> Result<()> {
        let mut graph = self.graph.lock();
        if !graph.configuring {
            return Err(AppError::Internal(
                "graph edited outside a configuration".to_string(),
            ));
        }
        if graph.input.is_some() {
            return Err(AppError::VideoError("input slot already taken".to_string()));
        }
        graph.input = Some(device.clone());
        self.counters.inputs_added.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn remove_input(&self, device: &CaptureDeviceInfo) {
        let mut graph = self.graph.lock();
        if graph.input.as_ref() == Some(device) {
            graph.input = None;
            self.counters.inputs_removed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn add_output(&self, settings: &OutputSettings, sink: FrameSink) -> Result<()> {
        if self.faults.fail_add_output.load(Ordering::SeqCst) {
            return Err(AppError::VideoError("output rejected by device".to_string()));
        }
        let mut graph = self.graph.lock();
        if !graph.configuring {
            return Err(AppError::Internal(
                "graph edited outside a configuration".to_string(),
            ));
        }
        if graph.output.is_some() {
            return Err(AppError::VideoError("output slot already taken".to_string()));
        }
        graph.output = Some((settings.clone(), sink));
        self.counters.outputs_added.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn start_running(&self) {
        self.counters.starts.fetch_add(1, Ordering::SeqCst);

        if self.faults.refuse_start.load(Ordering::SeqCst) {
            debug!("Synthetic camera refused to start");
            return;
        }
        if self.running.load(Ordering::SeqCst) {
            return;
        }

        let (resolution, settings, sink) = {
            let graph = self.graph.lock();
            match (&graph.input, &graph.output) {
                (Some(_), Some((settings, sink))) => {
                    (self.resolution(graph.preset), settings.clone(), sink.clone())
                }
                _ => {
                    debug!("Synthetic camera has no complete graph, not starting");
                    return;
                }
            }
        };

        self.stop_flag.store(false, Ordering::SeqCst);
        let stop_flag = self.stop_flag.clone();
        let fps = self.config.fps.max(1);
        let padding = self.config.row_padding;
        let (ready_tx, ready_rx) = mpsc::channel();

        let spawned = std::thread::Builder::new()
            .name("synthetic-capture".to_string())
            .spawn(move || {
                let _ = ready_tx.send(());
                capture_loop(resolution, settings, sink, stop_flag, fps, padding);
            });

        match spawned {
            Ok(handle) => {
                // Block until the producer thread is up, like a real start
                if ready_rx.recv().is_ok() {
                    *self.worker.lock() = Some(handle);
                    self.running.store(true, Ordering::SeqCst);
                    info!("Synthetic capture started at {} @ {}fps", resolution, fps);
                }
            }
            Err(e) => warn!("Failed to spawn synthetic capture thread: {}", e),
        }
    }

    fn stop_running(&self) {
        self.counters.stops.fetch_add(1, Ordering::SeqCst);
        self.shutdown_worker();
        info!("Synthetic capture stopped");
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for SyntheticCamera {
    fn drop(&mut self) {
        self.shutdown_worker();
    }
}

fn capture_loop(
    resolution: Resolution,
    settings: OutputSettings,
    sink: FrameSink,
    stop_flag: Arc<AtomicBool>,
    fps: u32,
    padding: usize,
) {
    let layouts = settings.format.plane_layouts(resolution);
    let strides: Vec<usize> = layouts.iter().map(|l| l.row_bytes + padding).collect();
    // Allocated once and overwritten for every frame
    let mut buffers: Vec<Vec<u8>> = layouts
        .iter()
        .zip(&strides)
        .map(|(layout, stride)| vec![0u8; stride * layout.rows])
        .collect();

    let mut attachments = FrameAttachments::new();
    attachments.insert("source".to_string(), "synthetic".to_string());
    attachments.insert("colorspace".to_string(), "bt601".to_string());

    let interval = Duration::from_secs_f64(1.0 / fps as f64);
    let mut next_due = Instant::now();
    let mut sequence = 0u64;

    while !stop_flag.load(Ordering::SeqCst) {
        sequence += 1;
        for ((buffer, layout), stride) in buffers.iter_mut().zip(&layouts).zip(&strides) {
            paint_pattern(buffer, layout.row_bytes, *stride, layout.rows, sequence);
        }

        let frame = CapturedFrame {
            resolution,
            format: settings.format,
            planes: buffers
                .iter()
                .zip(&layouts)
                .zip(&strides)
                .map(|((buffer, layout), stride)| PlaneRef {
                    data: buffer,
                    stride: *stride,
                    height: layout.rows,
                })
                .collect(),
            attachments: &attachments,
            backing: BufferBacking::Surface,
            sequence,
        };
        sink.deliver(&frame);

        next_due += interval;
        let now = Instant::now();
        if next_due > now {
            std::thread::sleep(next_due - now);
        } else if settings.discard_late_frames {
            // Skip the ticks we missed instead of bursting to catch up
            next_due = now;
        }
    }

    debug!("Synthetic capture loop exited after {} frames", sequence);
}

/// Diagonal gradient that shifts by one sample per frame; padding is marked 0xEE
fn paint_pattern(buffer: &mut [u8], row_bytes: usize, stride: usize, rows: usize, sequence: u64) {
    let shift = sequence as usize;
    for (y, row) in buffer.chunks_mut(stride).take(rows).enumerate() {
        let (pixels, pad) = row.split_at_mut(row_bytes.min(row.len()));
        for (x, byte) in pixels.iter_mut().enumerate() {
            *byte = (x + y + shift) as u8;
        }
        pad.fill(0xEE);
    }
}
