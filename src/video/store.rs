//! Latest-frame slot shared between the capture thread and readers

use arc_swap::ArcSwapOption;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::frame::{FrameMeta, VideoFrame};

/// Single-slot cache holding the most recently captured frame
///
/// One producer (the capture callback) replaces the slot; any number of
/// readers load it. The slot is swapped atomically, so a reader always gets
/// either the previous or the new frame, never a mix. The previous frame is
/// released once the last reader holding it drops its `Arc`.
pub struct FrameStore {
    /// Current frame (latest) - using ArcSwap for lock-free reads
    latest: ArcSwapOption<VideoFrame>,
    /// Number of frames stored since creation
    stored: AtomicU64,
}

impl FrameStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            latest: ArcSwapOption::empty(),
            stored: AtomicU64::new(0),
        }
    }

    /// Replace the stored frame (last write wins)
    pub fn put(&self, frame: VideoFrame) {
        self.latest.store(Some(Arc::new(frame)));
        self.stored.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the stored frame without copying pixel data
    ///
    /// The returned handle stays valid across later `put()` calls.
    pub fn get(&self) -> Option<Arc<VideoFrame>> {
        self.latest.load_full()
    }

    /// Metadata of the stored frame, if any
    pub fn meta(&self) -> Option<FrameMeta> {
        self.latest.load().as_deref().map(FrameMeta::from)
    }

    /// Drop the stored frame
    pub fn clear(&self) {
        self.latest.store(None);
    }

    /// Number of frames stored since creation
    pub fn frames_stored(&self) -> u64 {
        self.stored.load(Ordering::Relaxed)
    }
}

impl Default for FrameStore {
    fn default() -> Self {
        Self::new()
    }
}
