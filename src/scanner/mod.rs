//! Scanning flow
//!
//! Ties the permission authority, the session controller and the recognizer
//! together: set the camera up, grab the latest frame, recognize it. A new
//! scan supersedes the one in flight; only the current scan may publish its
//! outcome.

mod types;

pub use types::{CameraStatus, ScanError, ScannerState};

use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::events::{EventBus, SystemEvent};
use crate::permission::{AuthorizationStatus, PermissionAuthority};
use crate::recognition::{RecognitionResult, RecognitionService, StillImage};
use crate::session::{SessionController, SessionState};

struct ActiveScan {
    id: Uuid,
    token: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

struct ScannerInner {
    controller: SessionController,
    permissions: Arc<dyn PermissionAuthority>,
    recognizer: Arc<dyn RecognitionService>,
    state_tx: watch::Sender<ScannerState>,
    camera_tx: watch::Sender<CameraStatus>,
    scan: Mutex<ActiveScan>,
    events: RwLock<Option<Arc<EventBus>>>,
}

/// Scanning flow coordinator
pub struct Scanner {
    inner: Arc<ScannerInner>,
    observer: JoinHandle<()>,
}

impl Scanner {
    /// Create the scanner and start following the session state
    ///
    /// Must be called within a Tokio runtime.
    pub fn new(
        controller: SessionController,
        permissions: Arc<dyn PermissionAuthority>,
        recognizer: Arc<dyn RecognitionService>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ScannerState::Idle);
        let (camera_tx, _) = watch::channel(CameraStatus {
            session_state: controller.current_state(),
            ..Default::default()
        });

        let inner = Arc::new(ScannerInner {
            controller,
            permissions,
            recognizer,
            state_tx,
            camera_tx,
            scan: Mutex::new(ActiveScan {
                id: Uuid::new_v4(),
                token: None,
                task: None,
            }),
            events: RwLock::new(None),
        });
        let observer = spawn_session_observer(&inner);

        Self { inner, observer }
    }

    /// Publish scanner state changes on `events`
    pub fn set_event_bus(&self, events: Arc<EventBus>) {
        *self.inner.events.write() = Some(events);
    }

    /// Request permission, then configure and start the camera
    pub async fn setup_camera(&self) {
        let inner = &self.inner;
        let granted = inner.permissions.request_permission().await;
        let status = inner.permissions.authorization_status().await;
        inner.camera_tx.send_modify(|camera| {
            camera.has_permission = granted;
            camera.permission_denied = !granted && status == AuthorizationStatus::Denied;
        });

        if !granted {
            info!("Camera permission not granted ({:?})", status);
            inner.set_camera_ready(inner.controller.current_state());
            inner.set_state(ScannerState::Error(permission_error(status)));
            return;
        }

        match inner.controller.configure().await {
            Ok(()) => {
                inner.controller.start().await;
                inner.set_camera_ready(inner.controller.current_state());
                if matches!(*inner.state_tx.borrow(), ScannerState::Error(_)) {
                    inner.set_state(ScannerState::Idle);
                }
            }
            Err(AppError::ConfigurationFailed(reason)) => {
                warn!("Camera setup failed: {}", reason);
                inner.set_camera_ready(SessionState::Stopped);
                inner.set_state(ScannerState::Error(ScanError::CameraConfigurationFailed));
            }
            Err(e) => {
                inner.set_camera_ready(SessionState::Stopped);
                inner.set_state(ScannerState::Error(ScanError::Unknown(e.to_string())));
            }
        }
    }

    /// Recognize the latest frame; returns the scan id if a scan started
    pub async fn capture_and_scan(&self) -> Option<Uuid> {
        let inner = &self.inner;
        if !inner.camera_tx.borrow().has_permission {
            let status = inner.permissions.authorization_status().await;
            inner.set_state(ScannerState::Error(permission_error(status)));
            return None;
        }

        let Some(frame) = inner.controller.latest_frame() else {
            inner.set_state(ScannerState::Error(ScanError::NoFrameAvailable));
            return None;
        };

        let Some(image) = StillImage::from_frame(&frame) else {
            inner.set_state(ScannerState::Error(ScanError::RecognitionFailed(format!(
                "frame #{} ({} {}) could not be converted",
                frame.sequence, frame.format, frame.resolution
            ))));
            return None;
        };

        Some(self.start_scanning(image))
    }

    /// Recognize `image`, superseding any scan in flight
    pub fn start_scanning(&self, image: StillImage) -> Uuid {
        let mut scan = self.inner.scan.lock();
        if let Some(token) = scan.token.take() {
            debug!("Superseding scan {}", scan.id);
            token.cancel();
        }
        self.inner.set_state(ScannerState::Processing);

        let id = Uuid::new_v4();
        let token = CancellationToken::new();
        scan.id = id;
        scan.token = Some(token.clone());

        let inner = Arc::clone(&self.inner);
        scan.task = Some(tokio::spawn(async move {
            let outcome = inner.recognizer.recognize(&image, &token).await;
            if token.is_cancelled() {
                debug!("Scan {} cancelled, discarding outcome", id);
                return;
            }
            inner.finish_scan(id, outcome);
        }));

        id
    }

    /// Cancel any scan and stop the camera
    pub async fn handle_disappear(&self) {
        self.inner.cancel_scan();
        self.inner.controller.stop().await;
    }

    /// Cancel any scan and return to idle
    pub fn reset(&self) {
        self.inner.cancel_scan();
        self.inner.set_state(ScannerState::Idle);
    }

    pub fn state(&self) -> ScannerState {
        self.inner.state_tx.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ScannerState> {
        self.inner.state_tx.subscribe()
    }

    pub fn camera_status(&self) -> CameraStatus {
        *self.inner.camera_tx.borrow()
    }

    pub fn watch_camera(&self) -> watch::Receiver<CameraStatus> {
        self.inner.camera_tx.subscribe()
    }

    pub fn controller(&self) -> &SessionController {
        &self.inner.controller
    }
}

impl Drop for Scanner {
    fn drop(&mut self) {
        self.observer.abort();
        self.inner.cancel_scan();
    }
}

impl ScannerInner {
    fn set_state(&self, state: ScannerState) {
        if let Some(events) = self.events.read().as_ref() {
            events.publish(SystemEvent::ScannerStateChanged {
                state: state.label().to_string(),
                detail: state.detail(),
            });
        }
        debug!("Scanner state: {}", state.label());
        self.state_tx.send_replace(state);
    }

    fn set_camera_ready(&self, session_state: SessionState) {
        self.camera_tx.send_modify(|camera| {
            camera.session_state = session_state;
            camera.camera_ready = camera.has_permission && session_state == SessionState::Running;
        });
    }

    fn cancel_scan(&self) {
        let mut scan = self.scan.lock();
        if let Some(token) = scan.token.take() {
            token.cancel();
        }
        scan.id = Uuid::new_v4();
        scan.task = None;
    }

    fn finish_scan(&self, id: Uuid, outcome: Result<RecognitionResult>) {
        // Held while publishing so a concurrent cancel cannot slip in between
        let mut scan = self.scan.lock();
        if scan.id != id {
            debug!("Scan {} superseded, discarding outcome", id);
            return;
        }
        scan.token = None;
        scan.task = None;

        match outcome {
            Ok(result) => {
                info!(
                    "Scan {} recognized '{}' ({:.2})",
                    id, result.label, result.confidence
                );
                self.set_state(ScannerState::Success(result));
            }
            Err(AppError::Cancelled) => {}
            Err(AppError::Recognition(message)) => {
                warn!("Scan {} failed: {}", id, message);
                self.set_state(ScannerState::Error(ScanError::RecognitionFailed(message)));
            }
            Err(e) => {
                warn!("Scan {} failed: {}", id, e);
                self.set_state(ScannerState::Error(ScanError::RecognitionFailed(
                    e.to_string(),
                )));
            }
        }
    }
}

fn permission_error(status: AuthorizationStatus) -> ScanError {
    match status {
        AuthorizationStatus::Restricted => ScanError::PermissionRestricted,
        _ => ScanError::PermissionDenied,
    }
}

/// Follow session state changes for camera readiness
///
/// Holds the scanner only weakly so dropping it ends the task.
fn spawn_session_observer(inner: &Arc<ScannerInner>) -> JoinHandle<()> {
    let controller = inner.controller.clone();
    let weak: Weak<ScannerInner> = Arc::downgrade(inner);

    tokio::spawn(async move {
        let subscribed = controller.subscribe_to_state().await;
        drop(controller);
        let Ok(mut stream) = subscribed else {
            return;
        };

        while let Some(state) = stream.recv().await {
            let Some(inner) = weak.upgrade() else { break };
            inner.set_camera_ready(state);
        }
    })
}
