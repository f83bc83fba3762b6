//! Capture session lifecycle controller
//!
//! All session state is owned by one actor task. Public handles only send
//! commands to it; the published state is mirrored into a `watch` channel so
//! `current_state()` never waits. Blocking device calls run on the blocking
//! pool and the actor awaits them before deriving the next state.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::registry::{StateStream, SubscriberId, SubscriberRegistry};
use super::state::{SessionFlags, SessionState};
use crate::error::{AppError, Result};
use crate::events::{EventBus, SystemEvent};
use crate::video::backend::{
    CameraPosition, CaptureBackend, CaptureDeviceInfo, FrameSink, OutputSettings, SessionPreset,
};
use crate::video::frame::VideoFrame;
use crate::video::store::FrameStore;

/// Asynchronous signals from the operating environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentEvent {
    EnteredBackground,
    LeftBackground,
    SessionInterrupted,
    InterruptionEnded,
}

impl EnvironmentEvent {
    /// Map a bus event to an environment signal, if it is one
    pub fn from_system_event(event: &SystemEvent) -> Option<Self> {
        match event {
            SystemEvent::AppEnteredBackground => Some(Self::EnteredBackground),
            SystemEvent::AppLeftBackground => Some(Self::LeftBackground),
            SystemEvent::CameraInterrupted { .. } => Some(Self::SessionInterrupted),
            SystemEvent::CameraInterruptionEnded => Some(Self::InterruptionEnded),
            _ => None,
        }
    }

    fn apply(&self, flags: &mut SessionFlags) {
        match self {
            Self::EnteredBackground => flags.in_background = true,
            Self::LeftBackground => flags.in_background = false,
            Self::SessionInterrupted => flags.interrupted = true,
            Self::InterruptionEnded => flags.interrupted = false,
        }
    }
}

/// What the controller asks of the backend when configuring
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    pub position: CameraPosition,
    pub preset: SessionPreset,
    pub output: OutputSettings,
}

/// Snapshot of controller internals for status displays
#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub state: SessionState,
    pub flags: SessionFlags,
    pub device_running: bool,
    pub device: Option<CaptureDeviceInfo>,
    pub subscribers: usize,
    pub frames_stored: u64,
}

enum Command {
    Configure {
        reply: oneshot::Sender<Result<()>>,
    },
    SetDesiredRun {
        run: bool,
        reply: oneshot::Sender<()>,
    },
    Environment {
        event: EnvironmentEvent,
        reply: Option<oneshot::Sender<()>>,
    },
    Subscribe {
        reply: oneshot::Sender<StateStream>,
    },
    Unsubscribe {
        id: SubscriberId,
    },
    AttachEventBus {
        events: Arc<EventBus>,
    },
    Status {
        reply: oneshot::Sender<ControllerStatus>,
    },
    DeviceStopped {
        reason: String,
    },
}

/// Handle to the session controller
///
/// Cheap to clone. The controller shuts down (stopping the device) once the
/// last handle is dropped.
#[derive(Clone)]
pub struct SessionController {
    tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<SessionState>,
    store: Arc<FrameStore>,
}

impl SessionController {
    /// Create a controller over `backend` and spawn its actor task
    ///
    /// Must be called within a Tokio runtime.
    pub fn new(backend: Arc<dyn CaptureBackend>, options: SessionOptions) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Stopped);
        let store = Arc::new(FrameStore::new());

        let actor = SessionActor {
            backend,
            options,
            store: store.clone(),
            flags: SessionFlags::default(),
            device_running: false,
            device: None,
            published: SessionState::Stopped,
            registry: SubscriberRegistry::new(),
            state_tx,
            events: None,
            commands: tx.downgrade(),
        };
        tokio::spawn(actor.run(rx));

        Self {
            tx,
            state_rx,
            store,
        }
    }

    /// Wire the capture graph; no-op once it succeeded
    pub async fn configure(&self) -> Result<()> {
        self.request(|reply| Command::Configure { reply })
            .await
            .unwrap_or_else(|| {
                Err(AppError::ConfigurationFailed(
                    "session controller has shut down".to_string(),
                ))
            })
    }

    /// Request the device to run
    pub async fn start(&self) {
        self.set_desired_run(true).await;
    }

    /// Request the device to stop
    pub async fn stop(&self) {
        self.set_desired_run(false).await;
    }

    /// Last published state
    pub fn current_state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// Receiver tracking the published state
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Subscribe to state changes, starting with the current state
    pub async fn subscribe_to_state(&self) -> Result<StateStream> {
        self.request(|reply| Command::Subscribe { reply })
            .await
            .ok_or_else(|| AppError::Internal("session controller has shut down".to_string()))
    }

    /// Most recently captured frame
    pub fn latest_frame(&self) -> Option<Arc<VideoFrame>> {
        self.store.get()
    }

    pub fn frame_store(&self) -> &Arc<FrameStore> {
        &self.store
    }

    pub async fn on_entered_background(&self) {
        self.handle_environment(EnvironmentEvent::EnteredBackground)
            .await;
    }

    pub async fn on_left_background(&self) {
        self.handle_environment(EnvironmentEvent::LeftBackground).await;
    }

    pub async fn on_session_interrupted(&self) {
        self.handle_environment(EnvironmentEvent::SessionInterrupted)
            .await;
    }

    pub async fn on_session_interruption_ended(&self) {
        self.handle_environment(EnvironmentEvent::InterruptionEnded)
            .await;
    }

    /// Apply an environment signal and wait until it has been reconciled
    pub async fn handle_environment(&self, event: EnvironmentEvent) {
        let handled = self
            .request(|reply| Command::Environment {
                event,
                reply: Some(reply),
            })
            .await;
        if handled.is_none() {
            debug!("Dropping {:?}: session controller has shut down", event);
        }
    }

    /// Handle for posting environment signals from non-async code
    pub fn environment_notifier(&self) -> EnvironmentNotifier {
        EnvironmentNotifier {
            tx: self.tx.downgrade(),
        }
    }

    /// Snapshot of the controller's flags and device status
    pub async fn status(&self) -> Result<ControllerStatus> {
        self.request(|reply| Command::Status { reply })
            .await
            .ok_or_else(|| AppError::Internal("session controller has shut down".to_string()))
    }

    /// Publish state changes on `events` and follow environment events posted there
    ///
    /// The returned task ends when the controller or the bus goes away.
    pub fn attach_event_bus(&self, events: Arc<EventBus>) -> JoinHandle<()> {
        let _ = self.tx.send(Command::AttachEventBus {
            events: events.clone(),
        });

        let mut bus_rx = events.subscribe();
        let mut state_rx = self.state_rx.clone();
        let commands = self.tx.downgrade();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = bus_rx.recv() => match received {
                        Ok(event) => {
                            let Some(env) = EnvironmentEvent::from_system_event(&event) else {
                                continue;
                            };
                            let Some(tx) = commands.upgrade() else { break };
                            debug!("Forwarding {} to session controller", event.event_name());
                            if tx.send(Command::Environment { event: env, reply: None }).is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("Environment event bridge lagged, {} events skipped", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    changed = state_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("Environment event bridge stopped");
        })
    }

    async fn set_desired_run(&self, run: bool) {
        if self
            .request(|reply| Command::SetDesiredRun { run, reply })
            .await
            .is_none()
        {
            debug!("Ignoring run={}: session controller has shut down", run);
        }
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Option<T> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).ok()?;
        rx.await.ok()
    }
}

/// Posts environment signals without awaiting
///
/// Does not keep the controller alive.
#[derive(Clone)]
pub struct EnvironmentNotifier {
    tx: mpsc::WeakUnboundedSender<Command>,
}

impl EnvironmentNotifier {
    /// Queue `event`; returns `false` if the controller is gone
    pub fn notify(&self, event: EnvironmentEvent) -> bool {
        match self.tx.upgrade() {
            Some(tx) => tx.send(Command::Environment { event, reply: None }).is_ok(),
            None => false,
        }
    }
}

/// Begin/commit bracket around graph edits; commits on drop
struct ConfigurationTransaction<'a> {
    backend: &'a dyn CaptureBackend,
}

impl<'a> ConfigurationTransaction<'a> {
    fn begin(backend: &'a dyn CaptureBackend) -> Self {
        backend.begin_configuration();
        Self { backend }
    }
}

impl Drop for ConfigurationTransaction<'_> {
    fn drop(&mut self) {
        self.backend.commit_configuration();
    }
}

/// Acquire the device and wire input plus output as one transaction
///
/// On error nothing stays attached.
fn build_graph(
    backend: &dyn CaptureBackend,
    options: &SessionOptions,
    sink: FrameSink,
) -> Result<CaptureDeviceInfo> {
    let device = backend.default_device(options.position).ok_or_else(|| {
        AppError::ConfigurationFailed(format!(
            "no {:?} camera available on {}",
            options.position,
            backend.name()
        ))
    })?;

    backend.open_input(&device).map_err(|e| {
        AppError::ConfigurationFailed(format!("cannot open {}: {}", device.id, e))
    })?;

    let _transaction = ConfigurationTransaction::begin(backend);
    backend.set_preset(options.preset);

    if !backend.can_add_input(&device) {
        return Err(AppError::ConfigurationFailed(format!(
            "session cannot accept input {}",
            device.id
        )));
    }
    backend.add_input(&device).map_err(|e| {
        AppError::ConfigurationFailed(format!("adding input {} failed: {}", device.id, e))
    })?;

    if !backend.can_add_output(&options.output) {
        backend.remove_input(&device);
        return Err(AppError::ConfigurationFailed(
            "session cannot accept a frame output".to_string(),
        ));
    }
    if let Err(e) = backend.add_output(&options.output, sink) {
        backend.remove_input(&device);
        return Err(AppError::ConfigurationFailed(format!(
            "adding frame output failed: {}",
            e
        )));
    }

    Ok(device)
}

struct SessionActor {
    backend: Arc<dyn CaptureBackend>,
    options: SessionOptions,
    store: Arc<FrameStore>,
    flags: SessionFlags,
    device_running: bool,
    device: Option<CaptureDeviceInfo>,
    published: SessionState,
    registry: SubscriberRegistry,
    state_tx: watch::Sender<SessionState>,
    events: Option<Arc<EventBus>>,
    commands: mpsc::WeakUnboundedSender<Command>,
}

impl SessionActor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        debug!("Session controller started ({} backend)", self.backend.name());
        while let Some(command) = rx.recv().await {
            self.handle(command).await;
        }
        self.shutdown().await;
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Configure { reply } => {
                let result = self.configure().await;
                let _ = reply.send(result);
            }
            Command::SetDesiredRun { run, reply } => {
                self.flags.desired_run = run;
                self.reconcile().await;
                let _ = reply.send(());
            }
            Command::Environment { event, reply } => {
                debug!("Environment event: {:?}", event);
                event.apply(&mut self.flags);
                self.reconcile().await;
                if let Some(reply) = reply {
                    let _ = reply.send(());
                }
            }
            Command::Subscribe { reply } => {
                let stream = self.subscribe();
                let _ = reply.send(stream);
            }
            Command::Unsubscribe { id } => {
                self.registry.unsubscribe(id);
            }
            Command::AttachEventBus { events } => {
                self.events = Some(events);
            }
            Command::DeviceStopped { reason } => {
                self.device_stopped(reason);
            }
            Command::Status { reply } => {
                let _ = reply.send(ControllerStatus {
                    state: self.published,
                    flags: self.flags,
                    device_running: self.device_running,
                    device: self.device.clone(),
                    subscribers: self.registry.len(),
                    frames_stored: self.store.frames_stored(),
                });
            }
        }
    }

    async fn configure(&mut self) -> Result<()> {
        if self.flags.configured {
            debug!("Session already configured");
            return Ok(());
        }

        let backend = self.backend.clone();
        let options = self.options.clone();
        let commands = self.commands.clone();
        let sink = FrameSink::new(self.store.clone()).with_stop_notifier(Arc::new(
            move |reason: &str| {
                if let Some(tx) = commands.upgrade() {
                    let _ = tx.send(Command::DeviceStopped {
                        reason: reason.to_string(),
                    });
                }
            },
        ));
        let outcome =
            tokio::task::spawn_blocking(move || build_graph(backend.as_ref(), &options, sink))
                .await
                .map_err(|e| {
                    AppError::ConfigurationFailed(format!("configuration task failed: {}", e))
                })
                .and_then(|result| result);

        match outcome {
            Ok(device) => {
                info!(
                    "Camera configured: {} ({}) via {}, output {}",
                    device.name,
                    device.id,
                    self.backend.name(),
                    self.options.output.format
                );
                self.publish_event(SystemEvent::CameraConfigured {
                    device: device.id.clone(),
                    backend: self.backend.name().to_string(),
                    format: self.options.output.format.to_string(),
                });
                self.flags.configured = true;
                self.device = Some(device);
                Ok(())
            }
            Err(e) => {
                warn!("Camera configuration failed: {}", e);
                Err(e)
            }
        }
    }

    async fn reconcile(&mut self) {
        self.device_running = self.backend.is_running();
        let should_run = self.flags.should_run();

        if should_run && !self.device_running {
            debug!("Reconcile: starting device");
            self.device_running = self
                .run_blocking(|backend| {
                    backend.start_running();
                    backend.is_running()
                })
                .await;
            if !self.device_running {
                warn!("Camera did not start, staying stopped");
            }
        } else if !should_run && self.device_running {
            debug!("Reconcile: stopping device");
            self.device_running = self
                .run_blocking(|backend| {
                    backend.stop_running();
                    backend.is_running()
                })
                .await;
        }

        let state = self.flags.published_state(self.device_running);
        self.publish(state);
    }

    /// The device stopped without a request from us
    ///
    /// Publishes the resulting state but does not restart; the next start or
    /// environment event reconciles again.
    fn device_stopped(&mut self, reason: String) {
        self.device_running = self.backend.is_running();
        if self.device_running {
            debug!("Ignoring stale device stop: {}", reason);
            return;
        }
        warn!("Camera stopped on its own: {}", reason);
        self.publish_event(SystemEvent::SystemError {
            module: "camera".to_string(),
            severity: "warning".to_string(),
            message: reason,
        });
        let state = self.flags.published_state(false);
        self.publish(state);
    }

    /// Run a blocking backend call; returns the backend's running status
    async fn run_blocking<F>(&self, call: F) -> bool
    where
        F: FnOnce(&dyn CaptureBackend) -> bool + Send + 'static,
    {
        let backend = self.backend.clone();
        match tokio::task::spawn_blocking(move || call(backend.as_ref())).await {
            Ok(running) => running,
            Err(e) => {
                warn!("Camera start/stop task failed: {}", e);
                self.backend.is_running()
            }
        }
    }

    fn publish(&mut self, state: SessionState) {
        if state == self.published {
            return;
        }
        info!("Camera session state: {} -> {}", self.published, state);
        self.published = state;

        self.registry.publish(state);
        self.publish_event(SystemEvent::CameraStateChanged {
            state: state.to_string(),
            device: self.device.as_ref().map(|d| d.id.clone()),
        });
        self.state_tx.send_replace(state);
    }

    fn subscribe(&mut self) -> StateStream {
        let (id, rx) = self.registry.subscribe(self.published);
        let commands = self.commands.clone();
        StateStream::new(
            id,
            rx,
            Some(Box::new(move |id| {
                if let Some(tx) = commands.upgrade() {
                    let _ = tx.send(Command::Unsubscribe { id });
                }
            })),
        )
    }

    fn publish_event(&self, event: SystemEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }

    async fn shutdown(&mut self) {
        if self.backend.is_running() {
            self.run_blocking(|backend| {
                backend.stop_running();
                backend.is_running()
            })
            .await;
        }
        debug!("Session controller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::synthetic::{SyntheticCamera, SyntheticConfig};
    use std::time::Duration;

    fn camera() -> Arc<SyntheticCamera> {
        Arc::new(SyntheticCamera::new(SyntheticConfig {
            width: 32,
            height: 8,
            fps: 100,
            row_padding: 8,
        }))
    }

    fn controller(camera: &Arc<SyntheticCamera>) -> SessionController {
        SessionController::new(camera.clone(), SessionOptions::default())
    }

    async fn wait_for_state(controller: &SessionController, want: SessionState) {
        let mut rx = controller.watch_state();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == want))
            .await
            .expect("timed out waiting for state")
            .expect("controller gone");
    }

    fn drain(stream: &mut StateStream) -> Vec<SessionState> {
        std::iter::from_fn(|| stream.try_recv()).collect()
    }

    #[tokio::test]
    async fn test_lifecycle_scenario() {
        let camera = camera();
        let controller = controller(&camera);
        assert_eq!(controller.current_state(), SessionState::Stopped);

        controller.start().await;
        assert_eq!(controller.current_state(), SessionState::Stopped);
        assert!(!camera.is_running());

        controller.configure().await.unwrap();
        // Configuration alone does not start the device
        assert_eq!(controller.current_state(), SessionState::Stopped);

        controller.start().await;
        assert_eq!(controller.current_state(), SessionState::Running);
        assert!(camera.is_running());

        controller.on_session_interrupted().await;
        assert_eq!(controller.current_state(), SessionState::Interrupted);
        assert!(controller.status().await.unwrap().flags.desired_run);

        controller.on_session_interruption_ended().await;
        assert_eq!(controller.current_state(), SessionState::Running);

        controller.stop().await;
        assert_eq!(controller.current_state(), SessionState::Stopped);
        assert!(!camera.is_running());
    }

    #[tokio::test]
    async fn test_subscriber_replay_and_dedup() {
        let camera = camera();
        let controller = controller(&camera);
        let mut stream = controller.subscribe_to_state().await.unwrap();

        controller.start().await;
        controller.stop().await;
        controller.configure().await.unwrap();
        controller.start().await;
        controller.start().await;
        controller.on_entered_background().await;
        controller.on_left_background().await;
        controller.stop().await;

        assert_eq!(
            drain(&mut stream),
            vec![
                SessionState::Stopped,
                SessionState::Running,
                SessionState::Stopped,
                SessionState::Running,
                SessionState::Stopped,
            ]
        );

        let mut late = controller.subscribe_to_state().await.unwrap();
        assert_eq!(late.recv().await, Some(SessionState::Stopped));
    }

    #[tokio::test]
    async fn test_background_and_interruption_priority() {
        let camera = camera();
        let controller = controller(&camera);
        controller.configure().await.unwrap();
        controller.start().await;

        controller.on_entered_background().await;
        assert_eq!(controller.current_state(), SessionState::Stopped);
        assert!(!camera.is_running());

        controller.on_session_interrupted().await;
        assert_eq!(controller.current_state(), SessionState::Interrupted);

        controller.on_left_background().await;
        assert_eq!(controller.current_state(), SessionState::Interrupted);
        assert!(!camera.is_running());

        controller.on_session_interruption_ended().await;
        assert_eq!(controller.current_state(), SessionState::Running);
    }

    #[tokio::test]
    async fn test_configure_is_idempotent() {
        let camera = camera();
        let controller = controller(&camera);
        controller.configure().await.unwrap();
        controller.configure().await.unwrap();

        let stats = camera.stats();
        assert_eq!(stats.inputs_added, 1);
        assert_eq!(stats.outputs_added, 1);
        assert_eq!(stats.commits, 1);
    }

    #[tokio::test]
    async fn test_configure_failure_can_be_retried() {
        let camera = camera();
        camera.set_device_available(false);
        let controller = controller(&camera);

        let err = controller.configure().await.unwrap_err();
        assert!(matches!(err, AppError::ConfigurationFailed(_)));
        assert!(!controller.status().await.unwrap().flags.configured);

        controller.start().await;
        assert_eq!(controller.current_state(), SessionState::Stopped);

        camera.set_device_available(true);
        controller.configure().await.unwrap();
        // desired_run is still set; the next reconcile starts the device
        controller.on_left_background().await;
        assert_eq!(controller.current_state(), SessionState::Running);
    }

    #[tokio::test]
    async fn test_failed_output_rolls_back_input() {
        let camera = camera();
        camera.set_fail_add_output(true);
        let controller = controller(&camera);

        assert!(controller.configure().await.is_err());
        assert!(!camera.has_input());
        assert!(!camera.has_output());
        assert_eq!(camera.stats().inputs_removed, 1);
        assert_eq!(camera.stats().commits, 1);

        camera.set_fail_add_output(false);
        controller.configure().await.unwrap();
        assert!(camera.has_input());
        assert!(camera.has_output());
    }

    #[tokio::test]
    async fn test_rejected_output_leaves_no_input() {
        let camera = camera();
        camera.set_reject_output(true);
        let controller = controller(&camera);

        assert!(controller.configure().await.is_err());
        assert!(!camera.has_input());
    }

    #[tokio::test]
    async fn test_silent_start_failure_degrades_to_stopped() {
        let camera = camera();
        camera.set_refuse_start(true);
        let controller = controller(&camera);
        controller.configure().await.unwrap();

        controller.start().await;
        assert_eq!(controller.current_state(), SessionState::Stopped);
        let status = controller.status().await.unwrap();
        assert!(status.flags.desired_run);
        assert!(!status.device_running);

        camera.set_refuse_start(false);
        controller.start().await;
        assert_eq!(controller.current_state(), SessionState::Running);
    }

    #[tokio::test]
    async fn test_frames_reach_latest_frame() {
        let camera = camera();
        let controller = controller(&camera);
        assert!(controller.latest_frame().is_none());

        controller.configure().await.unwrap();
        controller.start().await;

        let frame = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Some(frame) = controller.latest_frame() {
                    break frame;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("no frame captured");
        assert_eq!(frame.width(), 32);
        assert_eq!(frame.height(), 8);
    }

    #[tokio::test]
    async fn test_dropped_stream_unsubscribes() {
        let camera = camera();
        let controller = controller(&camera);
        let stream = controller.subscribe_to_state().await.unwrap();
        assert_eq!(controller.status().await.unwrap().subscribers, 1);

        drop(stream);
        assert_eq!(controller.status().await.unwrap().subscribers, 0);
    }

    #[tokio::test]
    async fn test_event_bus_bridge() {
        let camera = camera();
        let controller = controller(&camera);
        let bus = Arc::new(EventBus::new());
        let mut events = bus.subscribe();
        controller.attach_event_bus(bus.clone());

        controller.configure().await.unwrap();
        controller.start().await;

        bus.publish(SystemEvent::CameraInterrupted {
            reason: Some("audio call".to_string()),
        });
        wait_for_state(&controller, SessionState::Interrupted).await;

        bus.publish(SystemEvent::CameraInterruptionEnded);
        wait_for_state(&controller, SessionState::Running).await;

        let states: Vec<String> = std::iter::from_fn(|| events.try_recv().ok())
            .filter_map(|event| match event {
                SystemEvent::CameraStateChanged { state, .. } => Some(state),
                _ => None,
            })
            .collect();
        assert_eq!(states, vec!["running", "interrupted", "running"]);
    }

    #[tokio::test]
    async fn test_device_side_stop_is_published() {
        let camera = camera();
        let controller = controller(&camera);
        let bus = Arc::new(EventBus::new());
        let mut events = bus.subscribe();
        controller.attach_event_bus(bus.clone());
        controller.configure().await.unwrap();
        controller.start().await;
        let mut stream = controller.subscribe_to_state().await.unwrap();
        assert_eq!(stream.recv().await, Some(SessionState::Running));

        camera.halt();
        wait_for_state(&controller, SessionState::Stopped).await;
        assert_eq!(stream.recv().await, Some(SessionState::Stopped));
        assert!(controller.status().await.unwrap().flags.desired_run);

        let reported = std::iter::from_fn(|| events.try_recv().ok()).any(|event| {
            matches!(event, SystemEvent::SystemError { ref module, .. } if module == "camera")
        });
        assert!(reported);

        // The next start brings the device back
        controller.start().await;
        assert_eq!(controller.current_state(), SessionState::Running);
        assert!(camera.is_running());
        assert_eq!(stream.recv().await, Some(SessionState::Running));
    }

    #[tokio::test]
    async fn test_device_side_stop_while_interrupted() {
        let camera = camera();
        let controller = controller(&camera);
        controller.configure().await.unwrap();
        controller.start().await;
        controller.on_session_interrupted().await;
        // Interruption stopped the device already; halting it again is silent
        camera.halt();
        controller.status().await.unwrap();
        assert_eq!(controller.current_state(), SessionState::Interrupted);

        controller.on_session_interruption_ended().await;
        assert_eq!(controller.current_state(), SessionState::Running);
    }

    #[tokio::test]
    async fn test_notifier_from_plain_thread() {
        let camera = camera();
        let controller = controller(&camera);
        controller.configure().await.unwrap();
        controller.start().await;

        let notifier = controller.environment_notifier();
        std::thread::spawn(move || notifier.notify(EnvironmentEvent::EnteredBackground))
            .join()
            .unwrap();
        wait_for_state(&controller, SessionState::Stopped).await;
    }

    #[tokio::test]
    async fn test_dropping_controller_stops_device() {
        let camera = camera();
        let controller = controller(&camera);
        controller.configure().await.unwrap();
        controller.start().await;
        let notifier = controller.environment_notifier();
        let mut stream = controller.subscribe_to_state().await.unwrap();
        assert!(camera.is_running());

        drop(controller);

        tokio::time::timeout(Duration::from_secs(2), async {
            while camera.is_running() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("device still running");
        assert!(!notifier.notify(EnvironmentEvent::LeftBackground));
        assert_eq!(stream.recv().await, Some(SessionState::Running));
        assert_eq!(stream.recv().await, None);
    }
}
