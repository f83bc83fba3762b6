//! Process-wide notifications
//!
//! Environment signals (`app.*`, `camera.interrupted`) flow in to the session
//! controller over the bus; camera, scanner and capture-error updates flow out
//! to whoever is listening (the console logger, tests).

pub mod types;

pub use types::SystemEvent;

use tokio::sync::broadcast;

/// Events a receiver may fall behind before it sees `Lagged`
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Fan-out of [`SystemEvent`]s to every live receiver
///
/// Publishing never blocks and never fails. Receivers created after a
/// publish do not see it.
///
/// # Example
///
/// ```no_run
/// use scancam::events::{EventBus, SystemEvent};
///
/// # async fn demo() {
/// let bus = EventBus::new();
/// let mut rx = bus.subscribe();
///
/// bus.publish(SystemEvent::CameraInterrupted { reason: None });
///
/// while let Ok(event) = rx.recv().await {
///     if event.matches_topic("camera.*") {
///         println!("{}", event.event_name());
///     }
/// }
/// # }
/// ```
pub struct EventBus {
    tx: broadcast::Sender<SystemEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Send `event` to all current receivers; dropped if there are none
    pub fn publish(&self, event: SystemEvent) {
        let _ = self.tx.send(event);
    }

    /// Receiver for events published from now on
    ///
    /// A receiver more than `EVENT_CHANNEL_CAPACITY` events behind gets
    /// `RecvError::Lagged` and skips the oldest ones.
    pub fn subscribe(&self) -> broadcast::Receiver<SystemEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
