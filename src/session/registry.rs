//! State-change subscribers
//!
//! Each subscriber owns a dedicated unbounded channel, so publishing never
//! waits on a slow reader and every reader sees its own states in publish
//! order. The registry lives inside the controller's serialized context;
//! streams reach it again only through their termination hook.

use futures::Stream;
use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::state::SessionState;

/// Opaque subscriber token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Registry of live state subscribers
#[derive(Debug, Default)]
pub struct SubscriberRegistry {
    next_id: u64,
    subscribers: HashMap<SubscriberId, mpsc::UnboundedSender<SessionState>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber whose first element is `initial`
    pub fn subscribe(
        &mut self,
        initial: SessionState,
    ) -> (SubscriberId, mpsc::UnboundedReceiver<SessionState>) {
        self.next_id += 1;
        let id = SubscriberId(self.next_id);
        let (tx, rx) = mpsc::unbounded_channel();
        // Cannot fail: the receiver is still in hand
        let _ = tx.send(initial);
        self.subscribers.insert(id, tx);
        debug!("State subscriber {} added ({} total)", id, self.subscribers.len());
        (id, rx)
    }

    /// Deliver `state` to every subscriber; returns how many received it
    ///
    /// Subscribers whose receiving side is gone are dropped on the way.
    pub fn publish(&mut self, state: SessionState) -> usize {
        let before = self.subscribers.len();
        self.subscribers.retain(|id, tx| {
            let alive = tx.send(state).is_ok();
            if !alive {
                trace!("Pruning closed subscriber {}", id);
            }
            alive
        });
        let pruned = before - self.subscribers.len();
        if pruned > 0 {
            debug!("Pruned {} closed state subscribers", pruned);
        }
        self.subscribers.len()
    }

    /// Remove a subscriber and close its channel
    ///
    /// Unknown or already removed ids are ignored.
    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        let removed = self.subscribers.remove(&id).is_some();
        if removed {
            debug!("State subscriber {} removed ({} left)", id, self.subscribers.len());
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

/// Hook run once when a [`StateStream`] is dropped
pub type TerminationHook = Box<dyn FnOnce(SubscriberId) + Send>;

/// Reader side of one subscription
///
/// Yields the state current at subscription time, then every published
/// change. Ends when the controller goes away. Dropping it deregisters the
/// subscriber.
pub struct StateStream {
    id: SubscriberId,
    rx: mpsc::UnboundedReceiver<SessionState>,
    on_drop: Option<TerminationHook>,
}

impl StateStream {
    pub fn new(
        id: SubscriberId,
        rx: mpsc::UnboundedReceiver<SessionState>,
        on_drop: Option<TerminationHook>,
    ) -> Self {
        Self { id, rx, on_drop }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next state; `None` once the controller is gone
    pub async fn recv(&mut self) -> Option<SessionState> {
        self.rx.recv().await
    }

    /// Take an already delivered state without waiting
    pub fn try_recv(&mut self) -> Option<SessionState> {
        self.rx.try_recv().ok()
    }
}

impl Stream for StateStream {
    type Item = SessionState;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for StateStream {
    fn drop(&mut self) {
        self.rx.close();
        if let Some(hook) = self.on_drop.take() {
            hook(self.id);
        }
    }
}

impl fmt::Debug for StateStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateStream").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_initial_state_is_replayed() {
        let mut registry = SubscriberRegistry::new();
        let (_id, mut rx) = registry.subscribe(SessionState::Running);
        assert_eq!(rx.try_recv().ok(), Some(SessionState::Running));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_per_subscriber_order() {
        let mut registry = SubscriberRegistry::new();
        let (_a, mut rx_a) = registry.subscribe(SessionState::Stopped);
        registry.publish(SessionState::Running);
        let (_b, mut rx_b) = registry.subscribe(SessionState::Running);
        registry.publish(SessionState::Interrupted);
        registry.publish(SessionState::Running);

        let drain = |rx: &mut mpsc::UnboundedReceiver<SessionState>| {
            std::iter::from_fn(|| rx.try_recv().ok()).collect::<Vec<_>>()
        };
        assert_eq!(
            drain(&mut rx_a),
            vec![
                SessionState::Stopped,
                SessionState::Running,
                SessionState::Interrupted,
                SessionState::Running
            ]
        );
        assert_eq!(
            drain(&mut rx_b),
            vec![
                SessionState::Running,
                SessionState::Interrupted,
                SessionState::Running
            ]
        );
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let mut registry = SubscriberRegistry::new();
        let (id, mut rx) = registry.subscribe(SessionState::Stopped);
        assert!(registry.unsubscribe(id));
        assert!(!registry.unsubscribe(id));
        assert!(registry.is_empty());

        // Replay is still readable, then the channel reports closed
        assert_eq!(rx.try_recv().ok(), Some(SessionState::Stopped));
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_abandoned_receivers_are_pruned() {
        let mut registry = SubscriberRegistry::new();
        let (_a, rx_a) = registry.subscribe(SessionState::Stopped);
        let (_b, _rx_b) = registry.subscribe(SessionState::Stopped);
        drop(rx_a);

        assert_eq!(registry.publish(SessionState::Running), 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_stream_runs_hook_once_on_drop() {
        let mut registry = SubscriberRegistry::new();
        let (id, rx) = registry.subscribe(SessionState::Stopped);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let hook_seen = seen.clone();

        let mut stream = StateStream::new(
            id,
            rx,
            Some(Box::new(move |id| hook_seen.lock().unwrap().push(id))),
        );
        assert_eq!(stream.next().await, Some(SessionState::Stopped));
        drop(stream);

        assert_eq!(*seen.lock().unwrap(), vec![id]);
        registry.unsubscribe(id);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_stream_ends_when_registry_drops() {
        let mut registry = SubscriberRegistry::new();
        let (id, rx) = registry.subscribe(SessionState::Running);
        let mut stream = StateStream::new(id, rx, None);
        drop(registry);

        assert_eq!(stream.recv().await, Some(SessionState::Running));
        assert_eq!(stream.recv().await, None);
    }
}
