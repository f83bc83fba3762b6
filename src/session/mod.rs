//! Camera session lifecycle
//!
//! [`SessionController`] owns the capture device and derives the published
//! [`SessionState`] from explicit start/stop requests and environment
//! signals. Observers follow it through [`StateStream`]s.

pub mod controller;
pub mod registry;
pub mod state;

pub use controller::{
    ControllerStatus, EnvironmentEvent, EnvironmentNotifier, SessionController, SessionOptions,
};
pub use registry::{StateStream, SubscriberId, SubscriberRegistry};
pub use state::{SessionFlags, SessionState};
