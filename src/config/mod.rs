//! Application configuration
//!
//! Schema types with serde defaults plus a file-backed store with lock-free
//! reads and atomic writes.

mod schema;
mod store;

pub use schema::{AppConfig, CameraBackendKind, CameraConfig, ScannerConfig};
pub use store::ConfigStore;
