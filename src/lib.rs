//! scancam - camera session lifecycle controller
//!
//! This crate owns a single live capture device on behalf of a scanning
//! application: it serializes lifecycle commands, reacts to backgrounding and
//! interruptions, keeps the latest frame available to readers without
//! stalling the capture thread, and broadcasts session state to observers.

pub mod config;
pub mod error;
pub mod events;
pub mod permission;
pub mod recognition;
pub mod scanner;
pub mod session;
pub mod utils;
pub mod video;

pub use error::{AppError, Result};
