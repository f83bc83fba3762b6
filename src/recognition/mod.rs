//! Recognition collaborator
//!
//! A recognizer consumes one still image and names what it sees. Calls carry
//! a [`CancellationToken`]; implementations check it before and after their
//! expensive work and return [`AppError::Cancelled`](crate::error::AppError::Cancelled)
//! once it fires.

pub mod image;
pub mod mock;

pub use image::StillImage;
pub use mock::MockRecognitionService;
pub use tokio_util::sync::CancellationToken;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// Outcome of a successful recognition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResult {
    pub id: Uuid,
    /// Recognized item name
    pub label: String,
    /// Confidence in `0.0..=1.0`
    pub confidence: f32,
    pub recognized_at: DateTime<Utc>,
}

impl RecognitionResult {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: label.into(),
            confidence: confidence.clamp(0.0, 1.0),
            recognized_at: Utc::now(),
        }
    }
}

/// Image recognizer
#[async_trait]
pub trait RecognitionService: Send + Sync {
    async fn recognize(
        &self,
        image: &StillImage,
        cancel: &CancellationToken,
    ) -> Result<RecognitionResult>;
}
