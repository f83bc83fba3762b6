//! Randomized recognizer for demos and tests

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{RecognitionResult, RecognitionService, StillImage};
use crate::error::{AppError, Result};

const UNKNOWN_LABEL: &str = "Unknown Food";

/// Picks a random label after an optional simulated delay
pub struct MockRecognitionService {
    labels: Vec<String>,
    delay: Duration,
    failure: Mutex<Option<String>>,
    calls: AtomicU64,
}

impl MockRecognitionService {
    pub fn new(labels: Vec<String>, delay: Duration) -> Self {
        Self {
            labels,
            delay,
            failure: Mutex::new(None),
            calls: AtomicU64::new(0),
        }
    }

    /// Make every following call fail with `message` (`None` to recover)
    pub fn set_failure(&self, message: Option<String>) {
        *self.failure.lock() = message;
    }

    /// Number of calls that got past the initial cancellation check
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecognitionService for MockRecognitionService {
    async fn recognize(
        &self,
        image: &StillImage,
        cancel: &CancellationToken,
    ) -> Result<RecognitionResult> {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        debug!(
            "Recognizing frame #{} ({})",
            image.sequence, image.resolution
        );

        if !self.delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(AppError::Cancelled),
                _ = tokio::time::sleep(self.delay) => {}
            }
        }

        let failure = self.failure.lock().clone();
        if let Some(message) = failure {
            return Err(AppError::Recognition(message));
        }

        let result = {
            let mut rng = rand::thread_rng();
            let label = self
                .labels
                .choose(&mut rng)
                .map(String::as_str)
                .unwrap_or(UNKNOWN_LABEL);
            RecognitionResult::new(label, rng.gen_range(0.6..0.99))
        };

        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::format::Resolution;

    fn image() -> StillImage {
        StillImage::from_rgb(vec![0; 2 * 2 * 3], Resolution::new(2, 2)).unwrap()
    }

    fn labels() -> Vec<String> {
        vec!["Avocado Toast".to_string(), "Chocolate Cake".to_string()]
    }

    #[tokio::test]
    async fn test_returns_known_label() {
        let service = MockRecognitionService::new(labels(), Duration::ZERO);
        let result = service
            .recognize(&image(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(labels().contains(&result.label));
        assert!((0.6..0.99).contains(&result.confidence));
    }

    #[tokio::test]
    async fn test_empty_vocabulary_falls_back() {
        let service = MockRecognitionService::new(Vec::new(), Duration::ZERO);
        let result = service
            .recognize(&image(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.label, UNKNOWN_LABEL);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let service = MockRecognitionService::new(labels(), Duration::ZERO);
        let token = CancellationToken::new();
        token.cancel();
        let err = service.recognize(&image(), &token).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(service.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_during_delay() {
        let service = MockRecognitionService::new(labels(), Duration::from_secs(10));
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let err = service.recognize(&image(), &token).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let service = MockRecognitionService::new(labels(), Duration::ZERO);
        service.set_failure(Some("model unavailable".to_string()));
        let err = service
            .recognize(&image(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Recognition(m) if m == "model unavailable"));
    }
}
