//! Log throttling for hot paths
//!
//! The capture callback runs once per frame; a persistent failure there would
//! otherwise write a warning thirty times a second.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Limits how often the same message key is logged
///
/// ```rust
/// use std::time::Duration;
/// use scancam::utils::LogThrottler;
///
/// let throttler = LogThrottler::new(Duration::from_secs(5));
/// assert!(throttler.should_log("frame_copy_failed"));
/// assert!(!throttler.should_log("frame_copy_failed"));
/// ```
pub struct LogThrottler {
    /// Last log time and suppressed count per key
    entries: Mutex<HashMap<String, (Instant, u64)>>,
    interval: Duration,
}

impl LogThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            interval,
        }
    }

    /// Create a throttler with the interval given in seconds
    pub fn with_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Returns `true` if a message for `key` should be logged now
    pub fn should_log(&self, key: &str) -> bool {
        self.admit(key).is_some()
    }

    /// Like [`should_log`](Self::should_log), but also returns how many
    /// messages for `key` were suppressed since the last admitted one
    pub fn admit(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        match entries.get_mut(key) {
            Some((last, suppressed)) if now.duration_since(*last) < self.interval => {
                *suppressed = suppressed.saturating_add(1);
                None
            }
            Some((last, suppressed)) => {
                let dropped = *suppressed;
                *last = now;
                *suppressed = 0;
                Some(dropped)
            }
            None => {
                entries.insert(key.to_string(), (now, 0));
                Some(0)
            }
        }
    }

    /// Forget a key so its next occurrence logs immediately
    ///
    /// Call when the condition recovers.
    pub fn clear(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    /// Number of tracked keys
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for LogThrottler {
    /// Five second interval
    fn default() -> Self {
        Self::with_secs(5)
    }
}

/// Throttled `tracing::warn!`
#[macro_export]
macro_rules! warn_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if $throttler.should_log($key) {
            tracing::warn!($($arg)*);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_throttling() {
        let throttler = LogThrottler::new(Duration::from_millis(100));

        assert!(throttler.should_log("test_key"));
        assert!(!throttler.should_log("test_key"));

        thread::sleep(Duration::from_millis(150));
        assert!(throttler.should_log("test_key"));
    }

    #[test]
    fn test_suppressed_count() {
        let throttler = LogThrottler::new(Duration::from_millis(50));

        assert_eq!(throttler.admit("copy"), Some(0));
        assert_eq!(throttler.admit("copy"), None);
        assert_eq!(throttler.admit("copy"), None);

        thread::sleep(Duration::from_millis(80));
        assert_eq!(throttler.admit("copy"), Some(2));
    }

    #[test]
    fn test_keys_are_independent() {
        let throttler = LogThrottler::with_secs(10);

        assert!(throttler.should_log("key1"));
        assert!(throttler.should_log("key2"));
        assert!(!throttler.should_log("key1"));
        assert_eq!(throttler.len(), 2);
    }

    #[test]
    fn test_clear() {
        let throttler = LogThrottler::with_secs(10);

        assert!(throttler.should_log("test_key"));
        throttler.clear("test_key");
        assert!(throttler.should_log("test_key"));
        throttler.clear("test_key");
        assert!(throttler.is_empty());
    }
}
