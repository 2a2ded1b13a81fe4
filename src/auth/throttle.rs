//! Login attempt throttling.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use super::clock::Clock;

pub trait LoginThrottle: Send + Sync {
    /// Record an attempt for `key` and report whether it must be refused.
    fn should_throttle(&self, key: &str) -> bool;
}

#[derive(Clone, Debug)]
pub struct NoopThrottle;

impl LoginThrottle for NoopThrottle {
    fn should_throttle(&self, _key: &str) -> bool {
        false
    }
}

/// At most `limit` attempts per key within each `window`.
pub struct FixedWindowThrottle {
    limit: u32,
    window: Duration,
    clock: Arc<dyn Clock>,
    windows: Mutex<HashMap<String, (DateTime<Utc>, u32)>>,
}

impl FixedWindowThrottle {
    #[must_use]
    pub fn new(limit: u32, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            limit,
            window,
            clock,
            windows: Mutex::new(HashMap::new()),
        }
    }
}

impl LoginThrottle for FixedWindowThrottle {
    fn should_throttle(&self, key: &str) -> bool {
        let now = self.clock.now();
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        windows.retain(|_, (started, _)| now < *started + self.window);

        let (_, attempts) = windows.entry(key.to_string()).or_insert((now, 0));
        *attempts = attempts.saturating_add(1);
        *attempts > self.limit
    }
}
