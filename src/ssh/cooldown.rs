//! Debounce for repeated connect calls on the same session id.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Suppresses a connect attempt made within `window` of the previous one
/// for the same id. Not a backoff: a suppressed attempt is a duplicate.
#[derive(Debug)]
pub struct ConnectCooldown {
    window: Duration,
    attempts: Mutex<HashMap<String, Instant>>,
}

impl ConnectCooldown {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record an attempt for `id`. Returns false if it falls inside the
    /// window of the previous one.
    pub fn try_begin(&self, id: &str) -> bool {
        let now = Instant::now();
        let mut attempts = self.attempts.lock();
        if let Some(last) = attempts.get(id) {
            if now.duration_since(*last) < self.window {
                return false;
            }
        }
        attempts.insert(id.to_string(), now);
        true
    }

    /// Time until `id` may connect again
    pub fn remaining(&self, id: &str) -> Option<Duration> {
        let attempts = self.attempts.lock();
        let elapsed = attempts.get(id)?.elapsed();
        self.window.checked_sub(elapsed).filter(|d| !d.is_zero())
    }

    pub fn reset(&self, id: &str) {
        self.attempts.lock().remove(id);
    }
}
