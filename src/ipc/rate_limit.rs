// src/ipc/rate_limit.rs
// Fixed-window per-operation rate limiting

use crate::error::{Result, VaultError};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Calls allowed per operation per second.
pub const RATE_LIMIT_PER_SEC: u32 = 5;

struct Window {
    started: Instant,
    count: u32,
}

/// Fixed one-second windows, tracked per operation name. Callers that
/// exceed the limit get an immediate rejection rather than queueing —
/// backpressure belongs to the UI layer.
pub struct RateLimiter {
    limit: u32,
    state: Mutex<HashMap<String, Window>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RATE_LIMIT_PER_SEC)
    }
}

impl RateLimiter {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            state: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, op: &str) -> Result<()> {
        let mut state = self.state.lock().expect("rate limiter mutex poisoned");
        let now = Instant::now();
        let window = state.entry(op.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });

        if now.duration_since(window.started) >= Duration::from_secs(1) {
            window.started = now;
            window.count = 0;
        }
        if window.count >= self.limit {
            return Err(VaultError::RateLimited(op.to_string()));
        }
        window.count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_enforced_per_window() {
        let limiter = RateLimiter::new(3);
        for _ in 0..3 {
            limiter.check("set_fact").unwrap();
        }
        assert!(matches!(
            limiter.check("set_fact"),
            Err(VaultError::RateLimited(_))
        ));
    }

    #[test]
    fn test_ops_tracked_independently() {
        let limiter = RateLimiter::new(1);
        limiter.check("set_fact").unwrap();
        limiter.check("health").unwrap();
        assert!(limiter.check("set_fact").is_err());
        assert!(limiter.check("health").is_err());
    }
}
