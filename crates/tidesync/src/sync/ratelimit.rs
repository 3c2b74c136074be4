//! Named-tag rate limiting
//!
//! Grants at most one permit per tag per interval. Denied calls are
//! dropped, not queued; the caller simply waits for the next trigger.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use log::debug;

/// Rate limiter keyed by string tag
pub struct RateLimiter {
    last_grant: Mutex<HashMap<String, i64>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            last_grant: Mutex::new(HashMap::new()),
        }
    }

    /// Request a permit for `tag`; at most one grant per
    /// `min_interval_secs` window
    pub fn allow(&self, tag: &str, min_interval_secs: i64) -> bool {
        self.allow_at(tag, min_interval_secs, Utc::now().timestamp())
    }

    /// Clock-parameterized variant of [`allow`](Self::allow)
    pub fn allow_at(&self, tag: &str, min_interval_secs: i64, now_secs: i64) -> bool {
        let mut last_grant = self.last_grant.lock().unwrap();
        if let Some(&granted) = last_grant.get(tag)
            && now_secs - granted < min_interval_secs
        {
            debug!("rate limit hit for {}", tag);
            return false;
        }
        last_grant.insert(tag.to_string(), now_secs);
        true
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
