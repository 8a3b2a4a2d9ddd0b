//! Sliding-window rate limiter
//!
//! Admits at most `max` calls within any trailing window. Admission
//! timestamps are kept in a deque and trimmed to entries strictly inside the
//! window on each call.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Thread-safe sliding-window counter
#[derive(Debug)]
pub struct RateLimiter {
    max: usize,
    window: Duration,
    hits: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max: usize, window: Duration) -> Self {
        Self {
            max,
            window,
            hits: Mutex::new(VecDeque::new()),
        }
    }

    /// Admit the call if fewer than `max` admissions fall inside the
    /// trailing window
    pub fn allow(&self) -> bool {
        self.allow_at(Instant::now())
    }

    fn allow_at(&self, now: Instant) -> bool {
        let mut hits = self.hits.lock();
        if let Some(cutoff) = now.checked_sub(self.window) {
            while hits.front().is_some_and(|&t| t <= cutoff) {
                hits.pop_front();
            }
        }
        if hits.len() < self.max {
            hits.push_back(now);
            true
        } else {
            false
        }
    }
}
