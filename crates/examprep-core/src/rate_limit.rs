//! Sliding-window rate limiting for generation requests.
//!
//! The limiter keeps the timestamps of calls it allowed during the trailing
//! window. Every check first drops timestamps that fell out of the window,
//! then admits the call only if fewer than `max_calls` remain.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Counts allowed calls over a trailing time window.
///
/// Plain data: callers that share one limiter wrap it in a `Mutex`
/// (see [`StudySession`](crate::session::StudySession)).
#[derive(Debug, Clone)]
pub struct SlidingWindowLimiter {
    max_calls: usize,
    period: Duration,
    /// Allowed-call timestamps, oldest first.
    calls: VecDeque<Instant>,
}

impl SlidingWindowLimiter {
    pub fn new(max_calls: usize, period: Duration) -> Self {
        Self {
            max_calls,
            period,
            calls: VecDeque::with_capacity(max_calls.min(64)),
        }
    }

    pub fn max_calls(&self) -> usize {
        self.max_calls
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Record a call now if the window has room. Returns whether it may proceed.
    pub fn allow(&mut self) -> bool {
        self.allow_at(Instant::now())
    }

    /// [`allow`](Self::allow) against an explicit clock reading.
    pub fn allow_at(&mut self, now: Instant) -> bool {
        self.prune(now);
        if self.calls.len() < self.max_calls {
            self.calls.push_back(now);
            true
        } else {
            false
        }
    }

    /// Calls still available in the current window. Never underflows.
    pub fn remaining(&mut self) -> usize {
        self.remaining_at(Instant::now())
    }

    pub fn remaining_at(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.max_calls.saturating_sub(self.calls.len())
    }

    /// How long until the oldest recorded call leaves the window, if the
    /// window is currently full.
    pub fn retry_after_at(&mut self, now: Instant) -> Option<Duration> {
        self.prune(now);
        if self.calls.len() < self.max_calls {
            return None;
        }
        let oldest = self.calls.front()?;
        Some((*oldest + self.period).saturating_duration_since(now))
    }

    fn prune(&mut self, now: Instant) {
        // Timestamps exactly `period` old are already outside the window.
        while let Some(&oldest) = self.calls.front() {
            if now.saturating_duration_since(oldest) >= self.period {
                self.calls.pop_front();
            } else {
                break;
            }
        }
    }
}
