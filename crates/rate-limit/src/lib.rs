//! Sliding-window usage counter for bounding this process's share of an
//! external rate limit.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::trace;

/// Configuration for a [`RateLimiter`].
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct RateLimiterConfig {
    /// Total weight allowed inside one window.
    pub max_quota: u64,

    /// Length of the trailing window.
    pub window: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_quota: 1200,
            window: Duration::from_secs(60),
        }
    }
}

/// Tracks weighted usage over a trailing time window.
///
/// The limiter only counts. It never blocks or rejects; callers compare
/// [`RateLimiter::quota`] against their own threshold and decide whether to
/// proceed. State lives in memory only and resets with the process.
#[derive(Debug)]
pub struct RateLimiter {
    max_quota: u64,
    window: Duration,
    history: Mutex<VecDeque<(Instant, u64)>>,
}

impl RateLimiter {
    /// Creates a limiter with the given capacity and window.
    #[must_use]
    pub fn new(RateLimiterConfig { max_quota, window }: RateLimiterConfig) -> Self {
        Self {
            max_quota,
            window,
            history: Mutex::new(VecDeque::new()),
        }
    }

    /// The configured capacity.
    #[must_use]
    pub const fn max_quota(&self) -> u64 {
        self.max_quota
    }

    /// Records `weight` units of usage and returns the total used inside the
    /// window, including this entry.
    pub fn record(&self, weight: u64) -> u64 {
        let now = Instant::now();
        let mut history = self.history.lock();

        let used = prune(&mut history, now, self.window).saturating_add(weight);
        history.push_back((now, weight));

        trace!(weight, used, "recorded rate limiter usage");
        used
    }

    /// Returns the remaining capacity inside the window, never below zero.
    #[must_use]
    pub fn quota(&self) -> u64 {
        self.max_quota.saturating_sub(self.used())
    }

    /// Returns the total weight recorded inside the window.
    #[must_use]
    pub fn used(&self) -> u64 {
        let mut history = self.history.lock();
        prune(&mut history, Instant::now(), self.window)
    }

    /// Runs `future` and records `weight` once it finishes, whatever its
    /// outcome.
    pub async fn track<F>(&self, weight: u64, future: F) -> F::Output
    where
        F: Future,
    {
        let output = future.await;
        self.record(weight);
        output
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}

/// Drops entries at or before `now - window` and returns the remaining sum.
fn prune(history: &mut VecDeque<(Instant, u64)>, now: Instant, window: Duration) -> u64 {
    if let Some(cutoff) = now.checked_sub(window) {
        while history.front().is_some_and(|(at, _)| *at <= cutoff) {
            history.pop_front();
        }
    }

    history
        .iter()
        .fold(0, |total: u64, (_, weight)| total.saturating_add(*weight))
}
