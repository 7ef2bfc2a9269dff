//! Global external-call rate limiter
//!
//! Sliding-window admission shared by every tier timer and every manual
//! refresh. A denial is a deferral signal, never an error.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use payview_common::config::RateLimitConfig;

/// Sliding-window limiter: at most `quota` admissions in any `window`
#[derive(Debug)]
pub struct RateLimiter {
    /// Admission instants inside the current window, oldest first
    admitted: Mutex<VecDeque<Instant>>,
    quota: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(quota: u32, window: Duration) -> Self {
        Self {
            admitted: Mutex::new(VecDeque::with_capacity(quota as usize)),
            quota: quota as usize,
            window,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.requests_per_window, Duration::from_secs(config.window_secs))
    }

    /// Try to take one slot now; `false` means retry later
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    /// Try to take one slot at `now`
    ///
    /// Check and record happen under one lock, so concurrent callers can
    /// never both observe the last free slot.
    pub fn try_acquire_at(&self, now: Instant) -> bool {
        let mut admitted = self.admitted.lock().unwrap_or_else(|e| e.into_inner());
        Self::evict(&mut admitted, now, self.window);

        if admitted.len() >= self.quota {
            tracing::debug!(
                in_window = admitted.len(),
                quota = self.quota,
                "Rate limit reached, deferring external call"
            );
            return false;
        }

        admitted.push_back(now);
        true
    }

    /// Admissions inside the window ending now
    pub fn requests_last_minute(&self) -> usize {
        self.requests_in_window_at(Instant::now())
    }

    /// Admissions inside the window ending at `now`
    pub fn requests_in_window_at(&self, now: Instant) -> usize {
        let mut admitted = self.admitted.lock().unwrap_or_else(|e| e.into_inner());
        Self::evict(&mut admitted, now, self.window);
        admitted.len()
    }

    /// Share of the quota used in the window ending now (0.0–100.0)
    pub fn utilization_percent(&self) -> f64 {
        self.utilization_percent_at(Instant::now())
    }

    pub fn utilization_percent_at(&self, now: Instant) -> f64 {
        if self.quota == 0 {
            return 100.0;
        }
        self.requests_in_window_at(now) as f64 * 100.0 / self.quota as f64
    }

    pub fn quota(&self) -> usize {
        self.quota
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn evict(admitted: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(&oldest) = admitted.front() {
            if now.saturating_duration_since(oldest) >= window {
                admitted.pop_front();
            } else {
                break;
            }
        }
    }
}
