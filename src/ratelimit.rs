//! Sliding-window rate limiting for state-changing operations
//!
//! The limiter is owned by the application context and keyed by
//! `(client, action)`. Windows that have gone quiet are dropped by
//! [`RateLimiter::evict_stale`]; nothing is process-global.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::config::{RATE_LIMIT_WINDOW, device_cmd_rate_limit, snmp_set_rate_limit};

/// Operations that are rate limited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitedAction {
    SnmpSet,
    DeviceCommand,
}

impl RateLimitedAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitedAction::SnmpSet => "snmp_set",
            RateLimitedAction::DeviceCommand => "device_cmd",
        }
    }

    /// Calls allowed per window
    pub fn default_limit(&self) -> usize {
        match self {
            RateLimitedAction::SnmpSet => snmp_set_rate_limit(),
            RateLimitedAction::DeviceCommand => device_cmd_rate_limit(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("rate limit exceeded for {action}: {limit} per {window_secs} s, retry in {retry_after_secs} s")]
pub struct RateLimitExceeded {
    pub action: &'static str,
    pub limit: usize,
    pub window_secs: u64,
    pub retry_after_secs: u64,
}

type WindowKey = (String, RateLimitedAction);

#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    hits: Mutex<HashMap<WindowKey, VecDeque<Instant>>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RATE_LIMIT_WINDOW)
    }
}

impl RateLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// Records a call if the window allows it.
    pub fn check(&self, client: &str, action: RateLimitedAction) -> Result<(), RateLimitExceeded> {
        self.check_at(client, action, action.default_limit(), Instant::now())
    }

    pub fn check_at(
        &self,
        client: &str,
        action: RateLimitedAction,
        limit: usize,
        now: Instant,
    ) -> Result<(), RateLimitExceeded> {
        // A poisoned map only loses counters; keep serving
        let mut hits = self.hits.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let window = hits.entry((client.to_string(), action)).or_default();

        while window
            .front()
            .is_some_and(|&t| now.saturating_duration_since(t) >= self.window)
        {
            window.pop_front();
        }

        if window.len() >= limit {
            let oldest = window.front().copied().unwrap_or(now);
            let retry_after = self.window.saturating_sub(now.saturating_duration_since(oldest));
            crate::log_warn!("Rate limit hit: client={} action={}", client, action.as_str());
            return Err(RateLimitExceeded {
                action: action.as_str(),
                limit,
                window_secs: self.window.as_secs(),
                retry_after_secs: retry_after.as_secs().max(1),
            });
        }

        window.push_back(now);
        Ok(())
    }

    /// Drops windows whose newest hit is older than the window length.
    /// Returns how many were removed.
    pub fn evict_stale(&self, now: Instant) -> usize {
        let mut hits = self.hits.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = hits.len();
        hits.retain(|_, window| {
            window
                .back()
                .is_some_and(|&t| now.saturating_duration_since(t) < self.window)
        });
        before - hits.len()
    }

    pub fn tracked_windows(&self) -> usize {
        self.hits.lock().map(|h| h.len()).unwrap_or(0)
    }
}
