use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    pub min_interval_secs: u64,
    pub max_calls_per_hour: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: 180,
            max_calls_per_hour: 12,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitState {
    pub last_call_at: Option<DateTime<Utc>>,
    /// Calls within the trailing hour
    pub calls_this_hour: u32,
    /// Oldest call still inside the trailing hour
    pub hour_window_start: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    /// Minimum interval not yet elapsed
    Cooldown { retry_after_secs: i64 },
    /// Hourly cap reached within the trailing hour
    HourlyCap { window_resets_in_secs: i64 },
}

/// Gate in front of the external auditor. All mutation goes through
/// [`RateLimiter::check_and_update`], which records the call when it allows one.
/// The cap applies to any sliding one-hour span, not to fixed windows.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    state: RateLimitState,
    /// Allowed call times, oldest first; never longer than the hourly cap
    recent_calls: VecDeque<DateTime<Utc>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: RateLimitState::default(),
            recent_calls: VecDeque::new(),
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    pub fn state(&self) -> &RateLimitState {
        &self.state
    }

    pub fn check_and_update(&mut self, now: DateTime<Utc>) -> RateDecision {
        let hour = Duration::hours(1);
        while self
            .recent_calls
            .front()
            .is_some_and(|&oldest| now - oldest >= hour)
        {
            self.recent_calls.pop_front();
        }
        self.sync_window();

        if let Some(last) = self.state.last_call_at {
            let min_interval = Duration::seconds(self.config.min_interval_secs as i64);
            let elapsed = now - last;
            if elapsed < min_interval {
                return RateDecision::Cooldown {
                    retry_after_secs: (min_interval - elapsed).num_seconds(),
                };
            }
        }

        if self.recent_calls.len() >= self.config.max_calls_per_hour as usize {
            let resets_at = self.recent_calls.front().copied().unwrap_or(now) + hour;
            return RateDecision::HourlyCap {
                window_resets_in_secs: (resets_at - now).num_seconds(),
            };
        }

        self.recent_calls.push_back(now);
        self.state.last_call_at = Some(now);
        self.sync_window();
        RateDecision::Allowed
    }

    fn sync_window(&mut self) {
        self.state.calls_this_hour = self.recent_calls.len() as u32;
        self.state.hour_window_start = self.recent_calls.front().copied();
    }
}
