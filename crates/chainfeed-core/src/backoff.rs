//! Bounded reconnect backoff.
//!
//! Attempt numbers are 1-based and count consecutive failures since the last
//! successful open. Once `attempt` exceeds `max_attempts` the policy returns
//! `None` and the caller gives up.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffSchedule {
    /// `base * n`
    #[default]
    Linear,
    /// `base * 2^(n-1)`
    Exponential,
}

/// Configuration for reconnect attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Delay unit, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Automatic attempts allowed before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub schedule: BackoffSchedule,
    /// Upper bound on any single delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_base_delay_ms() -> u64 { 1_000 }
fn default_max_attempts() -> u32 { 5 }
fn default_max_delay_ms() -> u64 { 30_000 }

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_attempts: default_max_attempts(),
            schedule: BackoffSchedule::Linear,
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl ReconnectConfig {
    /// A policy that never retries.
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_schedule(mut self, schedule: BackoffSchedule) -> Self {
        self.schedule = schedule;
        self
    }
}

/// Stateless reconnect policy — computes the delay given the attempt number.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub config: ReconnectConfig,
}

impl ReconnectPolicy {
    pub fn new(config: ReconnectConfig) -> Self {
        Self { config }
    }

    /// Returns the delay before the `attempt`-th reconnect (1-based).
    /// Returns `None` if `attempt` exceeds `max_attempts`.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || !self.should_retry(attempt) {
            return None;
        }
        let base = self.config.base_delay_ms;
        let raw = match self.config.schedule {
            BackoffSchedule::Linear => base.saturating_mul(attempt as u64),
            BackoffSchedule::Exponential => {
                base.saturating_mul(1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX))
            }
        };
        Some(Duration::from_millis(raw.min(self.config.max_delay_ms)))
    }

    /// Returns `true` if the `attempt`-th reconnect is still within budget.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.config.max_attempts
    }
}
