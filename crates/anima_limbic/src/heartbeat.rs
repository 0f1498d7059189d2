//! Heartbeat configuration for the tick loop
//!
//! The heartbeat determines how frequently the scheduler ticks, with or
//! without external stimuli, and optionally how many ticks it runs.

use anima_core::config::SchedulerConfig;
use std::time::Duration;

/// Configuration for the heartbeat loop
#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatConfig {
    /// How often to tick (default: 100ms)
    pub interval: Duration,
    /// Stop on its own after this many ticks. `None` runs until stopped.
    pub tick_limit: Option<u64>,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            tick_limit: None,
        }
    }
}

impl From<&SchedulerConfig> for HeartbeatConfig {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            interval: config.tick_interval(),
            tick_limit: None,
        }
    }
}

impl HeartbeatConfig {
    /// Very fast heartbeat for testing
    pub fn testing() -> Self {
        Self {
            interval: Duration::from_millis(1),
            tick_limit: None,
        }
    }

    pub fn with_tick_limit(mut self, ticks: u64) -> Self {
        self.tick_limit = Some(ticks);
        self
    }

    /// Whether `tick` is the last tick this heartbeat should run.
    pub fn is_last(&self, tick: u64) -> bool {
        self.tick_limit.is_some_and(|limit| tick >= limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_scheduler_config() {
        let cfg = SchedulerConfig {
            tick_interval_ms: 25,
            ..SchedulerConfig::default()
        };
        let hb = HeartbeatConfig::from(&cfg);
        assert_eq!(hb.interval, Duration::from_millis(25));
        assert_eq!(hb.tick_limit, None);
        assert!(!hb.is_last(1_000_000));
    }

    #[test]
    fn test_tick_limit() {
        let hb = HeartbeatConfig::testing().with_tick_limit(3);
        assert!(!hb.is_last(2));
        assert!(hb.is_last(3));
    }
}
