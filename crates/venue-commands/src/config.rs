//! Dispatcher configuration.
//!
//! Defaults live in [`defaults`], environment overrides in [`env_vars`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Environment variable names.
pub mod env_vars {
    pub const DEADLINE_MS: &str = "VENUE_DEADLINE_MS";
    pub const HISTORY_CAPACITY: &str = "VENUE_HISTORY_CAPACITY";
    pub const QUEUE_CAPACITY: &str = "VENUE_QUEUE_CAPACITY";
    pub const MAX_CONCURRENT: &str = "VENUE_MAX_CONCURRENT";
}

/// Default values.
pub mod defaults {
    /// Executor deadline when the executor does not declare one
    pub const DEADLINE_MS: u64 = 5000;
    /// Commands kept for read-back
    pub const HISTORY_CAPACITY: usize = 500;
    /// Pending commands accepted by the queue
    pub const QUEUE_CAPACITY: usize = 1000;
    /// Commands the processor runs at once
    pub const MAX_CONCURRENT: usize = 10;
    /// Processor idle poll interval
    pub const POLL_INTERVAL_MS: u64 = 50;
    /// Buffered lifecycle events per subscriber
    pub const EVENT_CAPACITY: usize = 256;
    /// Relative volume step in percent
    pub const VOLUME_STEP: u8 = 5;
    /// Volume assumed when nothing is cached
    pub const DEFAULT_VOLUME: u8 = 50;
}

fn default_deadline_ms() -> u64 {
    defaults::DEADLINE_MS
}

fn default_history_capacity() -> usize {
    defaults::HISTORY_CAPACITY
}

fn default_queue_capacity() -> usize {
    defaults::QUEUE_CAPACITY
}

fn default_max_concurrent() -> usize {
    defaults::MAX_CONCURRENT
}

fn default_poll_interval_ms() -> u64 {
    defaults::POLL_INTERVAL_MS
}

fn default_event_capacity() -> usize {
    defaults::EVENT_CAPACITY
}

/// Dispatcher and processor configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Deadline for executors that do not declare their own
    #[serde(default = "default_deadline_ms")]
    pub default_deadline_ms: u64,
    /// Commands kept for read-back
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    /// Pending commands accepted by the queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Commands the processor runs at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Processor idle poll interval
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Buffered lifecycle events per subscriber
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            default_deadline_ms: defaults::DEADLINE_MS,
            history_capacity: defaults::HISTORY_CAPACITY,
            queue_capacity: defaults::QUEUE_CAPACITY,
            max_concurrent: defaults::MAX_CONCURRENT,
            poll_interval_ms: defaults::POLL_INTERVAL_MS,
            event_capacity: defaults::EVENT_CAPACITY,
        }
    }
}

impl DispatcherConfig {
    /// Defaults overridden by any environment variables that parse.
    pub fn from_env() -> Self {
        Self {
            default_deadline_ms: env_or(env_vars::DEADLINE_MS, defaults::DEADLINE_MS),
            history_capacity: env_or(env_vars::HISTORY_CAPACITY, defaults::HISTORY_CAPACITY),
            queue_capacity: env_or(env_vars::QUEUE_CAPACITY, defaults::QUEUE_CAPACITY),
            max_concurrent: env_or(env_vars::MAX_CONCURRENT, defaults::MAX_CONCURRENT),
            ..Self::default()
        }
    }

    /// Set the default deadline.
    pub fn with_deadline_ms(mut self, deadline_ms: u64) -> Self {
        self.default_deadline_ms = deadline_ms;
        self
    }

    /// Set the processor concurrency limit.
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    /// Default executor deadline.
    pub fn default_deadline(&self) -> Duration {
        Duration::from_millis(self.default_deadline_ms)
    }

    /// Processor poll interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
