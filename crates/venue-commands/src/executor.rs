//! Executor capability contract.
//!
//! One implementation per protocol or device class. Executors are registered
//! with the [`ProtocolRouter`](crate::router::ProtocolRouter) and invoked by the
//! [`Dispatcher`](crate::dispatcher::Dispatcher) under a deadline.

use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::command::{Command, ExecutionResult};
use crate::error::ErrorKind;

/// Data key carrying the measured execution time.
pub const EXECUTION_TIME_KEY: &str = "execution_time_ms";

/// Protocol-specific command executor.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Executor name, used in logs.
    fn name(&self) -> &str;

    /// Pure predicate on device class and protocol. Must not perform I/O.
    fn can_execute(&self, command: &Command) -> bool;

    /// Perform the command.
    ///
    /// Every internal failure must come back as a failed `ExecutionResult`;
    /// nothing may escape as a panic.
    async fn execute(&self, command: &Command) -> ExecutionResult;

    /// Deadline for this command, `None` to use the dispatcher default.
    fn deadline(&self, _command: &Command) -> Option<Duration> {
        None
    }

    /// Release cached connections on shutdown.
    async fn cleanup(&self) {}
}

/// Measures one execution and stamps the elapsed time onto its result.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionTimer {
    started: Instant,
}

impl ExecutionTimer {
    /// Start timing.
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    /// Elapsed milliseconds.
    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Stamp `execution_time_ms` onto the result unless it already carries one.
    pub fn finish(&self, mut result: ExecutionResult) -> ExecutionResult {
        if !result.data.contains_key(EXECUTION_TIME_KEY) {
            result.insert_data(EXECUTION_TIME_KEY, self.elapsed_ms());
        }
        result
    }
}

/// Failure for an action the executor does not implement.
pub fn unsupported_action(executor: &str, command: &Command) -> ExecutionResult {
    ExecutionResult::failure(
        ErrorKind::UnsupportedAction,
        format!(
            "{} does not support action '{}' on {}",
            executor, command.action, command.device_class
        ),
    )
    .with_data("action", command.action.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::DeviceClass;

    #[test]
    fn test_timer_stamps_elapsed_time() {
        let timer = ExecutionTimer::start();
        let result = timer.finish(ExecutionResult::success("ok"));
        assert!(result.data.contains_key(EXECUTION_TIME_KEY));
    }

    #[test]
    fn test_timer_keeps_existing_stamp() {
        let timer = ExecutionTimer::start();
        let result = timer.finish(ExecutionResult::success("ok").with_data(EXECUTION_TIME_KEY, 7));
        assert_eq!(result.data[EXECUTION_TIME_KEY], 7);
    }

    #[test]
    fn test_unsupported_action_result() {
        let cmd = Command::new("tv-1", DeviceClass::NetworkTv, "warp_speed");
        let result = unsupported_action("roku", &cmd);
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::UnsupportedAction));
        assert!(result.message.contains("warp_speed"));
    }
}
