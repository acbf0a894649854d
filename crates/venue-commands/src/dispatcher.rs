//! Command dispatcher.
//!
//! Runs one command's lifecycle: identity, executor resolution, bounded
//! execution and result capture. Each submission is independent; commands for
//! different controllers never wait on each other here.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::command::{Command, CommandStatus, ExecutionResult};
use crate::config::DispatcherConfig;
use crate::error::ErrorKind;
use crate::events::{CommandEvent, CommandEventBus};
use crate::executor::{Executor, ExecutionTimer};
use crate::router::{ProtocolRouter, RouteKey};
use crate::state::CommandStateStore;

/// Command dispatcher.
pub struct Dispatcher {
    router: Arc<ProtocolRouter>,
    store: Arc<CommandStateStore>,
    events: CommandEventBus,
    config: DispatcherConfig,
}

impl Dispatcher {
    /// Create a dispatcher over a router.
    pub fn new(router: Arc<ProtocolRouter>, config: DispatcherConfig) -> Self {
        Self {
            router,
            store: Arc::new(CommandStateStore::new(config.history_capacity)),
            events: CommandEventBus::new(config.event_capacity),
            config,
        }
    }

    /// Use a shared state store.
    pub fn with_store(mut self, store: Arc<CommandStateStore>) -> Self {
        self.store = store;
        self
    }

    /// The executor registry.
    pub fn router(&self) -> &Arc<ProtocolRouter> {
        &self.router
    }

    /// The command state store.
    pub fn store(&self) -> &Arc<CommandStateStore> {
        &self.store
    }

    /// The lifecycle event bus.
    pub fn events(&self) -> &CommandEventBus {
        &self.events
    }

    /// Active configuration.
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Submit a command and wait for its result.
    ///
    /// Always returns a well-formed result; executor faults, panics and
    /// deadline expiry are folded into failures.
    pub async fn submit(&self, command: Command) -> ExecutionResult {
        let (_, result) = self.dispatch(command).await;
        result
    }

    /// Submit a command and return its terminal record.
    pub async fn submit_tracked(&self, command: Command) -> Command {
        let (command, _) = self.dispatch(command).await;
        command
    }

    /// Get a command by ID.
    pub fn get_result(&self, command_id: &str) -> Option<Command> {
        self.store.get(command_id)
    }

    /// Most recent commands, newest first.
    pub fn list_recent(&self, controller_ref: Option<&str>, limit: usize) -> Vec<Command> {
        self.store.list_recent(controller_ref, limit)
    }

    /// Most recent failed or timed out commands, newest first.
    pub fn list_failed(&self, controller_ref: Option<&str>, limit: usize) -> Vec<Command> {
        self.store.list_failed(controller_ref, limit)
    }

    /// Release every executor's cached resources.
    pub async fn shutdown(&self) {
        info!(executors = self.router.executors().len(), "Dispatcher shutting down");
        self.router.cleanup_all().await;
    }

    /// Give the command an identity and record it as queued.
    pub(crate) fn accept(&self, command: &mut Command) {
        command.assign_identity();
        self.store.store(command);
        self.events.publish(CommandEvent::from_command(command, None));
    }

    /// Execute a command previously passed through [`Dispatcher::accept`].
    pub(crate) async fn run_accepted(&self, mut command: Command) -> (Command, ExecutionResult) {
        let timer = ExecutionTimer::start();

        if let Err(e) = command.transition(CommandStatus::Executing) {
            error!(command_id = %command.id, error = %e, "Command not in queued state");
            let result = timer.finish(ExecutionResult::failure(ErrorKind::InternalError, e.to_string()));
            return (command, result);
        }
        self.record(&command, Some(CommandStatus::Queued));

        let route = RouteKey::for_command(&command);
        let result = match self.router.resolve(&command) {
            Some(executor) => {
                info!(
                    command_id = %command.id,
                    controller = %command.controller_ref,
                    action = %command.action,
                    route = %route,
                    executor = executor.name(),
                    "Executing command"
                );
                self.invoke(executor, &command).await
            }
            None => {
                warn!(
                    command_id = %command.id,
                    controller = %command.controller_ref,
                    route = %route,
                    "No executor for command"
                );
                ExecutionResult::failure(
                    ErrorKind::NoExecutor,
                    format!("No executor registered for {}", route),
                )
            }
        };

        self.finish(command, timer.finish(result))
    }

    async fn dispatch(&self, mut command: Command) -> (Command, ExecutionResult) {
        self.accept(&mut command);
        self.run_accepted(command).await
    }

    async fn invoke(&self, executor: Arc<dyn Executor>, command: &Command) -> ExecutionResult {
        let deadline = executor
            .deadline(command)
            .unwrap_or_else(|| self.config.default_deadline());
        let name = executor.name().to_string();

        // The executor runs on its own task so a panic surfaces as a JoinError
        // instead of unwinding through the dispatcher.
        let task_command = command.clone();
        let mut task = AbortOnDrop(tokio::spawn(async move {
            executor.execute(&task_command).await
        }));

        match tokio::time::timeout(deadline, &mut task.0).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => {
                let detail = if join_error.is_panic() {
                    panic_message(join_error.into_panic())
                } else {
                    "execution task cancelled".to_string()
                };
                error!(
                    command_id = %command.id,
                    executor = %name,
                    detail = %detail,
                    "Executor broke its contract"
                );
                ExecutionResult::failure(
                    ErrorKind::InternalError,
                    format!("Executor {} failed: {}", name, detail),
                )
            }
            Err(_) => {
                warn!(
                    command_id = %command.id,
                    executor = %name,
                    deadline_ms = deadline.as_millis() as u64,
                    "Command deadline expired"
                );
                timeout_result(&name, deadline)
            }
        }
    }

    fn finish(&self, mut command: Command, result: ExecutionResult) -> (Command, ExecutionResult) {
        if let Err(e) = command.complete(result.clone()) {
            error!(command_id = %command.id, error = %e, "Could not record command result");
        }

        match command.status {
            CommandStatus::Completed => info!(
                command_id = %command.id,
                controller = %command.controller_ref,
                action = %command.action,
                "Command completed"
            ),
            status => warn!(
                command_id = %command.id,
                controller = %command.controller_ref,
                action = %command.action,
                status = %status,
                error_kind = ?result.error_kind,
                message = %result.message,
                "Command did not succeed"
            ),
        }

        self.record(&command, Some(CommandStatus::Executing));
        (command, result)
    }

    fn record(&self, command: &Command, previous: Option<CommandStatus>) {
        self.store.store(command);
        self.events.publish(CommandEvent::from_command(command, previous));
    }
}

/// Aborts the wrapped task when dropped, so a cancelled submission or an
/// expired deadline never leaves the executor running.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn timeout_result(executor: &str, deadline: Duration) -> ExecutionResult {
    ExecutionResult::failure(
        ErrorKind::Timeout,
        format!(
            "{} did not complete within {} ms",
            executor,
            deadline.as_millis()
        ),
    )
    .with_data("deadline_ms", deadline.as_millis() as u64)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "executor panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_extraction() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new("bang".to_string())), "bang");
        assert_eq!(panic_message(Box::new(42u8)), "executor panicked");
    }

    #[test]
    fn test_timeout_result() {
        let result = timeout_result("amp", Duration::from_millis(2500));
        assert_eq!(result.error_kind, Some(ErrorKind::Timeout));
        assert_eq!(result.data["deadline_ms"], 2500);
    }
}
