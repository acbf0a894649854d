//! Command lifecycle events.
//!
//! The dispatcher publishes one event per status transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::command::{Command, CommandId, CommandStatus};
use crate::error::ErrorKind;

/// Command status transition event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEvent {
    /// Command ID
    pub command_id: CommandId,
    /// Target controller
    pub controller_ref: String,
    /// Action name
    pub action: String,
    /// Status before the transition
    pub previous_status: Option<CommandStatus>,
    /// Status after the transition
    pub status: CommandStatus,
    /// Failure classification on failed/timeout
    pub error_kind: Option<ErrorKind>,
    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

impl CommandEvent {
    /// Build an event from the command's current state.
    pub fn from_command(command: &Command, previous_status: Option<CommandStatus>) -> Self {
        Self {
            command_id: command.id.clone(),
            controller_ref: command.controller_ref.clone(),
            action: command.action.clone(),
            previous_status,
            status: command.status,
            error_kind: command.result.as_ref().and_then(|r| r.error_kind),
            timestamp: Utc::now(),
        }
    }
}

/// Event filter for subscriptions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    /// Only this controller
    pub controller_ref: Option<String>,
    /// Only these statuses
    pub statuses: Option<Vec<CommandStatus>>,
}

impl EventFilter {
    /// Filter on one controller.
    pub fn controller(controller_ref: impl Into<String>) -> Self {
        Self {
            controller_ref: Some(controller_ref.into()),
            statuses: None,
        }
    }

    /// Restrict to the given statuses.
    pub fn with_statuses(mut self, statuses: Vec<CommandStatus>) -> Self {
        self.statuses = Some(statuses);
        self
    }

    /// Check if an event passes the filter.
    pub fn matches(&self, event: &CommandEvent) -> bool {
        if let Some(controller) = &self.controller_ref {
            if &event.controller_ref != controller {
                return false;
            }
        }
        if let Some(statuses) = &self.statuses {
            if !statuses.contains(&event.status) {
                return false;
            }
        }
        true
    }
}

/// Broadcast bus for command events.
#[derive(Clone)]
pub struct CommandEventBus {
    sender: broadcast::Sender<CommandEvent>,
}

impl CommandEventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: CommandEvent) {
        if self.sender.send(event).is_err() {
            debug!("No command event subscribers");
        }
    }

    /// Subscribe to every event.
    pub fn subscribe(&self) -> CommandEventReceiver {
        self.subscribe_filtered(EventFilter::default())
    }

    /// Subscribe to events passing a filter.
    pub fn subscribe_filtered(&self, filter: EventFilter) -> CommandEventReceiver {
        CommandEventReceiver {
            receiver: self.sender.subscribe(),
            filter,
        }
    }

    /// Current number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for CommandEventBus {
    fn default() -> Self {
        Self::new(crate::config::defaults::EVENT_CAPACITY)
    }
}

/// Filtered event subscription.
pub struct CommandEventReceiver {
    receiver: broadcast::Receiver<CommandEvent>,
    filter: EventFilter,
}

impl CommandEventReceiver {
    /// Next matching event, `None` once the bus is gone.
    ///
    /// Events dropped because the subscriber lagged are skipped.
    pub async fn recv(&mut self) -> Option<CommandEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Command event subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching event if one is already buffered.
    pub fn try_recv(&mut self) -> Option<CommandEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}
