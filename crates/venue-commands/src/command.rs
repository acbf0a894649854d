//! Command data structures.
//!
//! Defines the command record, its status machine and the execution result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Classify, CommandError, ErrorKind};

/// Unique command identifier.
pub type CommandId = String;

/// Open string-keyed map of scalar values.
pub type Parameters = Map<String, Value>;

/// Default command priority. Lower values are more urgent.
pub const DEFAULT_PRIORITY: i32 = 5;

/// Class of device a command targets.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    /// Infrared blaster port
    Ir,
    /// Network-controllable television
    NetworkTv,
    /// One zone of an audio amplifier
    AudioZone,
    /// A whole audio amplifier
    AudioController,
}

impl DeviceClass {
    /// Get the device class name.
    pub fn type_name(&self) -> &'static str {
        match self {
            DeviceClass::Ir => "ir",
            DeviceClass::NetworkTv => "network_tv",
            DeviceClass::AudioZone => "audio_zone",
            DeviceClass::AudioController => "audio_controller",
        }
    }
}

impl std::fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Command status tracking.
///
/// Transitions are `Queued -> Executing -> {Completed | Failed | Timeout}` and
/// nothing else.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    /// Accepted, not yet running
    Queued,
    /// Executor invoked
    Executing,
    /// Executor reported success
    Completed,
    /// Executor reported failure, or no executor was found
    Failed,
    /// Deadline expired
    Timeout,
}

impl CommandStatus {
    /// Check if command is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CommandStatus::Completed | CommandStatus::Failed | CommandStatus::Timeout
        )
    }

    /// Check if command is in a success state.
    pub fn is_success(&self) -> bool {
        matches!(self, CommandStatus::Completed)
    }

    /// Whether `next` is a legal successor of this status.
    pub fn can_transition_to(&self, next: CommandStatus) -> bool {
        match self {
            CommandStatus::Queued => next == CommandStatus::Executing,
            CommandStatus::Executing => next.is_terminal(),
            _ => false,
        }
    }

    /// Get the status name.
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::Queued => "queued",
            CommandStatus::Executing => "executing",
            CommandStatus::Completed => "completed",
            CommandStatus::Failed => "failed",
            CommandStatus::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one executor invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionResult {
    /// Whether the command succeeded
    pub success: bool,
    /// Human readable message
    pub message: String,
    /// Result data (measured values, echoed parameters, tags)
    #[serde(default)]
    pub data: Parameters,
    /// Failure classification, `None` on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl ExecutionResult {
    /// Create a successful result.
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Parameters::new(),
            error_kind: None,
        }
    }

    /// Create a failed result.
    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: Parameters::new(),
            error_kind: Some(kind),
        }
    }

    /// Create a failed result from a classified error.
    pub fn from_error<E: Classify>(err: &E) -> Self {
        Self::failure(err.kind(), err.to_string())
    }

    /// Add one data entry.
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Insert one data entry in place.
    pub fn insert_data(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.data.insert(key.into(), value.into());
    }

    /// Read a string data entry.
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }
}

/// A requested action against one device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    /// Unique command ID, assigned at submission
    pub id: CommandId,
    /// Target controller or device
    pub controller_ref: String,
    /// Target device class
    pub device_class: DeviceClass,
    /// Protocol name, absent for infrared
    pub protocol: Option<String>,
    /// Action name (e.g. "volume_up", "set_volume")
    pub action: String,
    /// Action parameters
    #[serde(default)]
    pub parameters: Parameters,
    /// Priority, lower is more urgent
    pub priority: i32,
    /// Current status
    pub status: CommandStatus,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Execution start timestamp
    pub started_at: Option<DateTime<Utc>>,
    /// Completion timestamp
    pub completed_at: Option<DateTime<Utc>>,
    /// Terminal result
    pub result: Option<ExecutionResult>,
}

impl Command {
    /// Create a new command.
    pub fn new(
        controller_ref: impl Into<String>,
        device_class: DeviceClass,
        action: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            controller_ref: controller_ref.into(),
            device_class,
            protocol: None,
            action: action.into(),
            parameters: Parameters::new(),
            priority: DEFAULT_PRIORITY,
            status: CommandStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
        }
    }

    /// Set the protocol.
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    /// Replace all parameters.
    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Set one parameter.
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Set command priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Give the command a fresh identity and reset it to `Queued`.
    pub fn assign_identity(&mut self) {
        self.id = Uuid::new_v4().to_string();
        self.status = CommandStatus::Queued;
        self.created_at = Utc::now();
        self.started_at = None;
        self.completed_at = None;
        self.result = None;
    }

    /// Move to the next status, rejecting anything the status machine forbids.
    pub fn transition(&mut self, next: CommandStatus) -> Result<(), CommandError> {
        if !self.status.can_transition_to(next) {
            return Err(CommandError::InvalidTransition {
                id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }

        let now = Utc::now();
        if next == CommandStatus::Executing {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        self.status = next;
        Ok(())
    }

    /// Store the terminal result and move to the matching terminal status.
    pub fn complete(&mut self, result: ExecutionResult) -> Result<(), CommandError> {
        let next = if result.success {
            CommandStatus::Completed
        } else if result.error_kind == Some(ErrorKind::Timeout) {
            CommandStatus::Timeout
        } else {
            CommandStatus::Failed
        };
        self.transition(next)?;
        self.result = Some(result);
        Ok(())
    }

    /// Check if command is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Integer parameter. Accepts JSON integers, integral floats and numeric strings.
    pub fn int_param(&self, key: &str) -> Result<Option<i64>, CommandError> {
        let Some(value) = self.parameters.get(key) else {
            return Ok(None);
        };
        let invalid = |reason: &str| CommandError::InvalidParameter {
            name: key.to_string(),
            reason: reason.to_string(),
        };

        match value {
            Value::Null => Ok(None),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Some(i))
                } else {
                    match n.as_f64() {
                        Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                            Ok(Some(f as i64))
                        }
                        _ => Err(invalid("expected an integer")),
                    }
                }
            }
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Some)
                .map_err(|_| invalid("expected an integer")),
            _ => Err(invalid("expected an integer")),
        }
    }

    /// Required integer parameter.
    pub fn require_int(&self, key: &str) -> Result<i64, CommandError> {
        self.int_param(key)?
            .ok_or_else(|| CommandError::MissingParameter(key.to_string()))
    }

    /// String parameter. Numbers and booleans are rendered as text.
    pub fn str_param(&self, key: &str) -> Option<String> {
        match self.parameters.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}
