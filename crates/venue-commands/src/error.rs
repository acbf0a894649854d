//! Failure taxonomy shared by every executor.

use serde::{Deserialize, Serialize};

use crate::command::{CommandId, CommandStatus};

/// Classified reason for a failed command.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Controller, zone or infrared blaster is unknown
    DeviceNotFound,
    /// No executor registered for the device class and protocol
    NoExecutor,
    /// Parameters rejected before any I/O
    ValidationError,
    /// Deadline expired without a response
    Timeout,
    /// Device answered with a negative acknowledgement
    ProtocolNack,
    /// Socket or connection establishment failed
    ConnectionError,
    /// Hybrid policy exhausted with no infrared fallback configured
    NoIrFallback,
    /// Device or collaborator answered but refused the request
    CommandFailed,
    /// Executor owns the device but does not implement the action
    UnsupportedAction,
    /// Executor violated its contract
    InternalError,
}

impl ErrorKind {
    /// Wire name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::DeviceNotFound => "DEVICE_NOT_FOUND",
            ErrorKind::NoExecutor => "NO_EXECUTOR",
            ErrorKind::ValidationError => "VALIDATION_ERROR",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::ProtocolNack => "PROTOCOL_NACK",
            ErrorKind::ConnectionError => "CONNECTION_ERROR",
            ErrorKind::NoIrFallback => "NO_IR_FALLBACK",
            ErrorKind::CommandFailed => "COMMAND_FAILED",
            ErrorKind::UnsupportedAction => "UNSUPPORTED_ACTION",
            ErrorKind::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that know which [`ErrorKind`] they represent.
///
/// Executors implement this for their internal error types so every failure
/// path can be folded into an `ExecutionResult`.
pub trait Classify: std::error::Error {
    /// The taxonomy value for this error.
    fn kind(&self) -> ErrorKind;
}

/// Command record errors.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Invalid status transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: CommandId,
        from: CommandStatus,
        to: CommandStatus,
    },

    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("Missing parameter: {0}")]
    MissingParameter(String),
}

impl Classify for CommandError {
    fn kind(&self) -> ErrorKind {
        match self {
            CommandError::InvalidTransition { .. } => ErrorKind::InternalError,
            CommandError::InvalidParameter { .. } | CommandError::MissingParameter(_) => {
                ErrorKind::ValidationError
            }
        }
    }
}
