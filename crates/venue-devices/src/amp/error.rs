//! Amplifier adapter errors.

use venue_commands::{Classify, CommandError, ErrorKind, ExecutionResult};

use super::codec::{CodecError, CommandCode, NackCause};
use crate::directory::DirectoryError;

/// Amplifier adapter error.
#[derive(Debug, thiserror::Error)]
pub enum AmpError {
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error("Zone {zone_number} not configured on controller {controller}")]
    ZoneNotFound { controller: String, zone_number: u16 },

    #[error("No zones configured on controller {0}")]
    NoZones(String),

    #[error("No response within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("{request} rejected by device: {cause}")]
    Nack {
        request: CommandCode,
        cause: NackCause,
    },

    #[error("Socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed response: {0}")]
    Codec(#[from] CodecError),

    #[error("Unexpected response to {expected}: {received}")]
    UnexpectedResponse {
        expected: CommandCode,
        received: String,
    },

    #[error("Unsupported action '{action}' for {device_class}")]
    UnsupportedAction {
        action: String,
        device_class: String,
    },
}

impl AmpError {
    pub(crate) fn invalid(name: &str, reason: impl Into<String>) -> Self {
        AmpError::InvalidParameter {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    /// Failure result carrying any structured detail of the error.
    pub fn into_result(self) -> ExecutionResult {
        let mut result = ExecutionResult::from_error(&self);
        match &self {
            AmpError::Nack { request, cause } => {
                result.insert_data("nack_code", cause.0);
                result.insert_data("nack_code_hex", format!("0x{:08X}", cause.0));
                result.insert_data("nack_reason", cause.description());
                result.insert_data("request", request.as_str());
            }
            AmpError::Timeout { timeout_ms } => {
                result.insert_data("timeout_ms", *timeout_ms);
            }
            AmpError::UnexpectedResponse { received, .. } => {
                result.insert_data("response_code", received.clone());
            }
            _ => {}
        }
        result
    }
}

impl Classify for AmpError {
    fn kind(&self) -> ErrorKind {
        match self {
            AmpError::InvalidParameter { .. } => ErrorKind::ValidationError,
            AmpError::Command(e) => e.kind(),
            AmpError::Directory(e) => e.kind(),
            AmpError::ZoneNotFound { .. } | AmpError::NoZones(_) => ErrorKind::DeviceNotFound,
            AmpError::Timeout { .. } => ErrorKind::Timeout,
            AmpError::Nack { .. } => ErrorKind::ProtocolNack,
            AmpError::Io(_) => ErrorKind::ConnectionError,
            AmpError::Codec(_) | AmpError::UnexpectedResponse { .. } => ErrorKind::CommandFailed,
            AmpError::UnsupportedAction { .. } => ErrorKind::UnsupportedAction,
        }
    }
}
