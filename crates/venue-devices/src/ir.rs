//! Infrared executor.
//!
//! Infrared blasters are addressed by hostname; the executor resolves the
//! blaster in the [`DeviceDirectory`] and hands the key press to an
//! [`IrSender`] collaborator.

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use venue_commands::{
    Classify, Command, CommandError, DeviceClass, ErrorKind, ExecutionResult, ExecutionTimer,
    Executor,
};

use crate::directory::{DeviceDirectory, DirectoryError};

/// Blaster port used when a command does not name one.
pub const DEFAULT_IR_PORT: u32 = 1;

/// One key press for a blaster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IrSendRequest {
    pub hostname: String,
    pub ip_address: IpAddr,
    pub action: String,
    pub port: u32,
    pub channel: Option<String>,
    pub digit: Option<String>,
}

/// Infrared send errors.
#[derive(Debug, thiserror::Error)]
pub enum IrSendError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Sends infrared codes through a blaster.
#[async_trait]
pub trait IrSender: Send + Sync {
    /// Returns `false` when the blaster rejected the request.
    async fn send_ir(&self, request: &IrSendRequest) -> Result<bool, IrSendError>;
}

#[derive(Debug, thiserror::Error)]
enum IrError {
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("Infrared send to {hostname} failed: {source}")]
    Send {
        hostname: String,
        source: IrSendError,
    },
}

impl Classify for IrError {
    fn kind(&self) -> ErrorKind {
        match self {
            IrError::Directory(e) => e.kind(),
            IrError::Command(e) => e.kind(),
            IrError::Send { .. } => ErrorKind::ConnectionError,
        }
    }
}

/// Executor for `ir` commands.
pub struct IrExecutor {
    directory: Arc<dyn DeviceDirectory>,
    sender: Arc<dyn IrSender>,
}

impl IrExecutor {
    pub fn new(directory: Arc<dyn DeviceDirectory>, sender: Arc<dyn IrSender>) -> Self {
        Self { directory, sender }
    }

    fn build_request(
        command: &Command,
        ip_address: IpAddr,
    ) -> Result<IrSendRequest, CommandError> {
        let port = match command.int_param("port")? {
            None => DEFAULT_IR_PORT,
            Some(p) if p >= 1 && p <= u32::MAX as i64 => p as u32,
            Some(p) => {
                return Err(CommandError::InvalidParameter {
                    name: "port".to_string(),
                    reason: format!("{} is not a valid blaster port", p),
                })
            }
        };

        Ok(IrSendRequest {
            hostname: command.controller_ref.clone(),
            ip_address,
            action: command.action.clone(),
            port,
            channel: command.str_param("channel"),
            digit: command.str_param("digit"),
        })
    }

    async fn send(&self, command: &Command) -> Result<ExecutionResult, IrError> {
        let blaster = self.directory.ir_controller(&command.controller_ref).await?;
        let request = Self::build_request(command, blaster.ip_address)?;

        debug!(
            controller = %request.hostname,
            action = %request.action,
            port = request.port,
            "Sending infrared code"
        );

        let accepted = self
            .sender
            .send_ir(&request)
            .await
            .map_err(|source| IrError::Send {
                hostname: request.hostname.clone(),
                source,
            })?;

        let result = if accepted {
            ExecutionResult::success(format!("Sent {} via {}", request.action, request.hostname))
        } else {
            ExecutionResult::failure(
                ErrorKind::CommandFailed,
                format!("{} rejected {}", request.hostname, request.action),
            )
        };
        Ok(result
            .with_data("ir_controller", request.hostname)
            .with_data("port", request.port))
    }
}

#[async_trait]
impl Executor for IrExecutor {
    fn name(&self) -> &str {
        "ir"
    }

    fn can_execute(&self, command: &Command) -> bool {
        command.device_class == DeviceClass::Ir
    }

    async fn execute(&self, command: &Command) -> ExecutionResult {
        let timer = ExecutionTimer::start();
        let result = match self.send(command).await {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    command_id = %command.id,
                    controller = %command.controller_ref,
                    action = %command.action,
                    error = %e,
                    "Infrared command failed"
                );
                ExecutionResult::from_error(&e)
            }
        };
        timer.finish(result)
    }
}
