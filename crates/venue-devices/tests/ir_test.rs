//! Infrared executor tests.
//!
//! Tests directory lookup, parameter forwarding and the hybrid fallback path
//! ending in a real infrared executor.

use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use venue_commands::{
    Command, ControlStrategy, DeviceClass, DeviceHybridPolicy, Dispatcher, DispatcherConfig,
    ErrorKind, ExecutionResult, Executor, HybridDevice, HybridPolicyRouter, ProtocolRouter,
};
use venue_devices::{
    DeviceDirectory, InMemoryDirectory, IrControllerRecord, IrExecutor, IrSendError,
    IrSendRequest, IrSender,
};

enum Reply {
    Accept,
    Reject,
    Unreachable,
}

struct RecordingSender {
    reply: Reply,
    sent: Mutex<Vec<IrSendRequest>>,
}

impl RecordingSender {
    fn new(reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            reply,
            sent: Mutex::new(Vec::new()),
        })
    }

    fn sent(&self) -> Vec<IrSendRequest> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl IrSender for RecordingSender {
    async fn send_ir(&self, request: &IrSendRequest) -> Result<bool, IrSendError> {
        self.sent.lock().unwrap().push(request.clone());
        match self.reply {
            Reply::Accept => Ok(true),
            Reply::Reject => Ok(false),
            Reply::Unreachable => Err(IrSendError::Connection("no route to host".to_string())),
        }
    }
}

fn blaster_ip() -> IpAddr {
    IpAddr::from([10, 0, 0, 40])
}

/// Helper to create an infrared executor with one blaster.
fn create_test_executor(reply: Reply) -> (IrExecutor, Arc<RecordingSender>) {
    let directory: Arc<dyn DeviceDirectory> = Arc::new(
        InMemoryDirectory::new().with_ir_controller(IrControllerRecord::new("ir-bar", blaster_ip())),
    );
    let sender = RecordingSender::new(reply);
    (IrExecutor::new(directory, sender.clone()), sender)
}

#[tokio::test]
async fn test_send_forwards_parameters() {
    let (executor, sender) = create_test_executor(Reply::Accept);
    let command = Command::new("ir-bar", DeviceClass::Ir, "channel")
        .with_parameter("port", 3)
        .with_parameter("channel", "205")
        .with_parameter("digit", 7);

    let result = executor.execute(&command).await;
    assert!(result.success, "{}", result.message);
    assert_eq!(result.data["port"], 3);

    let sent = sender.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].hostname, "ir-bar");
    assert_eq!(sent[0].ip_address, blaster_ip());
    assert_eq!(sent[0].port, 3);
    assert_eq!(sent[0].channel.as_deref(), Some("205"));
    assert_eq!(sent[0].digit.as_deref(), Some("7"));
}

#[tokio::test]
async fn test_port_defaults_to_one() {
    let (executor, sender) = create_test_executor(Reply::Accept);
    let result = executor
        .execute(&Command::new("ir-bar", DeviceClass::Ir, "power"))
        .await;
    assert!(result.success);
    assert_eq!(sender.sent()[0].port, 1);
    assert_eq!(sender.sent()[0].channel, None);
}

#[tokio::test]
async fn test_rejected_send_is_command_failed() {
    let (executor, _) = create_test_executor(Reply::Reject);
    let result = executor
        .execute(&Command::new("ir-bar", DeviceClass::Ir, "power"))
        .await;
    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::CommandFailed));
}

#[tokio::test]
async fn test_sender_error_is_connection_error() {
    let (executor, _) = create_test_executor(Reply::Unreachable);
    let result = executor
        .execute(&Command::new("ir-bar", DeviceClass::Ir, "power"))
        .await;
    assert_eq!(result.error_kind, Some(ErrorKind::ConnectionError));
    assert!(result.data.contains_key("execution_time_ms"));
}

#[tokio::test]
async fn test_unknown_blaster_and_bad_port() {
    let (executor, sender) = create_test_executor(Reply::Accept);

    let result = executor
        .execute(&Command::new("ir-lobby", DeviceClass::Ir, "power"))
        .await;
    assert_eq!(result.error_kind, Some(ErrorKind::DeviceNotFound));

    let result = executor
        .execute(&Command::new("ir-bar", DeviceClass::Ir, "power").with_parameter("port", 0))
        .await;
    assert_eq!(result.error_kind, Some(ErrorKind::ValidationError));

    assert!(sender.sent().is_empty());
}

struct FailingNetwork;

#[async_trait]
impl Executor for FailingNetwork {
    fn name(&self) -> &str {
        "roku"
    }

    fn can_execute(&self, command: &Command) -> bool {
        command.protocol.as_deref() == Some("roku")
    }

    async fn execute(&self, _command: &Command) -> ExecutionResult {
        ExecutionResult::failure(ErrorKind::ConnectionError, "connection refused")
    }
}

#[tokio::test]
async fn test_hybrid_fallback_reaches_blaster() {
    let (ir_executor, sender) = create_test_executor(Reply::Accept);
    let router = Arc::new(ProtocolRouter::new());
    router.register(DeviceClass::Ir, None, Arc::new(ir_executor));
    router.register(DeviceClass::NetworkTv, Some("roku"), Arc::new(FailingNetwork));
    let dispatcher = Arc::new(Dispatcher::new(router, DispatcherConfig::default()));
    let hybrid = HybridPolicyRouter::new(dispatcher);

    let mut device = HybridDevice::new(
        "tv-bar",
        "10.0.0.21",
        DeviceHybridPolicy::network("roku")
            .with_control_strategy(ControlStrategy::HybridIrFallback)
            .with_ir_fallback("ir-bar", 2),
    );

    let result = hybrid
        .execute(&mut device, "volume_up", Default::default())
        .await;

    assert!(result.success, "{}", result.message);
    assert_eq!(result.data_str("method"), Some("ir_fallback"));
    let sent = sender.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].action, "volume_up");
    assert_eq!(sent[0].port, 2);
}
