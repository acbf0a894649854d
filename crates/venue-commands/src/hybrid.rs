//! Hybrid policy router.
//!
//! Sits above the [`Dispatcher`] for devices that have a network control path
//! and an infrared fallback. The transport is chosen per action from the
//! device's policy:
//!
//! - power-on follows `power_on_method` (`ir`, `network` or `hybrid`)
//! - power-off tries the network first and falls back to infrared only under
//!   `hybrid_ir_fallback`
//! - every other action follows `control_strategy`
//!
//! Attempts for one logical action run strictly one after another; both
//! transports are never in flight together, since that could actuate the
//! physical device twice.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::command::{Command, DeviceClass, ExecutionResult, Parameters};
use crate::config::defaults;
use crate::dispatcher::Dispatcher;
use crate::error::ErrorKind;

/// Data key naming the transport that produced a result.
pub const METHOD_KEY: &str = "method";

/// Data key listing every transport tried, in order.
pub const ATTEMPTED_METHODS_KEY: &str = "attempted_methods";

/// Data key for the absolute volume derived from a relative action.
pub const TARGET_VOLUME_KEY: &str = "target_volume";

/// How a device is powered on.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PowerOnMethod {
    /// Infrared only
    Ir,
    /// Network only, never falls back
    #[default]
    Network,
    /// Network first, infrared if that fails
    Hybrid,
}

/// How every other action is sent.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ControlStrategy {
    /// Infrared only
    IrOnly,
    /// Network only
    #[default]
    NetworkOnly,
    /// Network first, infrared if that fails
    HybridIrFallback,
}

/// Transport used for one attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransportMethod {
    Network,
    IrFallback,
}

impl TransportMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportMethod::Network => "network",
            TransportMethod::IrFallback => "ir_fallback",
        }
    }
}

/// Which policy branch an action takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionPath {
    PowerOn,
    PowerOff,
    Standard,
}

impl ActionPath {
    /// Classify an action name.
    pub fn classify(action: &str) -> Self {
        match action {
            "power" | "power_on" => ActionPath::PowerOn,
            "power_off" => ActionPath::PowerOff,
            _ => ActionPath::Standard,
        }
    }
}

/// Per-device transport policy and cached state.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeviceHybridPolicy {
    /// Network protocol, `None` when the device has no network path
    pub protocol: Option<String>,
    /// Power-on transport
    #[serde(default)]
    pub power_on_method: PowerOnMethod,
    /// Transport for every other action
    #[serde(default)]
    pub control_strategy: ControlStrategy,
    /// Hostname of the infrared blaster used as fallback
    pub fallback_ir_controller: Option<String>,
    /// Blaster port the device is wired to
    pub fallback_ir_port: Option<u32>,
    /// Last known volume, used only for relative adjustments
    pub volume_level: Option<u8>,
    /// Last known mute state
    pub mute_status: Option<bool>,
}

impl DeviceHybridPolicy {
    /// Policy for a network protocol with default methods.
    pub fn network(protocol: impl Into<String>) -> Self {
        Self {
            protocol: Some(protocol.into()),
            ..Self::default()
        }
    }

    pub fn with_power_on_method(mut self, method: PowerOnMethod) -> Self {
        self.power_on_method = method;
        self
    }

    pub fn with_control_strategy(mut self, strategy: ControlStrategy) -> Self {
        self.control_strategy = strategy;
        self
    }

    /// Configure the infrared fallback.
    pub fn with_ir_fallback(mut self, controller: impl Into<String>, port: u32) -> Self {
        self.fallback_ir_controller = Some(controller.into());
        self.fallback_ir_port = Some(port);
        self
    }

    pub fn with_volume_level(mut self, level: u8) -> Self {
        self.volume_level = Some(level.min(100));
        self
    }

    /// Infrared controller and port, when both are configured.
    pub fn ir_fallback(&self) -> Option<(&str, u32)> {
        match (&self.fallback_ir_controller, self.fallback_ir_port) {
            (Some(controller), Some(port)) => Some((controller.as_str(), port)),
            _ => None,
        }
    }

    /// Whether an infrared fallback is configured.
    pub fn ir_fallback_configured(&self) -> bool {
        self.ir_fallback().is_some()
    }
}

/// A network-controllable device with its policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridDevice {
    /// Device ID
    pub device_id: String,
    /// Display name
    pub name: String,
    /// Controller address used for network commands
    pub controller_ref: String,
    /// Device class of network commands
    pub device_class: DeviceClass,
    /// Transport policy
    pub policy: DeviceHybridPolicy,
}

impl HybridDevice {
    /// Create a network TV device.
    pub fn new(
        device_id: impl Into<String>,
        controller_ref: impl Into<String>,
        policy: DeviceHybridPolicy,
    ) -> Self {
        let device_id = device_id.into();
        Self {
            name: device_id.clone(),
            device_id,
            controller_ref: controller_ref.into(),
            device_class: DeviceClass::NetworkTv,
            policy,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_device_class(mut self, device_class: DeviceClass) -> Self {
        self.device_class = device_class;
        self
    }
}

/// Control capabilities report for a device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceControlStatus {
    pub network_available: bool,
    pub ir_fallback_configured: bool,
    pub power_on_method: PowerOnMethod,
    pub control_strategy: ControlStrategy,
    pub recommended_power_on: PowerOnMethod,
    pub protocol: Option<String>,
}

impl DeviceControlStatus {
    /// Report for one device.
    pub fn for_device(device: &HybridDevice) -> Self {
        let policy = &device.policy;
        Self {
            network_available: policy.protocol.is_some(),
            ir_fallback_configured: policy.ir_fallback_configured(),
            power_on_method: policy.power_on_method,
            control_strategy: policy.control_strategy,
            recommended_power_on: recommended_power_on(policy.protocol.as_deref()),
            protocol: policy.protocol.clone(),
        }
    }
}

/// Power-on method known to work for a protocol.
pub fn recommended_power_on(protocol: Option<&str>) -> PowerOnMethod {
    match protocol {
        Some("roku") => PowerOnMethod::Network,
        // Wake-on-LAN works only some of the time.
        Some("lg_webos") | Some("hisense_vidaa") => PowerOnMethod::Hybrid,
        _ => PowerOnMethod::Ir,
    }
}

#[derive(Default)]
struct Attempts(Vec<TransportMethod>);

impl Attempts {
    fn record(&mut self, method: TransportMethod) {
        self.0.push(method);
    }

    fn annotate(&self, mut result: ExecutionResult) -> ExecutionResult {
        let methods: Vec<Value> = self.0.iter().map(|m| Value::from(m.as_str())).collect();
        result.insert_data(ATTEMPTED_METHODS_KEY, methods);
        result
    }
}

/// Hybrid policy router.
pub struct HybridPolicyRouter {
    dispatcher: Arc<Dispatcher>,
    volume_step: u8,
}

impl HybridPolicyRouter {
    /// Create a router over a dispatcher.
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            volume_step: defaults::VOLUME_STEP,
        }
    }

    /// Set the relative volume step.
    pub fn with_volume_step(mut self, step: u8) -> Self {
        self.volume_step = step;
        self
    }

    /// Run one logical action against a device.
    ///
    /// On success the device's cached volume and mute state are updated.
    pub async fn execute(
        &self,
        device: &mut HybridDevice,
        action: &str,
        parameters: Parameters,
    ) -> ExecutionResult {
        let parameters = self.prepare_parameters(device, action, parameters);
        let mut attempts = Attempts::default();

        let result = match ActionPath::classify(action) {
            ActionPath::PowerOn => {
                self.power_on(device, action, &parameters, &mut attempts)
                    .await
            }
            ActionPath::PowerOff => {
                self.power_off(device, action, &parameters, &mut attempts)
                    .await
            }
            ActionPath::Standard => {
                self.standard(device, action, &parameters, &mut attempts)
                    .await
            }
        };

        if result.success {
            update_cached_state(&mut device.policy, action, &parameters);
        }
        attempts.annotate(result)
    }

    async fn power_on(
        &self,
        device: &HybridDevice,
        action: &str,
        parameters: &Parameters,
        attempts: &mut Attempts,
    ) -> ExecutionResult {
        match device.policy.power_on_method {
            PowerOnMethod::Ir => self.via_ir(device, action, parameters, attempts).await,
            PowerOnMethod::Network => {
                self.via_network(device, action, parameters, attempts)
                    .await
            }
            PowerOnMethod::Hybrid => {
                let network = self
                    .via_network(device, action, parameters, attempts)
                    .await;
                if network.success {
                    return network;
                }
                if device.policy.ir_fallback_configured() {
                    self.fall_back(device, action, parameters, attempts, &network)
                        .await
                } else {
                    no_ir_fallback(device, network)
                }
            }
        }
    }

    async fn power_off(
        &self,
        device: &HybridDevice,
        action: &str,
        parameters: &Parameters,
        attempts: &mut Attempts,
    ) -> ExecutionResult {
        let network = self
            .via_network(device, action, parameters, attempts)
            .await;
        if network.success || !may_fall_back(&device.policy) {
            return network;
        }
        self.fall_back(device, action, parameters, attempts, &network)
            .await
    }

    async fn standard(
        &self,
        device: &HybridDevice,
        action: &str,
        parameters: &Parameters,
        attempts: &mut Attempts,
    ) -> ExecutionResult {
        if device.policy.control_strategy == ControlStrategy::IrOnly {
            return self.via_ir(device, action, parameters, attempts).await;
        }

        let network = self
            .via_network(device, action, parameters, attempts)
            .await;
        if network.success || !may_fall_back(&device.policy) {
            return network;
        }
        self.fall_back(device, action, parameters, attempts, &network)
            .await
    }

    async fn fall_back(
        &self,
        device: &HybridDevice,
        action: &str,
        parameters: &Parameters,
        attempts: &mut Attempts,
        network: &ExecutionResult,
    ) -> ExecutionResult {
        warn!(
            device = %device.device_id,
            action,
            error_kind = ?network.error_kind,
            message = %network.message,
            "Network attempt failed, falling back to infrared"
        );
        self.via_ir(device, action, parameters, attempts).await
    }

    async fn via_network(
        &self,
        device: &HybridDevice,
        action: &str,
        parameters: &Parameters,
        attempts: &mut Attempts,
    ) -> ExecutionResult {
        attempts.record(TransportMethod::Network);

        let mut command = Command::new(&device.controller_ref, device.device_class, action)
            .with_parameters(parameters.clone());
        if let Some(protocol) = &device.policy.protocol {
            command = command.with_protocol(protocol.clone());
        }

        let mut result = self.dispatcher.submit(command).await;
        result.insert_data(METHOD_KEY, TransportMethod::Network.as_str());
        result.insert_data("protocol", device.policy.protocol.clone());
        info!(
            device = %device.device_id,
            action,
            method = "network",
            success = result.success,
            "Network attempt finished"
        );
        result
    }

    async fn via_ir(
        &self,
        device: &HybridDevice,
        action: &str,
        parameters: &Parameters,
        attempts: &mut Attempts,
    ) -> ExecutionResult {
        let Some((ir_controller, ir_port)) = device.policy.ir_fallback() else {
            return ExecutionResult::failure(
                ErrorKind::NoIrFallback,
                format!("Infrared fallback not configured for {}", device.name),
            )
            .with_data(METHOD_KEY, TransportMethod::IrFallback.as_str());
        };
        attempts.record(TransportMethod::IrFallback);

        let command = Command::new(ir_controller, DeviceClass::Ir, action)
            .with_parameters(parameters.clone())
            .with_parameter("port", ir_port);

        let mut result = self.dispatcher.submit(command).await;
        result.insert_data(METHOD_KEY, TransportMethod::IrFallback.as_str());
        result.insert_data("ir_controller", ir_controller);
        result.insert_data("ir_port", ir_port);
        result.insert_data("device", device.name.clone());
        info!(
            device = %device.device_id,
            action,
            method = "ir_fallback",
            ir_controller,
            ir_port,
            success = result.success,
            "Infrared attempt finished"
        );
        result
    }

    fn prepare_parameters(
        &self,
        device: &HybridDevice,
        action: &str,
        mut parameters: Parameters,
    ) -> Parameters {
        let current = device
            .policy
            .volume_level
            .unwrap_or(defaults::DEFAULT_VOLUME);
        let target = match action {
            "volume_up" => Some(current.saturating_add(self.volume_step).min(100)),
            "volume_down" => Some(current.saturating_sub(self.volume_step)),
            _ => None,
        };
        if let Some(target) = target {
            parameters
                .entry(TARGET_VOLUME_KEY)
                .or_insert_with(|| Value::from(target));
        }
        parameters
    }
}

fn may_fall_back(policy: &DeviceHybridPolicy) -> bool {
    policy.control_strategy == ControlStrategy::HybridIrFallback && policy.ir_fallback_configured()
}

fn no_ir_fallback(device: &HybridDevice, network: ExecutionResult) -> ExecutionResult {
    let mut result = ExecutionResult::failure(
        ErrorKind::NoIrFallback,
        format!(
            "Network power-on failed for {} and no infrared fallback is configured: {}",
            device.name, network.message
        ),
    );
    result.data = network.data;
    result.insert_data(METHOD_KEY, TransportMethod::Network.as_str());
    if let Some(kind) = network.error_kind {
        result.insert_data("network_error_kind", kind.as_str());
    }
    result
}

fn update_cached_state(policy: &mut DeviceHybridPolicy, action: &str, parameters: &Parameters) {
    let volume_param = |key: &str| {
        parameters
            .get(key)
            .and_then(|v| match v {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            })
            .map(|v| v.clamp(0, 100) as u8)
    };

    match action {
        "set_volume" => {
            if let Some(level) = volume_param("volume") {
                policy.volume_level = Some(level);
            }
        }
        "volume_up" | "volume_down" => {
            if let Some(level) = volume_param(TARGET_VOLUME_KEY) {
                policy.volume_level = Some(level);
            }
        }
        "mute" => policy.mute_status = Some(true),
        "unmute" => policy.mute_status = Some(false),
        "toggle_mute" => policy.mute_status = Some(!policy.mute_status.unwrap_or(false)),
        _ => {}
    }
}
