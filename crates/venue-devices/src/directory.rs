//! Device directory.
//!
//! Executors look controllers, zones and infrared blasters up here rather than
//! carrying addressing in every command. Production deployments back this with
//! their device database; [`InMemoryDirectory`] serves the CLI and tests.

use std::net::IpAddr;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use venue_commands::{Classify, ErrorKind, HybridDevice};

use crate::amp::gain::GainRange;

/// Directory lookup errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DirectoryError {
    #[error("Controller not found: {0}")]
    ControllerNotFound(String),

    #[error("Infrared controller not found: {0}")]
    IrControllerNotFound(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Directory unavailable: {0}")]
    Unavailable(String),
}

impl Classify for DirectoryError {
    fn kind(&self) -> ErrorKind {
        match self {
            DirectoryError::Unavailable(_) => ErrorKind::ConnectionError,
            _ => ErrorKind::DeviceNotFound,
        }
    }
}

/// An addressable amplifier zone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ZoneRecord {
    /// 1-based zone number used in commands
    pub zone_number: u16,
    /// 0-based index on the device, defaults to `zone_number - 1`
    #[serde(default)]
    pub zone_index: Option<u16>,
    #[serde(default)]
    pub name: Option<String>,
    /// Overrides the controller's gain range
    #[serde(default)]
    pub gain_range: Option<GainRange>,
}

impl ZoneRecord {
    pub fn new(zone_number: u16) -> Self {
        Self {
            zone_number,
            zone_index: None,
            name: None,
            gain_range: None,
        }
    }

    pub fn with_zone_index(mut self, zone_index: u16) -> Self {
        self.zone_index = Some(zone_index);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_gain_range(mut self, range: GainRange) -> Self {
        self.gain_range = Some(range);
        self
    }

    /// Device-side zone index.
    pub fn index(&self) -> u16 {
        self.zone_index
            .unwrap_or_else(|| self.zone_number.saturating_sub(1))
    }
}

/// An amplifier controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControllerRecord {
    pub controller_ref: String,
    pub ip_address: IpAddr,
    /// Device receive port override, the adapter default otherwise
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub gain_range: GainRange,
    #[serde(default)]
    pub zones: Vec<ZoneRecord>,
}

impl ControllerRecord {
    pub fn new(controller_ref: impl Into<String>, ip_address: IpAddr) -> Self {
        Self {
            controller_ref: controller_ref.into(),
            ip_address,
            port: None,
            gain_range: GainRange::default(),
            zones: Vec::new(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_gain_range(mut self, range: GainRange) -> Self {
        self.gain_range = range;
        self
    }

    pub fn with_zone(mut self, zone: ZoneRecord) -> Self {
        self.zones.retain(|z| z.zone_number != zone.zone_number);
        self.zones.push(zone);
        self.zones.sort_by_key(|z| z.zone_number);
        self
    }

    /// Add zones `1..=count` with default indices.
    pub fn with_zone_count(mut self, count: u16) -> Self {
        for zone_number in 1..=count {
            self = self.with_zone(ZoneRecord::new(zone_number));
        }
        self
    }

    /// Zone by 1-based number.
    pub fn zone(&self, zone_number: u16) -> Option<&ZoneRecord> {
        self.zones.iter().find(|z| z.zone_number == zone_number)
    }

    /// Effective gain range of a zone.
    pub fn zone_gain_range(&self, zone: &ZoneRecord) -> GainRange {
        zone.gain_range.unwrap_or(self.gain_range)
    }
}

/// An infrared blaster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IrControllerRecord {
    pub hostname: String,
    pub ip_address: IpAddr,
}

impl IrControllerRecord {
    pub fn new(hostname: impl Into<String>, ip_address: IpAddr) -> Self {
        Self {
            hostname: hostname.into(),
            ip_address,
        }
    }
}

/// Device lookup collaborator.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    /// Amplifier controller by reference.
    async fn controller(&self, controller_ref: &str) -> Result<ControllerRecord, DirectoryError>;

    /// Infrared blaster by hostname.
    async fn ir_controller(&self, hostname: &str) -> Result<IrControllerRecord, DirectoryError>;

    /// Network device with its hybrid transport policy.
    async fn hybrid_device(&self, device_id: &str) -> Result<HybridDevice, DirectoryError> {
        Err(DirectoryError::DeviceNotFound(device_id.to_string()))
    }
}

/// Directory held in memory.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    controllers: DashMap<String, ControllerRecord>,
    ir_controllers: DashMap<String, IrControllerRecord>,
    hybrid_devices: DashMap<String, HybridDevice>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_controller(self, record: ControllerRecord) -> Self {
        self.insert_controller(record);
        self
    }

    pub fn with_ir_controller(self, record: IrControllerRecord) -> Self {
        self.insert_ir_controller(record);
        self
    }

    pub fn insert_controller(&self, record: ControllerRecord) {
        self.controllers
            .insert(record.controller_ref.clone(), record);
    }

    pub fn insert_ir_controller(&self, record: IrControllerRecord) {
        self.ir_controllers.insert(record.hostname.clone(), record);
    }

    /// Insert or replace a hybrid device, e.g. to persist its cached state.
    pub fn insert_hybrid_device(&self, device: HybridDevice) {
        self.hybrid_devices.insert(device.device_id.clone(), device);
    }

    pub fn remove_controller(&self, controller_ref: &str) -> Option<ControllerRecord> {
        self.controllers.remove(controller_ref).map(|(_, r)| r)
    }
}

#[async_trait]
impl DeviceDirectory for InMemoryDirectory {
    async fn controller(&self, controller_ref: &str) -> Result<ControllerRecord, DirectoryError> {
        self.controllers
            .get(controller_ref)
            .map(|r| r.clone())
            .ok_or_else(|| DirectoryError::ControllerNotFound(controller_ref.to_string()))
    }

    async fn ir_controller(&self, hostname: &str) -> Result<IrControllerRecord, DirectoryError> {
        self.ir_controllers
            .get(hostname)
            .map(|r| r.clone())
            .ok_or_else(|| DirectoryError::IrControllerNotFound(hostname.to_string()))
    }

    async fn hybrid_device(&self, device_id: &str) -> Result<HybridDevice, DirectoryError> {
        self.hybrid_devices
            .get(device_id)
            .map(|d| d.clone())
            .ok_or_else(|| DirectoryError::DeviceNotFound(device_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use venue_commands::DeviceHybridPolicy;

    fn localhost() -> IpAddr {
        IpAddr::from([127, 0, 0, 1])
    }

    #[test]
    fn test_zone_index_defaults_to_number_minus_one() {
        assert_eq!(ZoneRecord::new(1).index(), 0);
        assert_eq!(ZoneRecord::new(4).index(), 3);
        assert_eq!(ZoneRecord::new(2).with_zone_index(7).index(), 7);
    }

    #[test]
    fn test_zone_gain_range_override() {
        let narrow = GainRange::new(-60.0, 0.0);
        let record = ControllerRecord::new("amp-1", localhost())
            .with_zone(ZoneRecord::new(1))
            .with_zone(ZoneRecord::new(2).with_gain_range(narrow));

        let zone1 = record.zone(1).unwrap();
        let zone2 = record.zone(2).unwrap();
        assert_eq!(record.zone_gain_range(zone1), GainRange::default());
        assert_eq!(record.zone_gain_range(zone2), narrow);
        assert!(record.zone(3).is_none());
    }

    #[test]
    fn test_with_zone_count_replaces_duplicates() {
        let record = ControllerRecord::new("amp-1", localhost())
            .with_zone(ZoneRecord::new(2).with_name("Bar"))
            .with_zone_count(3);
        assert_eq!(record.zones.len(), 3);
        assert_eq!(record.zones[0].zone_number, 1);
        assert_eq!(record.zones[2].zone_number, 3);
    }

    #[tokio::test]
    async fn test_in_memory_lookups() {
        let directory = InMemoryDirectory::new()
            .with_controller(ControllerRecord::new("amp-1", localhost()))
            .with_ir_controller(IrControllerRecord::new("ir-bar", localhost()));
        directory.insert_hybrid_device(HybridDevice::new(
            "tv-1",
            "10.0.0.5",
            DeviceHybridPolicy::network("roku"),
        ));

        assert!(directory.controller("amp-1").await.is_ok());
        assert!(directory.ir_controller("ir-bar").await.is_ok());
        assert_eq!(
            directory.hybrid_device("tv-1").await.unwrap().controller_ref,
            "10.0.0.5"
        );

        let err = directory.controller("amp-9").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeviceNotFound);
        assert!(directory.ir_controller("ir-9").await.is_err());
    }
}
