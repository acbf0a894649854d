//! Amplifier executor.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use venue_commands::config::defaults::DEFAULT_VOLUME;
use venue_commands::hybrid::TARGET_VOLUME_KEY;
use venue_commands::{
    unsupported_action, Classify, Command, DeviceClass, ExecutionResult, ExecutionTimer,
    Executor,
};

use super::codec::{
    self, parse_preset_records, parse_zone_reading, zone_object_id, Request, Response,
    ResponseOutcome, SyncType, ZoneReading, ZONE_MUTE_FLAG,
};
use super::error::AmpError;
use super::gain::{
    db_to_lut_index, lut_index_to_db, lut_index_to_pct, pct_to_db, pct_to_lut_index, round_db,
    GainRange,
};
use super::{AmpConfig, ConnectionCache, PROTOCOL};
use crate::directory::{ControllerRecord, DeviceDirectory, ZoneRecord};

/// Request timeouts a master volume fan-out may spend. Zones that would not
/// finish inside this budget are reported as timed out instead of written.
const MASTER_ROUND_TRIPS: u32 = 2;

/// Relative adjustment direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
}

impl Direction {
    fn apply(self, current: u8, step: u8) -> u8 {
        match self {
            Direction::Up => current.saturating_add(step).min(100),
            Direction::Down => current.saturating_sub(step),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MuteChange {
    Mute,
    Unmute,
    Toggle,
}

/// A validated action. Parsing never touches the network.
#[derive(Debug, Clone, PartialEq, Eq)]
enum AmpAction {
    Ping,
    Identify,
    SetVolume {
        zone_number: u16,
        volume: u8,
    },
    AdjustVolume {
        zone_number: u16,
        direction: Direction,
        target: Option<u8>,
    },
    SetMute {
        zone_number: u16,
        change: MuteChange,
    },
    SetMasterVolume {
        volume: u8,
    },
    AdjustMasterVolume {
        direction: Direction,
        target: Option<u8>,
    },
    RecallPreset {
        preset_number: u8,
    },
    ReadZones,
    ReadPresets,
}

impl AmpAction {
    fn parse(command: &Command, config: &AmpConfig) -> Result<Self, AmpError> {
        let action = match (command.device_class, command.action.as_str()) {
            (DeviceClass::AudioZone | DeviceClass::AudioController, "ping") => AmpAction::Ping,

            (DeviceClass::AudioZone, "set_volume") => AmpAction::SetVolume {
                zone_number: zone_number(command)?,
                volume: required_volume(command, "volume")?,
            },
            (DeviceClass::AudioZone, "volume_up") => AmpAction::AdjustVolume {
                zone_number: zone_number(command)?,
                direction: Direction::Up,
                target: optional_volume(command, TARGET_VOLUME_KEY)?,
            },
            (DeviceClass::AudioZone, "volume_down") => AmpAction::AdjustVolume {
                zone_number: zone_number(command)?,
                direction: Direction::Down,
                target: optional_volume(command, TARGET_VOLUME_KEY)?,
            },
            (DeviceClass::AudioZone, "mute") => AmpAction::SetMute {
                zone_number: zone_number(command)?,
                change: MuteChange::Mute,
            },
            (DeviceClass::AudioZone, "unmute") => AmpAction::SetMute {
                zone_number: zone_number(command)?,
                change: MuteChange::Unmute,
            },
            (DeviceClass::AudioZone, "toggle_mute") => AmpAction::SetMute {
                zone_number: zone_number(command)?,
                change: MuteChange::Toggle,
            },

            (DeviceClass::AudioController, "identify") => AmpAction::Identify,
            (DeviceClass::AudioController, "set_master_volume") => AmpAction::SetMasterVolume {
                volume: required_volume(command, "volume")?,
            },
            (DeviceClass::AudioController, "master_volume_up") => AmpAction::AdjustMasterVolume {
                direction: Direction::Up,
                target: optional_volume(command, TARGET_VOLUME_KEY)?,
            },
            (DeviceClass::AudioController, "master_volume_down") => {
                AmpAction::AdjustMasterVolume {
                    direction: Direction::Down,
                    target: optional_volume(command, TARGET_VOLUME_KEY)?,
                }
            }
            (DeviceClass::AudioController, "recall_preset") => {
                let preset = command.require_int("preset_number")?;
                if preset < 1 || preset > config.preset_count as i64 {
                    return Err(AmpError::invalid(
                        "preset_number",
                        format!("{} is outside 1..={}", preset, config.preset_count),
                    ));
                }
                AmpAction::RecallPreset {
                    preset_number: preset as u8,
                }
            }
            (DeviceClass::AudioController, "read_zones") => AmpAction::ReadZones,
            (DeviceClass::AudioController, "read_presets") => AmpAction::ReadPresets,

            _ => {
                return Err(AmpError::UnsupportedAction {
                    action: command.action.clone(),
                    device_class: command.device_class.to_string(),
                })
            }
        };
        Ok(action)
    }

    /// Round trips the action may need in the worst case.
    fn max_requests(action: &str) -> u32 {
        match action {
            "ping" | "identify" | "recall_preset" | "read_zones" | "read_presets" => 1,
            "set_master_volume" | "master_volume_up" | "master_volume_down" => {
                MASTER_ROUND_TRIPS
            }
            _ => 2,
        }
    }
}

fn zone_number(command: &Command) -> Result<u16, AmpError> {
    match command.int_param("zone_number")? {
        None => Ok(1),
        Some(n) if n >= 1 && n <= u16::MAX as i64 => Ok(n as u16),
        Some(n) => Err(AmpError::invalid(
            "zone_number",
            format!("{} is not a valid zone number", n),
        )),
    }
}

fn optional_volume(command: &Command, key: &str) -> Result<Option<u8>, AmpError> {
    match command.int_param(key)? {
        None => Ok(None),
        Some(v) if (0..=100).contains(&v) => Ok(Some(v as u8)),
        Some(v) => Err(AmpError::invalid(key, format!("{} is outside 0..=100", v))),
    }
}

fn required_volume(command: &Command, key: &str) -> Result<u8, AmpError> {
    optional_volume(command, key)?.ok_or_else(|| {
        AmpError::Command(venue_commands::CommandError::MissingParameter(
            key.to_string(),
        ))
    })
}

/// A zone resolved against its controller record.
#[derive(Debug, Clone)]
struct ZoneTarget {
    zone_number: u16,
    zone_index: u16,
    name: Option<String>,
    range: GainRange,
}

impl ZoneTarget {
    fn new(controller: &ControllerRecord, zone: &ZoneRecord) -> Self {
        Self {
            zone_number: zone.zone_number,
            zone_index: zone.index(),
            name: zone.name.clone(),
            range: controller.zone_gain_range(zone),
        }
    }

    fn resolve(controller: &ControllerRecord, zone_number: u16) -> Result<Self, AmpError> {
        controller
            .zone(zone_number)
            .map(|zone| Self::new(controller, zone))
            .ok_or_else(|| AmpError::ZoneNotFound {
                controller: controller.controller_ref.clone(),
                zone_number,
            })
    }
}

/// Last known state of a zone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ZoneState {
    volume: Option<u8>,
    lut_index: Option<u8>,
    mute_flags: Option<u8>,
}

type ZoneKey = (String, u16);

/// Executor for `amp_binary_udp` zones and controllers.
pub struct AmpExecutor {
    directory: Arc<dyn DeviceDirectory>,
    connections: ConnectionCache,
    zones: DashMap<ZoneKey, ZoneState>,
    master_levels: DashMap<String, u8>,
    config: AmpConfig,
}

impl AmpExecutor {
    pub fn new(directory: Arc<dyn DeviceDirectory>, config: AmpConfig) -> Self {
        Self {
            connections: ConnectionCache::new(&config),
            directory,
            zones: DashMap::new(),
            master_levels: DashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &AmpConfig {
        &self.config
    }

    pub fn connections(&self) -> &ConnectionCache {
        &self.connections
    }

    /// Last known volume of a zone.
    pub fn cached_volume(&self, controller_ref: &str, zone_index: u16) -> Option<u8> {
        self.zone_state(controller_ref, zone_index).volume
    }

    /// Last known lookup-table index of a zone.
    pub fn cached_lut_index(&self, controller_ref: &str, zone_index: u16) -> Option<u8> {
        self.zone_state(controller_ref, zone_index).lut_index
    }

    /// Last master volume applied to a controller.
    pub fn cached_master_volume(&self, controller_ref: &str) -> Option<u8> {
        self.master_levels.get(controller_ref).map(|v| *v)
    }

    fn zone_state(&self, controller_ref: &str, zone_index: u16) -> ZoneState {
        self.zones
            .get(&(controller_ref.to_string(), zone_index))
            .map(|s| *s)
            .unwrap_or_default()
    }

    fn update_zone(&self, controller_ref: &str, zone_index: u16, f: impl FnOnce(&mut ZoneState)) {
        let mut state = self
            .zones
            .entry((controller_ref.to_string(), zone_index))
            .or_default();
        f(&mut *state);
    }

    fn invalidate_controller(&self, controller_ref: &str) {
        self.zones.retain(|(controller, _), _| controller != controller_ref);
        self.master_levels.remove(controller_ref);
    }

    async fn run(&self, command: &Command) -> Result<ExecutionResult, AmpError> {
        let action = AmpAction::parse(command, &self.config)?;
        let controller = self.directory.controller(&command.controller_ref).await?;

        match action {
            AmpAction::Ping => self.ping(&controller).await,
            AmpAction::Identify => self.identify(&controller).await,
            AmpAction::SetVolume {
                zone_number,
                volume,
            } => {
                let target = ZoneTarget::resolve(&controller, zone_number)?;
                let flags = self.current_mute_flags(&controller, &target).await;
                self.set_zone_volume(&controller, &target, volume, flags)
                    .await
            }
            AmpAction::AdjustVolume {
                zone_number,
                direction,
                target: requested,
            } => {
                let target = ZoneTarget::resolve(&controller, zone_number)?;
                let previous = self
                    .zone_state(&controller.controller_ref, target.zone_index)
                    .volume
                    .unwrap_or(DEFAULT_VOLUME);
                let volume =
                    requested.unwrap_or_else(|| direction.apply(previous, self.config.volume_step));
                let flags = self.current_mute_flags(&controller, &target).await;
                let result = self
                    .set_zone_volume(&controller, &target, volume, flags)
                    .await?;
                Ok(result.with_data("previous_volume", previous))
            }
            AmpAction::SetMute {
                zone_number,
                change,
            } => {
                let target = ZoneTarget::resolve(&controller, zone_number)?;
                self.set_mute(&controller, &target, change).await
            }
            AmpAction::SetMasterVolume { volume } => {
                self.set_master_volume(&controller, volume).await
            }
            AmpAction::AdjustMasterVolume {
                direction,
                target: requested,
            } => {
                let previous = self
                    .cached_master_volume(&controller.controller_ref)
                    .unwrap_or(DEFAULT_VOLUME);
                let volume =
                    requested.unwrap_or_else(|| direction.apply(previous, self.config.volume_step));
                let result = self.set_master_volume(&controller, volume).await?;
                Ok(result.with_data("previous_volume", previous))
            }
            AmpAction::RecallPreset { preset_number } => {
                self.recall_preset(&controller, preset_number).await
            }
            AmpAction::ReadZones => self.read_zones(&controller).await,
            AmpAction::ReadPresets => self.read_presets(&controller).await,
        }
    }

    /// One request/response exchange, classified against the request.
    async fn transact(
        &self,
        controller: &ControllerRecord,
        request: &Request,
    ) -> Result<Response, AmpError> {
        let remote = SocketAddr::new(
            controller.ip_address,
            controller.port.unwrap_or(self.config.device_port),
        );
        let connection = self
            .connections
            .connection(&controller.controller_ref, remote);

        let response = {
            let mut connection = connection.lock().await;
            connection
                .transact(request, self.config.request_timeout())
                .await?
        };

        match response.outcome(request.code) {
            ResponseOutcome::Ack => Ok(response),
            ResponseOutcome::Nack(cause) => {
                warn!(
                    controller = %controller.controller_ref,
                    request = %request.code,
                    %cause,
                    "Device rejected request"
                );
                Err(AmpError::Nack {
                    request: request.code,
                    cause,
                })
            }
            ResponseOutcome::Unexpected(received) => Err(AmpError::UnexpectedResponse {
                expected: request.code,
                received,
            }),
        }
    }

    async fn ping(&self, controller: &ControllerRecord) -> Result<ExecutionResult, AmpError> {
        self.transact(controller, &Request::ping()).await?;
        Ok(ExecutionResult::success(format!(
            "{} is responding",
            controller.controller_ref
        ))
        .with_data("controller", controller.controller_ref.clone()))
    }

    async fn identify(&self, controller: &ControllerRecord) -> Result<ExecutionResult, AmpError> {
        let response = self.transact(controller, &Request::what()).await?;
        let identity = String::from_utf8_lossy(&response.payload)
            .trim_matches(|c: char| c == '\0' || c.is_whitespace())
            .to_string();
        Ok(ExecutionResult::success(format!(
            "{} identified",
            controller.controller_ref
        ))
        .with_data("controller", controller.controller_ref.clone())
        .with_data("identity", identity)
        .with_data("identity_hex", hex::encode(&response.payload)))
    }

    /// Read every zone's live state with one SYNC and refresh the cache.
    async fn read_zone_readings(
        &self,
        controller: &ControllerRecord,
    ) -> Result<Vec<(ZoneTarget, ZoneReading)>, AmpError> {
        let response = self
            .transact(controller, &Request::sync(SyncType::Zones))
            .await?;

        let targets: Vec<ZoneTarget> = if controller.zones.is_empty() {
            // Unconfigured controller: report every zone block in the reply.
            let blocks = response
                .payload
                .len()
                .saturating_sub(codec::SYNC_ZONE_OFFSET + 2)
                / codec::SYNC_ZONE_STRIDE
                + usize::from(response.payload.len() >= codec::SYNC_ZONE_OFFSET + 2);
            (0..blocks as u16)
                .map(|index| ZoneTarget::new(controller, &ZoneRecord::new(index + 1)))
                .collect()
        } else {
            controller
                .zones
                .iter()
                .map(|zone| ZoneTarget::new(controller, zone))
                .collect()
        };

        let mut readings = Vec::with_capacity(targets.len());
        for target in targets {
            match parse_zone_reading(&response.payload, target.zone_index) {
                Ok(reading) => {
                    self.update_zone(&controller.controller_ref, target.zone_index, |s| {
                        s.lut_index = Some(reading.lut_index);
                        s.mute_flags = Some(reading.mute_flags);
                        s.volume = Some(lut_index_to_pct(reading.lut_index, target.range));
                    });
                    readings.push((target, reading));
                }
                Err(e) => {
                    debug!(
                        controller = %controller.controller_ref,
                        zone = target.zone_number,
                        error = %e,
                        "Zone missing from state reply"
                    );
                }
            }
        }
        Ok(readings)
    }

    async fn read_zone(
        &self,
        controller: &ControllerRecord,
        target: &ZoneTarget,
    ) -> Result<ZoneReading, AmpError> {
        let response = self
            .transact(controller, &Request::sync(SyncType::Zones))
            .await?;
        let reading = parse_zone_reading(&response.payload, target.zone_index)?;
        self.update_zone(&controller.controller_ref, target.zone_index, |s| {
            s.lut_index = Some(reading.lut_index);
            s.mute_flags = Some(reading.mute_flags);
            s.volume = Some(lut_index_to_pct(reading.lut_index, target.range));
        });
        Ok(reading)
    }

    /// Mute flags to carry into a volume write.
    async fn current_mute_flags(&self, controller: &ControllerRecord, target: &ZoneTarget) -> u8 {
        let state = self.zone_state(&controller.controller_ref, target.zone_index);
        if let Some(flags) = state.mute_flags {
            return flags;
        }
        match self.read_zone(controller, target).await {
            Ok(reading) => reading.mute_flags,
            Err(e) => {
                debug!(
                    controller = %controller.controller_ref,
                    zone = target.zone_number,
                    error = %e,
                    "Zone state unknown, writing unmuted"
                );
                0
            }
        }
    }

    async fn write_zone(
        &self,
        controller: &ControllerRecord,
        target: &ZoneTarget,
        lut_index: u8,
        mute_flags: u8,
    ) -> Result<(), AmpError> {
        let object_id = zone_object_id(target.zone_index).ok_or_else(|| {
            AmpError::invalid(
                "zone_index",
                format!("{} has no zone object id", target.zone_index),
            )
        })?;
        let request = Request::zone_write(object_id, lut_index, mute_flags);
        self.transact(controller, &request).await?;
        self.update_zone(&controller.controller_ref, target.zone_index, |s| {
            s.lut_index = Some(lut_index);
            s.mute_flags = Some(mute_flags);
        });
        Ok(())
    }

    async fn set_zone_volume(
        &self,
        controller: &ControllerRecord,
        target: &ZoneTarget,
        volume: u8,
        mute_flags: u8,
    ) -> Result<ExecutionResult, AmpError> {
        let db = pct_to_db(volume as f64, target.range);
        let lut_index = db_to_lut_index(db);
        self.write_zone(controller, target, lut_index, mute_flags)
            .await?;
        self.update_zone(&controller.controller_ref, target.zone_index, |s| {
            s.volume = Some(volume)
        });

        info!(
            controller = %controller.controller_ref,
            zone = target.zone_number,
            volume,
            db = round_db(db),
            lut_index,
            "Zone volume set"
        );

        Ok(ExecutionResult::success(format!(
            "Zone {} volume set to {}%",
            target.zone_number, volume
        ))
        .with_data("controller", controller.controller_ref.clone())
        .with_data("zone_number", target.zone_number)
        .with_data("volume", volume)
        .with_data("db", round_db(db))
        .with_data("lut_index", lut_index)
        .with_data("muted", mute_flags != 0))
    }

    async fn set_mute(
        &self,
        controller: &ControllerRecord,
        target: &ZoneTarget,
        change: MuteChange,
    ) -> Result<ExecutionResult, AmpError> {
        let state = self.zone_state(&controller.controller_ref, target.zone_index);
        let mut lut_index = state.lut_index;
        let mut flags = state.mute_flags;

        let needs_read =
            lut_index.is_none() || (change == MuteChange::Toggle && flags.is_none());
        if needs_read {
            match self.read_zone(controller, target).await {
                Ok(reading) => {
                    lut_index = Some(reading.lut_index);
                    flags = Some(reading.mute_flags);
                }
                Err(e) => {
                    warn!(
                        controller = %controller.controller_ref,
                        zone = target.zone_number,
                        error = %e,
                        "Zone state read failed, using cached volume"
                    );
                }
            }
        }

        // A soft mute only changes the flags; the gain index stays put.
        let lut_index = lut_index.unwrap_or_else(|| {
            pct_to_lut_index(state.volume.unwrap_or(DEFAULT_VOLUME), target.range)
        });
        let muted = match change {
            MuteChange::Mute => true,
            MuteChange::Unmute => false,
            MuteChange::Toggle => flags.is_none_or(|f| f == 0),
        };
        let mute_flags = if muted { ZONE_MUTE_FLAG } else { 0 };

        self.write_zone(controller, target, lut_index, mute_flags)
            .await?;

        info!(
            controller = %controller.controller_ref,
            zone = target.zone_number,
            muted,
            lut_index,
            "Zone mute changed"
        );

        Ok(ExecutionResult::success(format!(
            "Zone {} {}",
            target.zone_number,
            if muted { "muted" } else { "unmuted" }
        ))
        .with_data("controller", controller.controller_ref.clone())
        .with_data("zone_number", target.zone_number)
        .with_data("muted", muted)
        .with_data("lut_index", lut_index))
    }

    /// Apply one volume to every zone, in order.
    async fn set_master_volume(
        &self,
        controller: &ControllerRecord,
        volume: u8,
    ) -> Result<ExecutionResult, AmpError> {
        if controller.zones.is_empty() {
            return Err(AmpError::NoZones(controller.controller_ref.clone()));
        }

        let started = Instant::now();
        let request_timeout = self.config.request_timeout();
        let budget = request_timeout * MASTER_ROUND_TRIPS;

        if let Err(e) = self.read_zone_readings(controller).await {
            debug!(
                controller = %controller.controller_ref,
                error = %e,
                "Zone state read failed before master volume"
            );
        }

        let mut succeeded = Vec::new();
        let mut failed: Vec<(u16, AmpError)> = Vec::new();
        let mut stopped = false;

        for zone in &controller.zones {
            let target = ZoneTarget::new(controller, zone);
            if !stopped && started.elapsed() + request_timeout > budget {
                warn!(
                    controller = %controller.controller_ref,
                    zone = target.zone_number,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Master volume out of time, skipping remaining zones"
                );
                stopped = true;
            }
            if stopped {
                failed.push((
                    target.zone_number,
                    AmpError::Timeout {
                        timeout_ms: self.config.request_timeout_ms,
                    },
                ));
                continue;
            }

            let flags = self
                .zone_state(&controller.controller_ref, target.zone_index)
                .mute_flags
                .unwrap_or(0);
            match self
                .set_zone_volume(controller, &target, volume, flags)
                .await
            {
                Ok(_) => succeeded.push(target.zone_number),
                Err(e) => {
                    warn!(
                        controller = %controller.controller_ref,
                        zone = target.zone_number,
                        error = %e,
                        "Master volume write failed"
                    );
                    stopped = matches!(e, AmpError::Timeout { .. } | AmpError::Io(_));
                    failed.push((target.zone_number, e));
                }
            }
        }

        if !succeeded.is_empty() {
            self.master_levels
                .insert(controller.controller_ref.clone(), volume);
        }

        let total = controller.zones.len();
        let Some((_, first_error)) = failed.first() else {
            return Ok(ExecutionResult::success(format!(
                "Master volume set to {}% on {} zones",
                volume, total
            ))
            .with_data("controller", controller.controller_ref.clone())
            .with_data("volume", volume)
            .with_data("succeeded_zones", succeeded));
        };

        let failed_zones: Vec<Value> = failed
            .iter()
            .map(|(zone_number, e)| {
                json!({
                    "zone_number": zone_number,
                    "error": e.to_string(),
                    "error_kind": e.kind(),
                })
            })
            .collect();

        Ok(ExecutionResult::failure(
            first_error.kind(),
            format!(
                "Master volume set on {} of {} zones",
                succeeded.len(),
                total
            ),
        )
        .with_data("controller", controller.controller_ref.clone())
        .with_data("volume", volume)
        .with_data("partial", !succeeded.is_empty())
        .with_data("succeeded_zones", succeeded)
        .with_data("failed_zones", failed_zones))
    }

    async fn recall_preset(
        &self,
        controller: &ControllerRecord,
        preset_number: u8,
    ) -> Result<ExecutionResult, AmpError> {
        self.transact(controller, &Request::preset_recall(preset_number - 1))
            .await?;
        // The preset rewrites every zone's gain and mute.
        self.invalidate_controller(&controller.controller_ref);

        info!(
            controller = %controller.controller_ref,
            preset_number,
            "Preset recalled"
        );

        Ok(
            ExecutionResult::success(format!("Preset {} recalled", preset_number))
                .with_data("controller", controller.controller_ref.clone())
                .with_data("preset_number", preset_number),
        )
    }

    async fn read_zones(&self, controller: &ControllerRecord) -> Result<ExecutionResult, AmpError> {
        let readings = self.read_zone_readings(controller).await?;
        let zones: Vec<Value> = readings
            .iter()
            .map(|(target, reading)| {
                json!({
                    "zone_number": target.zone_number,
                    "zone_index": target.zone_index,
                    "name": target.name,
                    "lut_index": reading.lut_index,
                    "db": round_db(lut_index_to_db(reading.lut_index)),
                    "volume": lut_index_to_pct(reading.lut_index, target.range),
                    "muted": reading.muted(),
                })
            })
            .collect();

        Ok(
            ExecutionResult::success(format!("Read {} zones", zones.len()))
                .with_data("controller", controller.controller_ref.clone())
                .with_data("zones", zones),
        )
    }

    async fn read_presets(
        &self,
        controller: &ControllerRecord,
    ) -> Result<ExecutionResult, AmpError> {
        let response = self
            .transact(controller, &Request::sync(SyncType::Presets))
            .await?;
        let presets = parse_preset_records(&response.payload);
        let count = presets.len();
        let presets = serde_json::to_value(presets).unwrap_or(Value::Null);

        Ok(ExecutionResult::success(format!("Read {} presets", count))
            .with_data("controller", controller.controller_ref.clone())
            .with_data("presets", presets))
    }
}

#[async_trait]
impl Executor for AmpExecutor {
    fn name(&self) -> &str {
        PROTOCOL
    }

    fn can_execute(&self, command: &Command) -> bool {
        matches!(
            command.device_class,
            DeviceClass::AudioZone | DeviceClass::AudioController
        ) && command.protocol.as_deref() == Some(PROTOCOL)
    }

    async fn execute(&self, command: &Command) -> ExecutionResult {
        let timer = ExecutionTimer::start();
        let result = match self.run(command).await {
            Ok(result) => result,
            Err(AmpError::UnsupportedAction { .. }) => unsupported_action(self.name(), command),
            Err(e) => {
                warn!(
                    command_id = %command.id,
                    controller = %command.controller_ref,
                    action = %command.action,
                    error = %e,
                    "Amplifier command failed"
                );
                e.into_result()
            }
        };
        timer.finish(result)
    }

    fn deadline(&self, command: &Command) -> Option<Duration> {
        Some(
            self.config
                .deadline_for(AmpAction::max_requests(&command.action)),
        )
    }

    async fn cleanup(&self) {
        debug!(connections = self.connections.len(), "Closing amplifier connections");
        self.connections.close_all().await;
    }
}
