//! Command-line interface for venue amplifier control.

mod config;

use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use venue_commands::{Command as VenueCommand, DeviceClass, Dispatcher, ProtocolRouter};
use venue_devices::amp::{AmpExecutor, PROTOCOL};
use venue_devices::{ControllerRecord, GainRange, InMemoryDirectory, ZoneRecord};

use crate::config::VenueConfig;

/// Venue control - send commands to a networked amplifier.
#[derive(Parser, Debug)]
#[command(name = "venue")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Configuration file (defaults to venue.toml when present).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output, including wire traffic.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Amplifier address.
#[derive(clap::Args, Debug, Clone)]
struct Target {
    /// Amplifier IP address.
    #[arg(long)]
    ip: IpAddr,

    /// Device receive port override.
    #[arg(long)]
    port: Option<u16>,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Check that the amplifier responds.
    Ping {
        #[command(flatten)]
        target: Target,
    },
    /// Query the amplifier's identity.
    Identify {
        #[command(flatten)]
        target: Target,
    },
    /// Set a zone's volume.
    SetVolume {
        #[command(flatten)]
        target: Target,
        /// Zone number, starting at 1.
        #[arg(long, default_value_t = 1)]
        zone: u16,
        /// Volume percentage.
        #[arg(long)]
        volume: u8,
        /// Gain at 0%.
        #[arg(long, allow_hyphen_values = true)]
        min_db: Option<f64>,
        /// Gain at 100%.
        #[arg(long, allow_hyphen_values = true)]
        max_db: Option<f64>,
    },
    /// Mute a zone without changing its volume.
    Mute {
        #[command(flatten)]
        target: Target,
        /// Zone number, starting at 1.
        #[arg(long, default_value_t = 1)]
        zone: u16,
    },
    /// Unmute a zone.
    Unmute {
        #[command(flatten)]
        target: Target,
        /// Zone number, starting at 1.
        #[arg(long, default_value_t = 1)]
        zone: u16,
    },
    /// Recall a stored preset.
    RecallPreset {
        #[command(flatten)]
        target: Target,
        /// Preset number, starting at 1.
        #[arg(long)]
        preset: i64,
    },
    /// Read every zone's gain and mute state.
    Zones {
        #[command(flatten)]
        target: Target,
    },
    /// Read preset names.
    Presets {
        #[command(flatten)]
        target: Target,
    },
}

impl Command {
    fn target(&self) -> &Target {
        match self {
            Command::Ping { target }
            | Command::Identify { target }
            | Command::SetVolume { target, .. }
            | Command::Mute { target, .. }
            | Command::Unmute { target, .. }
            | Command::RecallPreset { target, .. }
            | Command::Zones { target }
            | Command::Presets { target } => target,
        }
    }

    /// Controller record and engine command for this invocation.
    fn build(&self) -> (ControllerRecord, VenueCommand) {
        let target = self.target();
        let controller_ref = target.ip.to_string();
        let mut record = ControllerRecord::new(&controller_ref, target.ip);
        if let Some(port) = target.port {
            record = record.with_port(port);
        }

        let controller = |action: &str| {
            VenueCommand::new(&controller_ref, DeviceClass::AudioController, action)
                .with_protocol(PROTOCOL)
        };
        let zone = |action: &str, zone_number: u16| {
            VenueCommand::new(&controller_ref, DeviceClass::AudioZone, action)
                .with_protocol(PROTOCOL)
                .with_parameter("zone_number", zone_number)
        };

        let command = match self {
            Command::Ping { .. } => controller("ping"),
            Command::Identify { .. } => controller("identify"),
            Command::SetVolume {
                zone: zone_number,
                volume,
                min_db,
                max_db,
                ..
            } => {
                let defaults = GainRange::default();
                let range = GainRange::new(
                    min_db.unwrap_or(defaults.min_db),
                    max_db.unwrap_or(defaults.max_db),
                );
                record = record.with_zone(ZoneRecord::new(*zone_number).with_gain_range(range));
                zone("set_volume", *zone_number).with_parameter("volume", *volume)
            }
            Command::Mute {
                zone: zone_number, ..
            } => {
                record = record.with_zone(ZoneRecord::new(*zone_number));
                zone("mute", *zone_number)
            }
            Command::Unmute {
                zone: zone_number, ..
            } => {
                record = record.with_zone(ZoneRecord::new(*zone_number));
                zone("unmute", *zone_number)
            }
            Command::RecallPreset { preset, .. } => {
                controller("recall_preset").with_parameter("preset_number", *preset)
            }
            Command::Zones { .. } => controller("read_zones"),
            Command::Presets { .. } => controller("read_presets"),
        };
        (record, command)
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_logging(args.verbose);

    let success = run(&args).await?;
    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn init_logging(verbose: bool) {
    let json_logging = std::env::var("VENUE_LOG_JSON")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let default_directive = if verbose { "venue=debug" } else { "venue=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Submit one command and print its result. Returns whether it succeeded.
async fn run(args: &Args) -> Result<bool> {
    let config = VenueConfig::load(args.config.as_deref())?;
    let (record, command) = args.command.build();

    let directory = Arc::new(InMemoryDirectory::new().with_controller(record));
    let executor = Arc::new(AmpExecutor::new(directory, config.amp.clone()));

    let router = Arc::new(ProtocolRouter::new());
    router.register(DeviceClass::AudioZone, Some(PROTOCOL), executor.clone());
    router.register(DeviceClass::AudioController, Some(PROTOCOL), executor);

    let dispatcher = Dispatcher::new(router, config.dispatcher);
    let command = dispatcher.submit_tracked(command).await;
    dispatcher.shutdown().await;

    let result = command
        .result
        .context("Command finished without a result")?;
    println!(
        "{}",
        serde_json::to_string_pretty(&result).context("Failed to render result")?
    );
    Ok(result.success)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_set_volume_builds_zone_command() {
        let args = parse(&[
            "venue",
            "set-volume",
            "--ip",
            "192.168.1.50",
            "--zone",
            "2",
            "--volume",
            "75",
            "--min-db",
            "-60",
            "--max-db",
            "0",
        ]);
        let (record, command) = args.command.build();

        assert_eq!(command.device_class, DeviceClass::AudioZone);
        assert_eq!(command.action, "set_volume");
        assert_eq!(command.protocol.as_deref(), Some(PROTOCOL));
        assert_eq!(command.int_param("zone_number").unwrap(), Some(2));
        assert_eq!(command.int_param("volume").unwrap(), Some(75));
        assert_eq!(command.controller_ref, "192.168.1.50");

        let zone = record.zone(2).unwrap();
        assert_eq!(zone.gain_range, Some(GainRange::new(-60.0, 0.0)));
    }

    #[test]
    fn test_recall_preset_passes_raw_number() {
        let args = parse(&["venue", "recall-preset", "--ip", "10.0.0.2", "--preset", "12"]);
        let (_, command) = args.command.build();
        assert_eq!(command.device_class, DeviceClass::AudioController);
        assert_eq!(command.int_param("preset_number").unwrap(), Some(12));
    }

    #[test]
    fn test_global_flags_and_port_override() {
        let args = parse(&[
            "venue", "zones", "--ip", "10.0.0.2", "--port", "4000", "-v", "--config", "a.toml",
        ]);
        assert!(args.verbose);
        assert_eq!(args.config, Some(PathBuf::from("a.toml")));

        let (record, command) = args.command.build();
        assert_eq!(record.port, Some(4000));
        assert!(record.zones.is_empty());
        assert_eq!(command.action, "read_zones");
    }

    #[test]
    fn test_missing_ip_is_rejected() {
        assert!(Args::try_parse_from(["venue", "ping"]).is_err());
    }
}
