//! Amplifier binary UDP adapter.
//!
//! Controls multi-zone amplifiers speaking a proprietary binary protocol over
//! UDP. Requests go to the device's receive port; replies arrive on one
//! socket bound to the transmit port and are routed to controllers by source
//! address. Replies are matched by arrival order, so each controller's
//! connection allows a single request in flight.
//!
//! ## Handled actions
//!
//! | Device class | Actions |
//! |--------------|---------|
//! | `audioZone` | `set_volume`, `volume_up`, `volume_down`, `mute`, `unmute`, `toggle_mute`, `ping` |
//! | `audioController` | `ping`, `identify`, `set_master_volume`, `master_volume_up`, `master_volume_down`, `recall_preset`, `read_zones`, `read_presets` |

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub mod codec;
pub mod connection;
pub mod error;
pub mod executor;
pub mod gain;
pub mod sequence;

pub use codec::{CommandCode, NackCause, PresetRecord, Request, Response, ZoneReading};
pub use connection::{ConnectionCache, ControllerConnection, ReplyPort};
pub use error::AmpError;
pub use executor::AmpExecutor;
pub use gain::GainRange;
pub use sequence::SequenceCounter;

/// Protocol name routed to [`AmpExecutor`].
pub const PROTOCOL: &str = "amp_binary_udp";

/// Device receive port.
pub const DEVICE_PORT: u16 = 12128;

/// Port replies are sent to.
pub const LOCAL_PORT: u16 = 12129;

/// Amplifier adapter configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AmpConfig {
    /// Port requests are sent to
    #[serde(default = "default_device_port")]
    pub device_port: u16,
    /// Port the reply socket binds, 0 for an ephemeral port
    #[serde(default = "default_local_port")]
    pub local_port: u16,
    /// Per-request response timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Receive buffer size
    #[serde(default = "default_max_datagram")]
    pub max_datagram: usize,
    /// Highest valid preset number
    #[serde(default = "default_preset_count")]
    pub preset_count: u8,
    /// Step of relative volume adjustments, in percent
    #[serde(default = "default_volume_step")]
    pub volume_step: u8,
}

fn default_device_port() -> u16 {
    DEVICE_PORT
}

fn default_local_port() -> u16 {
    LOCAL_PORT
}

fn default_request_timeout_ms() -> u64 {
    2000
}

fn default_max_datagram() -> usize {
    1024
}

fn default_preset_count() -> u8 {
    8
}

fn default_volume_step() -> u8 {
    venue_commands::config::defaults::VOLUME_STEP
}

impl Default for AmpConfig {
    fn default() -> Self {
        Self {
            device_port: default_device_port(),
            local_port: default_local_port(),
            request_timeout_ms: default_request_timeout_ms(),
            max_datagram: default_max_datagram(),
            preset_count: default_preset_count(),
            volume_step: default_volume_step(),
        }
    }
}

impl AmpConfig {
    pub fn with_local_port(mut self, port: u16) -> Self {
        self.local_port = port;
        self
    }

    pub fn with_request_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.request_timeout_ms = timeout_ms;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Budget for an action of `requests` round trips, plus slack for the
    /// directory lookup and scheduling.
    pub fn deadline_for(&self, requests: u32) -> Duration {
        self.request_timeout() * requests.max(1) + Duration::from_millis(500)
    }
}
