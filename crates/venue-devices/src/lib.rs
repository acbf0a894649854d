//! Venue device executors.
//!
//! Provides:
//! - Device directory collaborator and an in-memory implementation
//! - Infrared executor over an [`IrSender`] collaborator
//! - Amplifier binary UDP adapter

pub mod amp;
pub mod directory;
pub mod ir;

pub use amp::{AmpConfig, AmpError, AmpExecutor, GainRange};
pub use directory::{
    ControllerRecord, DeviceDirectory, DirectoryError, InMemoryDirectory, IrControllerRecord,
    ZoneRecord,
};
pub use ir::{IrExecutor, IrSendError, IrSendRequest, IrSender, DEFAULT_IR_PORT};
