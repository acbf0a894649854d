//! Command dispatch engine.
//!
//! Provides:
//! - Command record, status machine and execution result
//! - Executor contract and protocol router
//! - Dispatcher with deadlines, read-back and lifecycle events
//! - Priority queue and processor for asynchronous intake
//! - Hybrid network/infrared policy router

pub mod command;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod executor;
pub mod hybrid;
pub mod processor;
pub mod queue;
pub mod router;
pub mod state;

// Re-exports
pub use command::{
    Command, CommandId, CommandStatus, DeviceClass, ExecutionResult, Parameters, DEFAULT_PRIORITY,
};

pub use config::DispatcherConfig;

pub use dispatcher::Dispatcher;

pub use error::{Classify, CommandError, ErrorKind};

pub use events::{CommandEvent, CommandEventBus, CommandEventReceiver, EventFilter};

pub use executor::{unsupported_action, ExecutionTimer, Executor, EXECUTION_TIME_KEY};

pub use hybrid::{
    ControlStrategy, DeviceControlStatus, DeviceHybridPolicy, HybridDevice, HybridPolicyRouter,
    PowerOnMethod, TransportMethod,
};

pub use processor::CommandProcessor;

pub use queue::{CommandQueue, QueueError, QueueStats};

pub use router::{ProtocolRouter, RouteKey};

pub use state::{CommandStateStore, StoreStats};
