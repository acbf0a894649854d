//! Protocol router.
//!
//! Registry mapping `(device class, protocol)` to an executor. Infrared
//! commands resolve by device class alone. Resolution is a table lookup with
//! no I/O.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::command::{Command, DeviceClass};
use crate::executor::Executor;

/// Registry key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteKey {
    /// Device class
    pub device_class: DeviceClass,
    /// Protocol name, always `None` for infrared
    pub protocol: Option<String>,
}

impl RouteKey {
    /// Build a key, dropping the protocol for infrared.
    pub fn new(device_class: DeviceClass, protocol: Option<&str>) -> Self {
        let protocol = match device_class {
            DeviceClass::Ir => None,
            _ => protocol.map(str::to_string),
        };
        Self {
            device_class,
            protocol,
        }
    }

    /// Key addressed by a command.
    pub fn for_command(command: &Command) -> Self {
        Self::new(command.device_class, command.protocol.as_deref())
    }
}

impl std::fmt::Display for RouteKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.protocol {
            Some(protocol) => write!(f, "{}/{}", self.device_class, protocol),
            None => write!(f, "{}", self.device_class),
        }
    }
}

/// Executor registry.
pub struct ProtocolRouter {
    routes: DashMap<RouteKey, Arc<dyn Executor>>,
}

impl ProtocolRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self {
            routes: DashMap::new(),
        }
    }

    /// Register an executor, returning the one it replaced.
    ///
    /// The same executor may be registered under several protocols.
    pub fn register(
        &self,
        device_class: DeviceClass,
        protocol: Option<&str>,
        executor: Arc<dyn Executor>,
    ) -> Option<Arc<dyn Executor>> {
        let key = RouteKey::new(device_class, protocol);
        info!(route = %key, executor = executor.name(), "Registered executor");
        self.routes.insert(key, executor)
    }

    /// Remove a route.
    pub fn unregister(
        &self,
        device_class: DeviceClass,
        protocol: Option<&str>,
    ) -> Option<Arc<dyn Executor>> {
        self.routes
            .remove(&RouteKey::new(device_class, protocol))
            .map(|(_, executor)| executor)
    }

    /// Resolve the executor for a command.
    ///
    /// A registered executor that rejects the command in `can_execute`
    /// resolves to `None` as well.
    pub fn resolve(&self, command: &Command) -> Option<Arc<dyn Executor>> {
        let key = RouteKey::for_command(command);
        let executor = self.routes.get(&key).map(|entry| entry.value().clone())?;

        if executor.can_execute(command) {
            Some(executor)
        } else {
            debug!(
                route = %key,
                executor = executor.name(),
                "Registered executor rejected command"
            );
            None
        }
    }

    /// All registered routes.
    pub fn routes(&self) -> Vec<RouteKey> {
        self.routes.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Distinct registered executors. Aliased registrations appear once.
    pub fn executors(&self) -> Vec<Arc<dyn Executor>> {
        let mut unique: Vec<Arc<dyn Executor>> = Vec::new();
        for entry in self.routes.iter() {
            let ptr = Arc::as_ptr(entry.value()) as *const ();
            if !unique.iter().any(|e| Arc::as_ptr(e) as *const () == ptr) {
                unique.push(entry.value().clone());
            }
        }
        unique
    }

    /// Run `cleanup` once on every distinct executor.
    pub async fn cleanup_all(&self) {
        for executor in self.executors() {
            debug!(executor = executor.name(), "Cleaning up executor");
            executor.cleanup().await;
        }
    }

    /// Number of routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no route is registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl Default for ProtocolRouter {
    fn default() -> Self {
        Self::new()
    }
}
