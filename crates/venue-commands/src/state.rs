//! Command state store.
//!
//! Bounded in-memory window of recent commands backing result read-back.
//! Long-term history belongs to an external persistence layer.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::command::{Command, CommandId, CommandStatus};

/// Store statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStats {
    /// Commands held
    pub total: usize,
    /// Queued or executing
    pub in_flight: usize,
    /// Completed
    pub completed: usize,
    /// Failed or timed out
    pub failed: usize,
}

struct Entry {
    order: u64,
    command: Command,
}

/// Command state store.
pub struct CommandStateStore {
    commands: DashMap<CommandId, Entry>,
    capacity: usize,
    order: AtomicU64,
}

impl CommandStateStore {
    /// Create a store holding at most `capacity` commands.
    pub fn new(capacity: usize) -> Self {
        Self {
            commands: DashMap::new(),
            capacity: capacity.max(1),
            order: AtomicU64::new(0),
        }
    }

    /// Insert or update a command.
    ///
    /// Updating keeps the command's original position in the recency order.
    pub fn store(&self, command: &Command) {
        if let Some(mut entry) = self.commands.get_mut(&command.id) {
            entry.command = command.clone();
            return;
        }

        if self.commands.len() >= self.capacity {
            self.evict_oldest_terminal();
        }

        let order = self.order.fetch_add(1, Ordering::Relaxed);
        self.commands.insert(
            command.id.clone(),
            Entry {
                order,
                command: command.clone(),
            },
        );
    }

    /// Retrieve a command by ID.
    pub fn get(&self, id: &str) -> Option<Command> {
        self.commands.get(id).map(|entry| entry.command.clone())
    }

    /// Remove a command.
    pub fn remove(&self, id: &str) -> Option<Command> {
        self.commands.remove(id).map(|(_, entry)| entry.command)
    }

    /// Most recent commands, newest first.
    pub fn list_recent(&self, controller_ref: Option<&str>, limit: usize) -> Vec<Command> {
        self.collect(limit, |command| {
            controller_ref.is_none_or(|c| command.controller_ref == c)
        })
    }

    /// Most recent failed or timed out commands, newest first.
    pub fn list_failed(&self, controller_ref: Option<&str>, limit: usize) -> Vec<Command> {
        self.collect(limit, |command| {
            matches!(command.status, CommandStatus::Failed | CommandStatus::Timeout)
                && controller_ref.is_none_or(|c| command.controller_ref == c)
        })
    }

    /// Number of commands held.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Store statistics.
    pub fn stats(&self) -> StoreStats {
        let mut stats = StoreStats::default();
        for entry in self.commands.iter() {
            stats.total += 1;
            match entry.command.status {
                CommandStatus::Queued | CommandStatus::Executing => stats.in_flight += 1,
                CommandStatus::Completed => stats.completed += 1,
                CommandStatus::Failed | CommandStatus::Timeout => stats.failed += 1,
            }
        }
        stats
    }

    fn collect<F>(&self, limit: usize, filter: F) -> Vec<Command>
    where
        F: Fn(&Command) -> bool,
    {
        let mut matched: Vec<(u64, Command)> = self
            .commands
            .iter()
            .filter(|entry| filter(&entry.command))
            .map(|entry| (entry.order, entry.command.clone()))
            .collect();
        matched.sort_by(|a, b| b.0.cmp(&a.0));
        matched
            .into_iter()
            .take(limit)
            .map(|(_, command)| command)
            .collect()
    }

    // In-flight commands are never evicted; the store may briefly exceed its
    // capacity while all held commands are running.
    fn evict_oldest_terminal(&self) {
        let oldest = self
            .commands
            .iter()
            .filter(|entry| entry.command.is_terminal())
            .min_by_key(|entry| entry.order)
            .map(|entry| entry.key().clone());

        if let Some(id) = oldest {
            self.commands.remove(&id);
        }
    }
}

impl Default for CommandStateStore {
    fn default() -> Self {
        Self::new(crate::config::defaults::HISTORY_CAPACITY)
    }
}
