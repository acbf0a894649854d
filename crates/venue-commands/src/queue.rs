//! Command queue.
//!
//! Priority ordering of accepted commands waiting for the processor.

use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};

use crate::command::{Command, CommandId};

/// Queue error types.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Queue is full (capacity {0})")]
    Full(usize),
}

/// Queue statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    /// Commands waiting
    pub pending: usize,
    /// Commands ever enqueued
    pub enqueued: u64,
    /// Commands ever dequeued
    pub dequeued: u64,
}

#[derive(Debug)]
struct QueueItem {
    command: Command,
    /// Enqueue order for FIFO among equal priorities
    sequence: u64,
}

impl PartialEq for QueueItem {
    fn eq(&self, other: &Self) -> bool {
        self.command.priority == other.command.priority && self.sequence == other.sequence
    }
}

impl Eq for QueueItem {}

impl PartialOrd for QueueItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueItem {
    // BinaryHeap pops the greatest item: lower priority value and lower
    // sequence compare greater.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .command
            .priority
            .cmp(&self.command.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Command queue with priority support.
pub struct CommandQueue {
    heap: Mutex<BinaryHeap<QueueItem>>,
    capacity: usize,
    sequence: AtomicU64,
    dequeued: AtomicU64,
    notify: Notify,
}

impl CommandQueue {
    /// Create a queue holding at most `capacity` commands.
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            capacity,
            sequence: AtomicU64::new(0),
            dequeued: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    /// Enqueue a command.
    pub async fn enqueue(&self, command: Command) -> Result<CommandId, QueueError> {
        let mut heap = self.heap.lock().await;
        if heap.len() >= self.capacity {
            return Err(QueueError::Full(self.capacity));
        }

        let id = command.id.clone();
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        heap.push(QueueItem { command, sequence });
        drop(heap);

        self.notify.notify_one();
        Ok(id)
    }

    /// Take the most urgent command, if any.
    pub async fn try_dequeue(&self) -> Option<Command> {
        let item = self.heap.lock().await.pop()?;
        self.dequeued.fetch_add(1, Ordering::Relaxed);
        Some(item.command)
    }

    /// Take the most urgent command, waiting up to `wait` for one to arrive.
    pub async fn dequeue_timeout(&self, wait: Duration) -> Option<Command> {
        if let Some(command) = self.try_dequeue().await {
            return Some(command);
        }
        let _ = tokio::time::timeout(wait, self.notify.notified()).await;
        self.try_dequeue().await
    }

    /// Commands waiting.
    pub async fn len(&self) -> usize {
        self.heap.lock().await.len()
    }

    /// Whether nothing is waiting.
    pub async fn is_empty(&self) -> bool {
        self.heap.lock().await.is_empty()
    }

    /// Drop every waiting command, returning them.
    pub async fn drain(&self) -> Vec<Command> {
        let mut heap = self.heap.lock().await;
        let mut drained = Vec::with_capacity(heap.len());
        while let Some(item) = heap.pop() {
            drained.push(item.command);
        }
        drained
    }

    /// Queue statistics.
    pub async fn stats(&self) -> QueueStats {
        QueueStats {
            pending: self.len().await,
            enqueued: self.sequence.load(Ordering::Relaxed),
            dequeued: self.dequeued.load(Ordering::Relaxed),
        }
    }
}
