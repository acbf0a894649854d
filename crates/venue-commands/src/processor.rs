//! Command processor.
//!
//! Asynchronous intake: commands are accepted into the [`CommandQueue`] and
//! drained in priority order, each running through the dispatcher on its own
//! task. Results are read back through the dispatcher.

use std::sync::Arc;

use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::command::{Command, CommandId};
use crate::dispatcher::Dispatcher;
use crate::queue::{CommandQueue, QueueError};

/// Command processor.
pub struct CommandProcessor {
    queue: Arc<CommandQueue>,
    dispatcher: Arc<Dispatcher>,
    permits: Arc<Semaphore>,
    running: Arc<RwLock<bool>>,
    task_handle: Arc<RwLock<Option<JoinHandle<()>>>>,
}

impl CommandProcessor {
    /// Create a processor sized from the dispatcher's configuration.
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        let config = dispatcher.config();
        Self {
            queue: Arc::new(CommandQueue::new(config.queue_capacity)),
            permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            dispatcher,
            running: Arc::new(RwLock::new(false)),
            task_handle: Arc::new(RwLock::new(None)),
        }
    }

    /// The pending queue.
    pub fn queue(&self) -> &Arc<CommandQueue> {
        &self.queue
    }

    /// Accept a command for asynchronous execution.
    ///
    /// The returned ID is immediately visible through
    /// [`Dispatcher::get_result`] with status `queued`.
    pub async fn enqueue(&self, mut command: Command) -> Result<CommandId, QueueError> {
        self.dispatcher.accept(&mut command);
        let id = command.id.clone();

        if let Err(e) = self.queue.enqueue(command).await {
            self.dispatcher.store().remove(&id);
            warn!(command_id = %id, error = %e, "Command rejected by queue");
            return Err(e);
        }
        debug!(command_id = %id, "Command enqueued");
        Ok(id)
    }

    /// Start the processor.
    pub async fn start(&self) {
        let mut running = self.running.write().await;
        if *running {
            return;
        }
        *running = true;
        drop(running);

        let queue = self.queue.clone();
        let dispatcher = self.dispatcher.clone();
        let permits = self.permits.clone();
        let running_flag = self.running.clone();
        let poll_interval = dispatcher.config().poll_interval();

        info!(
            max_concurrent = dispatcher.config().max_concurrent,
            "Command processor started"
        );

        let handle = tokio::spawn(async move {
            loop {
                if !*running_flag.read().await {
                    break;
                }

                let Some(command) = queue.dequeue_timeout(poll_interval).await else {
                    continue;
                };

                let Ok(permit) = permits.clone().acquire_owned().await else {
                    break;
                };
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    dispatcher.run_accepted(command).await;
                });
            }
        });

        *self.task_handle.write().await = Some(handle);
    }

    /// Stop the processor. Commands already running finish on their own.
    pub async fn stop(&self) {
        *self.running.write().await = false;

        let handle = self.task_handle.write().await.take();
        if let Some(handle) = handle {
            handle.await.ok();
        }
        info!("Command processor stopped");
    }

    /// Check if processor is running.
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}
