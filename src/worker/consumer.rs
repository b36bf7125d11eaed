//! Queue consumer — long-polls the durable queue and dispatches.
//!
//! Each entry is acked only after the processor durably accepted it (the
//! inbound Message row is written). Invariant violations nack so the queue
//! redelivers; the persistence step dedupes on the provider message id, so
//! redelivery is safe.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::queue::{MessageQueue, QueueMessage};
use crate::worker::processor::MessageProcessor;

/// Long-poll wait. Must stay under the queue's visibility timeout.
const POLL_WAIT: Duration = Duration::from_secs(20);

/// Max entries per poll.
const POLL_BATCH: usize = 10;

/// Cooldown after a receive failure.
const ERROR_COOLDOWN: Duration = Duration::from_secs(5);

pub struct QueueConsumer {
    queue: Arc<dyn MessageQueue>,
    processor: Arc<MessageProcessor>,
}

impl QueueConsumer {
    pub fn new(queue: Arc<dyn MessageQueue>, processor: Arc<MessageProcessor>) -> Self {
        Self { queue, processor }
    }

    /// Consume until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("queue consumer started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = shutdown.changed() => break,
                batch = self.queue.receive(POLL_BATCH, POLL_WAIT) => match batch {
                    Ok(messages) => self.dispatch_batch(messages).await,
                    Err(e) => {
                        error!(error = %e, "queue receive failed; cooling down");
                        tokio::time::sleep(ERROR_COOLDOWN).await;
                    }
                }
            }
        }
        info!("queue consumer stopped");
    }

    /// Process a batch concurrently; per-entry failures don't fail the batch.
    pub async fn dispatch_batch(&self, messages: Vec<QueueMessage>) {
        let tasks = messages.into_iter().map(|message| {
            let processor = self.processor.clone();
            let queue = self.queue.clone();
            async move {
                match processor.handle_event(&message.body).await {
                    Ok(()) => {
                        if let Err(e) = queue.ack(&message.receipt).await {
                            warn!(receipt = %message.receipt, error = %e, "ack failed");
                        }
                    }
                    Err(e) => {
                        warn!(
                            receipt = %message.receipt,
                            error = %e,
                            "processing failed; nacking for redelivery"
                        );
                        if let Err(nack_err) = queue.nack(&message.receipt).await {
                            warn!(receipt = %message.receipt, error = %nack_err, "nack failed");
                        }
                    }
                }
            }
        });
        join_all(tasks).await;
    }
}
