//! Durable queue seam between the ingress gateway and the consumer.
//!
//! The queue service is an external collaborator; the core only needs
//! send / long-poll receive / ack / nack. Message bodies are opaque
//! provider-envelope bytes — the gateway enqueues them untransformed.

pub mod http;
pub mod memory;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::QueueError;
pub use http::HttpQueue;
pub use memory::MemoryQueue;

/// A received queue entry. The receipt acks or nacks this delivery only.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub receipt: String,
    pub body: String,
}

/// Queue contract. Redelivery after visibility timeout is expected;
/// consumers dedupe by provider message id at the persistence step.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Enqueue an opaque body.
    async fn send(&self, body: &str) -> Result<(), QueueError>;

    /// Long-poll up to `wait` for at most `max` messages.
    async fn receive(&self, max: usize, wait: Duration) -> Result<Vec<QueueMessage>, QueueError>;

    /// Delete a delivered message.
    async fn ack(&self, receipt: &str) -> Result<(), QueueError>;

    /// Return a message to the queue for redelivery.
    async fn nack(&self, receipt: &str) -> Result<(), QueueError>;
}
