//! In-process queue with visibility timeout.
//!
//! Used by tests and single-process deployments where the gateway and the
//! consumer share one process. Semantics mirror the durable queue: a
//! received message becomes invisible until acked, nacked, or timed out.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

use super::{MessageQueue, QueueMessage};
use crate::error::QueueError;

const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(60);

struct InFlight {
    body: String,
    delivered_at: Instant,
}

#[derive(Default)]
struct State {
    ready: VecDeque<String>,
    in_flight: std::collections::HashMap<String, InFlight>,
}

pub struct MemoryQueue {
    state: Mutex<State>,
    notify: Notify,
    visibility_timeout: Duration,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::with_visibility_timeout(DEFAULT_VISIBILITY_TIMEOUT)
    }

    pub fn with_visibility_timeout(visibility_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            visibility_timeout,
        }
    }

    /// Return timed-out in-flight messages to the ready queue.
    async fn reap_expired(&self) {
        let mut state = self.state.lock().await;
        let expired: Vec<String> = state
            .in_flight
            .iter()
            .filter(|(_, m)| m.delivered_at.elapsed() >= self.visibility_timeout)
            .map(|(receipt, _)| receipt.clone())
            .collect();
        for receipt in expired {
            if let Some(inflight) = state.in_flight.remove(&receipt) {
                state.ready.push_back(inflight.body);
            }
        }
    }

    /// Number of messages currently ready for delivery.
    pub async fn ready_len(&self) -> usize {
        self.state.lock().await.ready.len()
    }

    /// Number of delivered-but-unacked messages.
    pub async fn in_flight_len(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    async fn send(&self, body: &str) -> Result<(), QueueError> {
        self.state.lock().await.ready.push_back(body.to_string());
        self.notify.notify_waiters();
        Ok(())
    }

    async fn receive(&self, max: usize, wait: Duration) -> Result<Vec<QueueMessage>, QueueError> {
        let deadline = Instant::now() + wait;
        loop {
            self.reap_expired().await;
            {
                let mut state = self.state.lock().await;
                if !state.ready.is_empty() {
                    let mut batch = Vec::new();
                    while batch.len() < max {
                        let Some(body) = state.ready.pop_front() else {
                            break;
                        };
                        let receipt = Uuid::new_v4().to_string();
                        state.in_flight.insert(
                            receipt.clone(),
                            InFlight {
                                body: body.clone(),
                                delivered_at: Instant::now(),
                            },
                        );
                        batch.push(QueueMessage { receipt, body });
                    }
                    return Ok(batch);
                }
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(Vec::new());
            }
            // Wake on new sends, or re-check periodically for reaps.
            let _ = tokio::time::timeout(
                remaining.min(Duration::from_millis(250)),
                self.notify.notified(),
            )
            .await;
        }
    }

    async fn ack(&self, receipt: &str) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        state
            .in_flight
            .remove(receipt)
            .map(|_| ())
            .ok_or_else(|| QueueError::UnknownReceipt(receipt.to_string()))
    }

    async fn nack(&self, receipt: &str) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let inflight = state
            .in_flight
            .remove(receipt)
            .ok_or_else(|| QueueError::UnknownReceipt(receipt.to_string()))?;
        state.ready.push_back(inflight.body);
        drop(state);
        self.notify.notify_waiters();
        Ok(())
    }
}
