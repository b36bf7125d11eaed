//! HTTP queue client.
//!
//! Speaks a small JSON contract to the queue service, in the same
//! bespoke-HTTP style as the internal RPC: `POST /messages` to enqueue,
//! `GET /messages?max=&wait_seconds=` to long-poll, `DELETE
//! /messages/{receipt}` to ack, `POST /messages/{receipt}/nack` to nack.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::{MessageQueue, QueueMessage};
use crate::error::QueueError;

/// Long-poll requests need headroom beyond the wait time itself.
const POLL_TIMEOUT_MARGIN: Duration = Duration::from_secs(10);

#[derive(Deserialize)]
struct WireMessage {
    receipt: String,
    body: String,
}

pub struct HttpQueue {
    client: reqwest::Client,
    base_url: String,
}

impl HttpQueue {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl MessageQueue for HttpQueue {
    async fn send(&self, body: &str) -> Result<(), QueueError> {
        let response = self
            .client
            .post(self.url("/messages"))
            .json(&serde_json::json!({ "body": body }))
            .send()
            .await
            .map_err(|e| QueueError::SendFailed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(QueueError::SendFailed(format!(
                "status {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn receive(&self, max: usize, wait: Duration) -> Result<Vec<QueueMessage>, QueueError> {
        let response = self
            .client
            .get(self.url("/messages"))
            .query(&[
                ("max", max.to_string()),
                ("wait_seconds", wait.as_secs().to_string()),
            ])
            .timeout(wait + POLL_TIMEOUT_MARGIN)
            .send()
            .await
            .map_err(|e| QueueError::ReceiveFailed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(QueueError::ReceiveFailed(format!(
                "status {}",
                response.status()
            )));
        }
        let wire: Vec<WireMessage> = response
            .json()
            .await
            .map_err(|e| QueueError::ReceiveFailed(format!("decode: {e}")))?;
        Ok(wire
            .into_iter()
            .map(|m| QueueMessage {
                receipt: m.receipt,
                body: m.body,
            })
            .collect())
    }

    async fn ack(&self, receipt: &str) -> Result<(), QueueError> {
        let response = self
            .client
            .delete(self.url(&format!("/messages/{receipt}")))
            .send()
            .await
            .map_err(|e| QueueError::AckFailed {
                receipt: receipt.to_string(),
                reason: e.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(QueueError::AckFailed {
                receipt: receipt.to_string(),
                reason: format!("status {}", response.status()),
            });
        }
        Ok(())
    }

    async fn nack(&self, receipt: &str) -> Result<(), QueueError> {
        // Best effort: a lost nack just waits out the visibility timeout.
        let _ = self
            .client
            .post(self.url(&format!("/messages/{receipt}/nack")))
            .send()
            .await
            .map_err(|e| QueueError::AckFailed {
                receipt: receipt.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }
}
