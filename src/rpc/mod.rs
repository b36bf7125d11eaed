//! Internal state-store RPC client.
//!
//! The worker side has no direct database access: every state read and
//! write goes through this shared-secret HTTP channel. Transient failures
//! (transport errors, 5xx) get a small bounded retry with jitter; 4xx
//! surface immediately.

pub mod types;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::config::FollowupBucket;
use crate::error::RpcError;
pub use types::{
    Conversation, ConversationPatch, CtaOption, ObserverEvent, ObserverEventType, OutboundSend,
    StoredMessage, TenantBinding,
};

/// Header carrying the shared secret; the server compares in constant time.
pub const INTERNAL_SECRET_HEADER: &str = "X-Internal-Secret";

const RPC_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRIES: u32 = 2;
const RETRY_BASE_MS: u64 = 200;

/// Contract surface the core relies on. Mocked in worker tests.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Resolve the tenant bound to a provider phone-number-id.
    async fn tenant_by_phone_number_id(
        &self,
        phone_number_id: &str,
    ) -> Result<Option<TenantBinding>, RpcError>;

    /// Fetch a tenant by id (used by scheduler-initiated invocations,
    /// which start from a conversation rather than a provider event).
    async fn tenant_by_id(&self, tenant_id: Uuid) -> Result<TenantBinding, RpcError>;

    /// Fetch the conversation for (tenant, phone), creating the lead and
    /// conversation server-side when absent.
    async fn conversation_by_phone(
        &self,
        tenant_id: Uuid,
        phone: &str,
        lead_name: Option<&str>,
    ) -> Result<Conversation, RpcError>;

    async fn get_conversation(&self, id: Uuid) -> Result<Conversation, RpcError>;

    async fn patch_conversation(
        &self,
        id: Uuid,
        patch: &ConversationPatch,
    ) -> Result<Conversation, RpcError>;

    /// Persist an inbound lead message. Idempotent on the provider message
    /// id: redeliveries return the original row.
    async fn record_incoming(
        &self,
        conversation_id: Uuid,
        provider_message_id: &str,
        content: &str,
    ) -> Result<StoredMessage, RpcError>;

    /// Persist an outbound bot/human message (append-only).
    async fn record_outgoing(
        &self,
        conversation_id: Uuid,
        origin: crate::enums::MessageOrigin,
        content: &str,
    ) -> Result<StoredMessage, RpcError>;

    /// Last `limit` messages, oldest first.
    async fn last_messages(
        &self,
        conversation_id: Uuid,
        limit: u32,
    ) -> Result<Vec<StoredMessage>, RpcError>;

    async fn available_ctas(&self, tenant_id: Uuid) -> Result<Vec<CtaOption>, RpcError>;

    /// Conversations due a scheduled nudge. The bucket table travels with
    /// the request so the read-side policy stays in core configuration.
    async fn due_followups(
        &self,
        now: DateTime<Utc>,
        buckets: &[FollowupBucket],
    ) -> Result<Vec<Conversation>, RpcError>;

    /// Server-side atomic increment of `followup_count_24h`.
    async fn increment_followup_count(&self, conversation_id: Uuid) -> Result<(), RpcError>;

    /// Dispatch an outbound message; the server owns provider formatting
    /// and the 24-hour session-window / template rules.
    async fn send_message(&self, send: &OutboundSend) -> Result<(), RpcError>;

    /// Fan an observer event out to the dashboard.
    async fn emit_event(&self, event: &ObserverEvent) -> Result<(), RpcError>;

    /// Truncate conversations and messages. Used only by `reset-state`.
    async fn reset_state(&self) -> Result<(), RpcError>;
}

/// HTTP implementation of [`StateStore`].
pub struct HttpStateClient {
    client: reqwest::Client,
    base_url: String,
    secret: SecretString,
}

impl HttpStateClient {
    pub fn new(base_url: impl Into<String>, secret: SecretString) -> Self {
        let client = reqwest::Client::builder()
            .timeout(RPC_TIMEOUT)
            .build()
            .expect("reqwest client");
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Issue a request with bounded retry on transient failures.
    async fn request<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&serde_json::Value>,
        query: Option<&[(&str, String)]>,
    ) -> Result<T, RpcError> {
        let mut attempt = 0u32;
        loop {
            match self.request_once(method.clone(), path, body, query).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < MAX_RETRIES => {
                    let jitter = rand::thread_rng().gen_range(0..RETRY_BASE_MS);
                    let backoff = RETRY_BASE_MS * 2u64.pow(attempt) + jitter;
                    tracing::warn!(
                        endpoint = path,
                        attempt,
                        backoff_ms = backoff,
                        error = %e,
                        "transient RPC failure, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn request_once<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&serde_json::Value>,
        query: Option<&[(&str, String)]>,
    ) -> Result<T, RpcError> {
        let mut builder = self
            .client
            .request(method, self.url(path))
            .header(INTERNAL_SECRET_HEADER, self.secret.expose_secret());
        if let Some(body) = body {
            builder = builder.json(body);
        }
        if let Some(query) = query {
            builder = builder.query(query);
        }

        let response = builder.send().await.map_err(|e| RpcError::Transport {
            endpoint: path.to_string(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(RpcError::Status {
                endpoint: path.to_string(),
                status: status.as_u16(),
                detail,
            });
        }

        let bytes = response.bytes().await.map_err(|e| RpcError::Transport {
            endpoint: path.to_string(),
            reason: e.to_string(),
        })?;
        if bytes.is_empty() {
            // Endpoints with no payload deserialize into null.
            return serde_json::from_str("null").map_err(RpcError::Json);
        }
        serde_json::from_slice(&bytes).map_err(RpcError::Json)
    }
}

fn buckets_param(buckets: &[FollowupBucket]) -> String {
    buckets
        .iter()
        .map(|b| format!("{}-{}:{}", b.min_minutes, b.max_minutes, b.required_prior_count))
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl StateStore for HttpStateClient {
    async fn tenant_by_phone_number_id(
        &self,
        phone_number_id: &str,
    ) -> Result<Option<TenantBinding>, RpcError> {
        let path = format!("/tenants/by-phone-number-id/{phone_number_id}");
        match self
            .request::<TenantBinding>(reqwest::Method::GET, &path, None, None)
            .await
        {
            Ok(binding) => Ok(Some(binding)),
            Err(RpcError::Status { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn tenant_by_id(&self, tenant_id: Uuid) -> Result<TenantBinding, RpcError> {
        let path = format!("/tenants/{tenant_id}");
        match self
            .request::<TenantBinding>(reqwest::Method::GET, &path, None, None)
            .await
        {
            Err(RpcError::Status { status: 404, .. }) => Err(RpcError::NotFound {
                entity: format!("tenant {tenant_id}"),
            }),
            other => other,
        }
    }

    async fn conversation_by_phone(
        &self,
        tenant_id: Uuid,
        phone: &str,
        lead_name: Option<&str>,
    ) -> Result<Conversation, RpcError> {
        let mut query = vec![
            ("tenant", tenant_id.to_string()),
            ("phone", phone.to_string()),
        ];
        if let Some(name) = lead_name {
            query.push(("lead_name", name.to_string()));
        }
        self.request(
            reqwest::Method::GET,
            "/conversations/by-phone",
            None,
            Some(&query),
        )
        .await
    }

    async fn get_conversation(&self, id: Uuid) -> Result<Conversation, RpcError> {
        let path = format!("/conversations/{id}");
        match self
            .request::<Conversation>(reqwest::Method::GET, &path, None, None)
            .await
        {
            Err(RpcError::Status { status: 404, .. }) => Err(RpcError::NotFound {
                entity: format!("conversation {id}"),
            }),
            other => other,
        }
    }

    async fn patch_conversation(
        &self,
        id: Uuid,
        patch: &ConversationPatch,
    ) -> Result<Conversation, RpcError> {
        let path = format!("/conversations/{id}");
        let body = serde_json::to_value(patch)?;
        self.request(reqwest::Method::PATCH, &path, Some(&body), None)
            .await
    }

    async fn record_incoming(
        &self,
        conversation_id: Uuid,
        provider_message_id: &str,
        content: &str,
    ) -> Result<StoredMessage, RpcError> {
        let body = serde_json::json!({
            "conversation_id": conversation_id,
            "provider_message_id": provider_message_id,
            "content": content,
        });
        self.request(reqwest::Method::POST, "/messages/incoming", Some(&body), None)
            .await
    }

    async fn record_outgoing(
        &self,
        conversation_id: Uuid,
        origin: crate::enums::MessageOrigin,
        content: &str,
    ) -> Result<StoredMessage, RpcError> {
        let body = serde_json::json!({
            "conversation_id": conversation_id,
            "origin": origin,
            "content": content,
        });
        self.request(reqwest::Method::POST, "/messages/outgoing", Some(&body), None)
            .await
    }

    async fn last_messages(
        &self,
        conversation_id: Uuid,
        limit: u32,
    ) -> Result<Vec<StoredMessage>, RpcError> {
        let path = format!("/conversations/{conversation_id}/messages");
        let query = [("limit", limit.to_string())];
        self.request(reqwest::Method::GET, &path, None, Some(&query))
            .await
    }

    async fn available_ctas(&self, tenant_id: Uuid) -> Result<Vec<CtaOption>, RpcError> {
        let path = format!("/tenants/{tenant_id}/ctas");
        self.request(reqwest::Method::GET, &path, None, None).await
    }

    async fn due_followups(
        &self,
        now: DateTime<Utc>,
        buckets: &[FollowupBucket],
    ) -> Result<Vec<Conversation>, RpcError> {
        let query = [
            ("now", now.to_rfc3339()),
            ("buckets", buckets_param(buckets)),
        ];
        self.request(
            reqwest::Method::GET,
            "/conversations/due-followups",
            None,
            Some(&query),
        )
        .await
    }

    async fn increment_followup_count(&self, conversation_id: Uuid) -> Result<(), RpcError> {
        let path = format!("/conversations/{conversation_id}/increment-followup");
        self.request::<serde_json::Value>(reqwest::Method::POST, &path, None, None)
            .await?;
        Ok(())
    }

    async fn send_message(&self, send: &OutboundSend) -> Result<(), RpcError> {
        let body = serde_json::to_value(send)?;
        self.request::<serde_json::Value>(reqwest::Method::POST, "/messages/send", Some(&body), None)
            .await?;
        Ok(())
    }

    async fn emit_event(&self, event: &ObserverEvent) -> Result<(), RpcError> {
        let body = serde_json::to_value(event)?;
        self.request::<serde_json::Value>(reqwest::Method::POST, "/events", Some(&body), None)
            .await?;
        Ok(())
    }

    async fn reset_state(&self) -> Result<(), RpcError> {
        self.request::<serde_json::Value>(reqwest::Method::POST, "/admin/reset-state", None, None)
            .await?;
        Ok(())
    }
}
