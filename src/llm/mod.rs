//! LLM transport — single-shot chat completions with JSON extraction.
//!
//! One POST per call, 90 second timeout, zero retries. Callers never trust
//! the enums inside the returned JSON; those go through `crate::normalize`.

use async_trait::async_trait;
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;

use crate::error::LlmError;

/// Hard timeout for a single completion call.
pub const LLM_TIMEOUT: Duration = Duration::from_secs(90);

/// A chat message in the OpenAI wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

/// How strictly the completion content must parse as JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonMode {
    /// Top-level parse or error.
    Strict,
    /// Top-level parse, else balanced-brace extraction, else fenced block.
    Tolerant,
}

/// A completion request expecting a JSON object back.
#[derive(Debug, Clone)]
pub struct JsonCompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// OpenAI `response_format` payload, e.g. a `json_schema` envelope.
    pub response_format: Option<serde_json::Value>,
    pub mode: JsonMode,
    /// Step name for log lines ("generate", "memory").
    pub step: &'static str,
}

/// Parsed completion plus token accounting.
#[derive(Debug, Clone)]
pub struct JsonCompletion {
    pub value: serde_json::Value,
    pub total_tokens: u32,
}

/// Seam for the chat-completion transport. Mocked in pipeline tests.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete_json(&self, request: JsonCompletionRequest)
        -> Result<JsonCompletion, LlmError>;
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<&'a serde_json::Value>,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    total_tokens: u32,
}

// ── HTTP implementation ─────────────────────────────────────────────

/// OpenAI-compatible chat-completions client.
pub struct HttpChatModel {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: SecretString,
}

impl HttpChatModel {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, api_key: SecretString) -> Self {
        let client = reqwest::Client::builder()
            .timeout(LLM_TIMEOUT)
            .build()
            .expect("reqwest client");
        Self {
            client,
            base_url: base_url.into(),
            model: model.into(),
            api_key,
        }
    }
}

#[async_trait]
impl ChatModel for HttpChatModel {
    async fn complete_json(
        &self,
        request: JsonCompletionRequest,
    ) -> Result<JsonCompletion, LlmError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = WireRequest {
            model: &self.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: request.response_format.as_ref(),
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                detail,
            });
        }

        let wire: WireResponse = response
            .json()
            .await
            .map_err(|e| LlmError::RequestFailed(format!("decode: {e}")))?;

        let content = wire
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or(LlmError::EmptyResponse)?;

        let value = parse_completion(content, request.mode).ok_or_else(|| {
            tracing::warn!(step = request.step, "completion content is not parseable JSON");
            LlmError::Unparseable(truncate_for_log(content))
        })?;

        Ok(JsonCompletion {
            value,
            total_tokens: wire.usage.map(|u| u.total_tokens).unwrap_or(0),
        })
    }
}

// ── JSON extraction ─────────────────────────────────────────────────

/// Parse completion content into a JSON object per the requested mode.
pub fn parse_completion(content: &str, mode: JsonMode) -> Option<serde_json::Value> {
    let trimmed = content.trim();
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if value.is_object() {
            return Some(value);
        }
    }
    match mode {
        JsonMode::Strict => None,
        JsonMode::Tolerant => extract_json_object(trimmed),
    }
}

/// Pull the first JSON object out of free-form model output.
///
/// Order matters: a balanced `{…}` block first (handles prose-wrapped
/// output), then a fenced ```json code block.
pub fn extract_json_object(text: &str) -> Option<serde_json::Value> {
    static BRACE_RE: OnceLock<Regex> = OnceLock::new();
    static FENCE_RE: OnceLock<Regex> = OnceLock::new();

    let brace_re = BRACE_RE
        .get_or_init(|| Regex::new(r"\{[^{}]*(?:\{[^{}]*\}[^{}]*)*\}").expect("brace regex"));
    if let Some(m) = brace_re.find(text) {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(m.as_str()) {
            if value.is_object() {
                return Some(value);
            }
        }
    }

    let fence_re = FENCE_RE
        .get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("fence regex"));
    if let Some(caps) = fence_re.captures(text) {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&caps[1]) {
            if value.is_object() {
                return Some(value);
            }
        }
    }

    None
}

fn truncate_for_log(content: &str) -> String {
    content.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_accepts_plain_object() {
        let value = parse_completion(r#"{"action": "send_now"}"#, JsonMode::Strict).unwrap();
        assert_eq!(value["action"], "send_now");
    }

    #[test]
    fn strict_rejects_wrapped_object() {
        let raw = "Here you go: {\"action\": \"send_now\"}";
        assert!(parse_completion(raw, JsonMode::Strict).is_none());
    }

    #[test]
    fn strict_rejects_top_level_array() {
        assert!(parse_completion(r#"[{"a": 1}]"#, JsonMode::Strict).is_none());
    }

    #[test]
    fn tolerant_extracts_embedded_object() {
        let raw = "My analysis: {\"action\": \"wait_schedule\", \"confidence\": 0.4} done.";
        let value = parse_completion(raw, JsonMode::Tolerant).unwrap();
        assert_eq!(value["action"], "wait_schedule");
    }

    #[test]
    fn tolerant_extracts_nested_object() {
        let raw = r#"note {"risk_flags": {"spam_risk": "low"}, "action": "send_now"} end"#;
        let value = parse_completion(raw, JsonMode::Tolerant).unwrap();
        assert_eq!(value["risk_flags"]["spam_risk"], "low");
    }

    #[test]
    fn tolerant_extracts_fenced_block() {
        // The fence interior spans newlines, so the balanced-brace pass
        // already catches it; the fenced path covers odd fence spacing.
        let raw = "```json\n{\"updated_rolling_summary\": \"ok\"}\n```";
        let value = parse_completion(raw, JsonMode::Tolerant).unwrap();
        assert_eq!(value["updated_rolling_summary"], "ok");
    }

    #[test]
    fn tolerant_gives_up_on_prose() {
        assert!(parse_completion("no json here at all", JsonMode::Tolerant).is_none());
    }

    #[test]
    fn extraction_ignores_non_object_json() {
        assert!(extract_json_object("[1, 2, 3]").is_none());
    }
}
