//! Memory step — background rolling-summary compression.
//!
//! Runs after the user-visible action has been applied. Failure is
//! non-fatal: the prior summary is retained and the next turn re-summarizes.

use crate::llm::{ChatMessage, ChatModel, JsonCompletionRequest, JsonMode};
use crate::pipeline::prompts::{build_memory_user_prompt, MEMORY_SYSTEM_PROMPT};
use crate::pipeline::types::{GenerateOutput, MemoryOutput};

const MEMORY_TEMPERATURE: f32 = 0.7;
const MEMORY_MAX_TOKENS: u32 = 2000;

fn memory_response_format() -> serde_json::Value {
    serde_json::json!({
        "type": "json_schema",
        "json_schema": {
            "name": "memory_output",
            "strict": false,
            "schema": {
                "type": "object",
                "properties": {
                    "updated_rolling_summary": { "type": "string" },
                    "needs_recursive_summary": { "type": "boolean" }
                }
            }
        }
    })
}

/// Produce an updated rolling summary for the completed turn.
///
/// On any failure the prior summary is kept (`"No summary available"` when
/// there was none), with `needs_recursive_summary` false.
pub async fn run_memory(
    chat: &dyn ChatModel,
    rolling_summary: &str,
    user_message: &str,
    generate: &GenerateOutput,
) -> MemoryOutput {
    let prompt = build_memory_user_prompt(rolling_summary, user_message, generate);
    let request = JsonCompletionRequest {
        messages: vec![
            ChatMessage::system(MEMORY_SYSTEM_PROMPT),
            ChatMessage::user(prompt),
        ],
        temperature: MEMORY_TEMPERATURE,
        max_tokens: Some(MEMORY_MAX_TOKENS),
        response_format: Some(memory_response_format()),
        mode: JsonMode::Tolerant,
        step: "memory",
    };

    match chat.complete_json(request).await {
        Ok(completion) => {
            let updated = completion
                .value
                .get("updated_rolling_summary")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            if updated.is_empty() {
                return retained(rolling_summary);
            }
            MemoryOutput {
                updated_rolling_summary: updated.to_string(),
                needs_recursive_summary: completion
                    .value
                    .get("needs_recursive_summary")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false),
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "memory step failed, retaining prior summary");
            retained(rolling_summary)
        }
    }
}

fn retained(rolling_summary: &str) -> MemoryOutput {
    MemoryOutput {
        updated_rolling_summary: if rolling_summary.is_empty() {
            "No summary available".to_string()
        } else {
            rolling_summary.to_string()
        },
        needs_recursive_summary: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::*;
    use crate::error::LlmError;
    use crate::llm::JsonCompletion;
    use async_trait::async_trait;

    struct StubChat {
        response: Result<serde_json::Value, ()>,
    }

    #[async_trait]
    impl ChatModel for StubChat {
        async fn complete_json(
            &self,
            _request: JsonCompletionRequest,
        ) -> Result<JsonCompletion, LlmError> {
            match &self.response {
                Ok(value) => Ok(JsonCompletion {
                    value: value.clone(),
                    total_tokens: 42,
                }),
                Err(()) => Err(LlmError::RequestFailed("boom".into())),
            }
        }
    }

    fn sample_generate() -> GenerateOutput {
        GenerateOutput {
            thought_process: String::new(),
            intent_level: IntentLevel::High,
            user_sentiment: UserSentiment::Curious,
            risk_flags: Default::default(),
            action: DecisionAction::SendNow,
            new_stage: ConversationStage::Pricing,
            should_respond: true,
            selected_cta_id: None,
            cta_scheduled_at: None,
            followup_in_minutes: 0,
            followup_reason: String::new(),
            message_text: "Plans start at $20/h.".into(),
            message_language: "en".into(),
            confidence: 0.9,
            needs_human_attention: false,
        }
    }

    #[tokio::test]
    async fn summary_updates_on_success() {
        let chat = StubChat {
            response: Ok(serde_json::json!({
                "updated_rolling_summary": "Lead asked for pricing; quoted $20/h.",
                "needs_recursive_summary": true,
            })),
        };
        let out = run_memory(&chat, "old summary", "price?", &sample_generate()).await;
        assert_eq!(out.updated_rolling_summary, "Lead asked for pricing; quoted $20/h.");
        assert!(out.needs_recursive_summary);
    }

    #[tokio::test]
    async fn failure_retains_prior_summary() {
        let chat = StubChat { response: Err(()) };
        let out = run_memory(&chat, "old summary", "price?", &sample_generate()).await;
        assert_eq!(out.updated_rolling_summary, "old summary");
        assert!(!out.needs_recursive_summary);
    }

    #[tokio::test]
    async fn failure_with_no_prior_summary() {
        let chat = StubChat { response: Err(()) };
        let out = run_memory(&chat, "", "hi", &sample_generate()).await;
        assert_eq!(out.updated_rolling_summary, "No summary available");
    }

    #[tokio::test]
    async fn empty_model_summary_is_treated_as_failure() {
        let chat = StubChat {
            response: Ok(serde_json::json!({ "updated_rolling_summary": "" })),
        };
        let out = run_memory(&chat, "keep me", "hi", &sample_generate()).await;
        assert_eq!(out.updated_rolling_summary, "keep me");
    }
}
