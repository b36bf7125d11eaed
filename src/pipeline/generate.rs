//! Generate step — one strict-JSON decision + message call.

use std::time::Instant;

use crate::enums::DecisionAction;
use crate::llm::{ChatMessage, ChatModel, JsonCompletionRequest, JsonMode};
use crate::normalize;
use crate::pipeline::prompts::{build_generate_user_prompt, GENERATE_SYSTEM_PROMPT};
use crate::pipeline::types::{GenerateOutput, PipelineInput, RiskFlags};

const GENERATE_TEMPERATURE: f32 = 0.3;

fn generate_response_format() -> serde_json::Value {
    serde_json::json!({
        "type": "json_schema",
        "json_schema": {
            "name": "generate_output",
            "strict": true,
            "schema": { "type": "object" }
        }
    })
}

/// Run the generate step. Never fails: transport or parse errors produce
/// the step-level fallback (silent turn, human attention flagged).
pub async fn run_generate(
    chat: &dyn ChatModel,
    input: &PipelineInput,
) -> (GenerateOutput, u64, u32) {
    let prompt = build_generate_user_prompt(input);
    let start = Instant::now();

    let request = JsonCompletionRequest {
        messages: vec![
            ChatMessage::system(GENERATE_SYSTEM_PROMPT),
            ChatMessage::user(prompt),
        ],
        temperature: GENERATE_TEMPERATURE,
        max_tokens: None,
        response_format: Some(generate_response_format()),
        mode: JsonMode::Strict,
        step: "generate",
    };

    match chat.complete_json(request).await {
        Ok(completion) => {
            let output = validate_and_build(&completion.value, input);
            (
                output,
                start.elapsed().as_millis() as u64,
                completion.total_tokens,
            )
        }
        Err(e) => {
            tracing::error!(error = %e, "generate step failed, using fallback output");
            (fallback_output(input), start.elapsed().as_millis() as u64, 0)
        }
    }
}

/// Fallback when the model call itself fails: hold position, stay silent,
/// flag a human.
pub fn fallback_output(input: &PipelineInput) -> GenerateOutput {
    GenerateOutput {
        thought_process: "System Error - Fallback triggered".into(),
        intent_level: input.intent_level,
        user_sentiment: input.user_sentiment,
        risk_flags: RiskFlags::default(),
        action: DecisionAction::WaitSchedule,
        new_stage: input.conversation_stage,
        should_respond: false,
        selected_cta_id: None,
        cta_scheduled_at: None,
        followup_in_minutes: 0,
        followup_reason: String::new(),
        message_text: String::new(),
        message_language: "en".into(),
        confidence: 0.0,
        needs_human_attention: true,
    }
}

fn str_field(data: &serde_json::Value, key: &str) -> String {
    data.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

fn opt_str_field(data: &serde_json::Value, key: &str) -> Option<String> {
    data.get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Build a validated output from whatever JSON the model produced.
/// Missing fields fill with defaults; enums go through the normalizer.
pub fn validate_and_build(data: &serde_json::Value, input: &PipelineInput) -> GenerateOutput {
    let risk = data.get("risk_flags").cloned().unwrap_or_default();

    let mut message_language = str_field(data, "message_language");
    if message_language.is_empty() {
        message_language = "en".into();
    }

    GenerateOutput {
        thought_process: str_field(data, "thought_process"),
        intent_level: normalize::normalize_intent(
            &str_field(data, "intent_level"),
            crate::enums::IntentLevel::Unknown,
        ),
        user_sentiment: normalize::normalize_sentiment(
            &str_field(data, "user_sentiment"),
            crate::enums::UserSentiment::Neutral,
        ),
        risk_flags: RiskFlags {
            spam_risk: normalize::normalize_risk(&str_field(&risk, "spam_risk"), Default::default()),
            policy_risk: normalize::normalize_risk(
                &str_field(&risk, "policy_risk"),
                Default::default(),
            ),
            hallucination_risk: normalize::normalize_risk(
                &str_field(&risk, "hallucination_risk"),
                Default::default(),
            ),
        },
        action: normalize::normalize_action(&str_field(data, "action"), DecisionAction::WaitSchedule),
        new_stage: normalize::normalize_stage(
            &str_field(data, "new_stage"),
            input.conversation_stage,
        ),
        should_respond: data
            .get("should_respond")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
        selected_cta_id: opt_str_field(data, "selected_cta_id"),
        cta_scheduled_at: opt_str_field(data, "cta_scheduled_at"),
        followup_in_minutes: data
            .get("followup_in_minutes")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32,
        followup_reason: str_field(data, "followup_reason"),
        message_text: str_field(data, "message_text"),
        message_language,
        confidence: data
            .get("confidence")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.5)
            .clamp(0.0, 1.0),
        needs_human_attention: data
            .get("needs_human_attention")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::*;
    use crate::pipeline::types::{NudgeContext, TimingContext};
    use chrono::Utc;
    use uuid::Uuid;

    fn input_at(stage: ConversationStage) -> PipelineInput {
        PipelineInput {
            tenant_id: Uuid::new_v4(),
            business_name: "Acme".into(),
            business_description: String::new(),
            flow_prompt: String::new(),
            available_ctas: vec![],
            rolling_summary: String::new(),
            last_messages: vec![],
            conversation_stage: stage,
            conversation_mode: ConversationMode::Bot,
            intent_level: IntentLevel::Medium,
            user_sentiment: UserSentiment::Curious,
            active_cta_id: None,
            timing: TimingContext::compute(Utc::now(), None, None),
            nudges: NudgeContext::default(),
            max_words: 60,
            questions_per_message: 1,
            language_pref: "en".into(),
            knowledge_context: None,
        }
    }

    #[test]
    fn full_payload_builds_cleanly() {
        let data = serde_json::json!({
            "thought_process": "price question, answer directly",
            "intent_level": "high",
            "user_sentiment": "curious",
            "risk_flags": {"spam_risk": "low", "policy_risk": "low", "hallucination_risk": "medium"},
            "action": "send_now",
            "new_stage": "pricing",
            "should_respond": true,
            "followup_in_minutes": 0,
            "message_text": "Plans start at $20/h.",
            "message_language": "en",
            "confidence": 0.92,
            "needs_human_attention": false,
        });
        let out = validate_and_build(&data, &input_at(ConversationStage::Greeting));
        assert_eq!(out.action, DecisionAction::SendNow);
        assert_eq!(out.new_stage, ConversationStage::Pricing);
        assert_eq!(out.risk_flags.hallucination_risk, RiskLevel::Medium);
        assert!(out.should_respond);
        assert!((out.confidence - 0.92).abs() < 1e-9);
    }

    #[test]
    fn enum_drift_is_normalized() {
        let data = serde_json::json!({
            "action": "handoff",
            "new_stage": "qualifying",
            "should_respond": false,
        });
        let out = validate_and_build(&data, &input_at(ConversationStage::Greeting));
        assert_eq!(out.action, DecisionAction::FlagAttention);
        assert_eq!(out.new_stage, ConversationStage::Qualification);
    }

    #[test]
    fn missing_fields_fill_defaults() {
        let data = serde_json::json!({});
        let input = input_at(ConversationStage::Cta);
        let out = validate_and_build(&data, &input);
        assert_eq!(out.intent_level, IntentLevel::Unknown);
        assert_eq!(out.user_sentiment, UserSentiment::Neutral);
        assert_eq!(out.action, DecisionAction::WaitSchedule);
        assert_eq!(out.new_stage, ConversationStage::Cta);
        assert_eq!(out.risk_flags.spam_risk, RiskLevel::Low);
        assert!(!out.should_respond);
        assert!((out.confidence - 0.5).abs() < 1e-9);
        assert_eq!(out.message_language, "en");
        assert!(!out.needs_human_attention);
    }

    #[test]
    fn confidence_is_clamped() {
        let data = serde_json::json!({"confidence": 3.5});
        let out = validate_and_build(&data, &input_at(ConversationStage::Greeting));
        assert_eq!(out.confidence, 1.0);
        let data = serde_json::json!({"confidence": -1.0});
        let out = validate_and_build(&data, &input_at(ConversationStage::Greeting));
        assert_eq!(out.confidence, 0.0);
    }

    #[test]
    fn empty_cta_id_becomes_none() {
        let data = serde_json::json!({"selected_cta_id": ""});
        let out = validate_and_build(&data, &input_at(ConversationStage::Greeting));
        assert!(out.selected_cta_id.is_none());
    }

    #[test]
    fn fallback_holds_position() {
        let input = input_at(ConversationStage::Pricing);
        let out = fallback_output(&input);
        assert_eq!(out.new_stage, ConversationStage::Pricing);
        assert_eq!(out.action, DecisionAction::WaitSchedule);
        assert!(!out.should_respond);
        assert!(out.needs_human_attention);
        assert_eq!(out.confidence, 0.0);
        assert!(out.message_text.is_empty());
    }
}
