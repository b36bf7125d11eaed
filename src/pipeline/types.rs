//! Ephemeral pipeline types.
//!
//! `PipelineInput` is assembled per invocation and never persisted;
//! `GenerateOutput` is persisted indirectly through the action applier.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::enums::{
    ConversationMode, ConversationStage, DecisionAction, IntentLevel, RiskLevel, UserSentiment,
};
use crate::rpc::CtaOption;

/// One message of recent context, oldest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageContext {
    pub sender: String,
    pub text: String,
    pub timestamp: String,
}

/// Timing facts the model reasons about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingContext {
    pub now: DateTime<Utc>,
    pub last_user_message_at: Option<DateTime<Utc>>,
    pub last_bot_message_at: Option<DateTime<Utc>>,
    /// Whether the provider's 24-hour free-form session window is open.
    pub window_open: bool,
}

impl TimingContext {
    /// Compute the session window from the last user message: open while
    /// `last_user_message_at + 24h` is in the future.
    pub fn compute(
        now: DateTime<Utc>,
        last_user_message_at: Option<DateTime<Utc>>,
        last_bot_message_at: Option<DateTime<Utc>>,
    ) -> Self {
        let window_open = last_user_message_at
            .map(|t| now < t + Duration::hours(24))
            .unwrap_or(false);
        Self {
            now,
            last_user_message_at,
            last_bot_message_at,
            window_open,
        }
    }
}

/// Nudge counters carried into the prompt.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct NudgeContext {
    pub followup_count_24h: u32,
    pub total_nudges: u32,
}

/// Everything the generate step needs, assembled per invocation.
#[derive(Debug, Clone)]
pub struct PipelineInput {
    pub tenant_id: Uuid,
    pub business_name: String,
    pub business_description: String,
    pub flow_prompt: String,
    pub available_ctas: Vec<CtaOption>,
    pub rolling_summary: String,
    pub last_messages: Vec<MessageContext>,
    pub conversation_stage: ConversationStage,
    pub conversation_mode: ConversationMode,
    pub intent_level: IntentLevel,
    pub user_sentiment: UserSentiment,
    pub active_cta_id: Option<Uuid>,
    pub timing: TimingContext,
    pub nudges: NudgeContext,
    pub max_words: u32,
    pub questions_per_message: u32,
    pub language_pref: String,
    /// Retrieved knowledge block, attached by the retrieve stage.
    pub knowledge_context: Option<String>,
}

/// Guardrail flags from the model.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RiskFlags {
    pub spam_risk: RiskLevel,
    pub policy_risk: RiskLevel,
    pub hallucination_risk: RiskLevel,
}

/// Validated decision + message artifact. Every enum field is guaranteed
/// to hold a closed-set value regardless of what the model emitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateOutput {
    pub thought_process: String,
    pub intent_level: IntentLevel,
    pub user_sentiment: UserSentiment,
    pub risk_flags: RiskFlags,
    pub action: DecisionAction,
    pub new_stage: ConversationStage,
    pub should_respond: bool,
    /// CTA id as emitted by the model; parsed to a Uuid at apply time.
    pub selected_cta_id: Option<String>,
    pub cta_scheduled_at: Option<String>,
    pub followup_in_minutes: u32,
    pub followup_reason: String,
    pub message_text: String,
    pub message_language: String,
    pub confidence: f64,
    pub needs_human_attention: bool,
}

/// Rolling-summary update from the background memory step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryOutput {
    pub updated_rolling_summary: String,
    pub needs_recursive_summary: bool,
}

/// Full pipeline result handed to the action applier.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub generate: GenerateOutput,
    pub pipeline_latency_ms: u64,
    pub total_tokens_used: u32,
    pub needs_background_summary: bool,
}

impl PipelineResult {
    pub fn should_send_message(&self) -> bool {
        self.generate.should_respond
            && !self.generate.message_text.is_empty()
            && self.generate.action == DecisionAction::SendNow
    }

    pub fn should_schedule_followup(&self) -> bool {
        self.generate.action == DecisionAction::WaitSchedule
    }

    pub fn should_escalate(&self) -> bool {
        self.generate.needs_human_attention
            || self.generate.action == DecisionAction::FlagAttention
    }

    pub fn should_initiate_cta(&self) -> bool {
        self.generate.action == DecisionAction::InitiateCta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(action: DecisionAction, should_respond: bool, text: &str) -> PipelineResult {
        PipelineResult {
            generate: GenerateOutput {
                thought_process: String::new(),
                intent_level: IntentLevel::Unknown,
                user_sentiment: UserSentiment::Neutral,
                risk_flags: RiskFlags::default(),
                action,
                new_stage: ConversationStage::Greeting,
                should_respond,
                selected_cta_id: None,
                cta_scheduled_at: None,
                followup_in_minutes: 0,
                followup_reason: String::new(),
                message_text: text.to_string(),
                message_language: "en".into(),
                confidence: 0.8,
                needs_human_attention: false,
            },
            pipeline_latency_ms: 0,
            total_tokens_used: 0,
            needs_background_summary: true,
        }
    }

    #[test]
    fn send_requires_text_and_send_now() {
        assert!(output(DecisionAction::SendNow, true, "hi").should_send_message());
        assert!(!output(DecisionAction::SendNow, true, "").should_send_message());
        assert!(!output(DecisionAction::SendNow, false, "hi").should_send_message());
        assert!(!output(DecisionAction::WaitSchedule, true, "hi").should_send_message());
    }

    #[test]
    fn escalation_from_action_or_flag() {
        assert!(output(DecisionAction::FlagAttention, false, "").should_escalate());
        let mut flagged = output(DecisionAction::SendNow, true, "hi");
        flagged.generate.needs_human_attention = true;
        assert!(flagged.should_escalate());
        assert!(!output(DecisionAction::SendNow, true, "hi").should_escalate());
    }

    #[test]
    fn window_open_within_24_hours() {
        let now = Utc::now();
        let timing = TimingContext::compute(now, Some(now - Duration::hours(23)), None);
        assert!(timing.window_open);
        let timing = TimingContext::compute(now, Some(now - Duration::hours(25)), None);
        assert!(!timing.window_open);
        let timing = TimingContext::compute(now, None, None);
        assert!(!timing.window_open);
    }
}
