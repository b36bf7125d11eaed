//! DTOs for the internal state-store RPC.
//!
//! The core manipulates opaque ids and snapshots; entity ownership and
//! persistence live on the RPC server side.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::enums::{
    ConversationMode, ConversationStage, IntentLevel, MessageOrigin, UserSentiment,
};

/// Tenant resolved from a provider phone-number-id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantBinding {
    pub tenant_id: Uuid,
    pub business_name: String,
    #[serde(default)]
    pub business_description: String,
    #[serde(default)]
    pub flow_prompt: String,
    #[serde(default = "default_language")]
    pub language_pref: String,
}

fn default_language() -> String {
    "en".to_string()
}

/// Conversation snapshot as served by the state store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub lead_id: Uuid,
    pub lead_phone: String,
    #[serde(default)]
    pub mode: ConversationMode,
    pub stage: ConversationStage,
    #[serde(default)]
    pub intent_level: IntentLevel,
    #[serde(default)]
    pub user_sentiment: UserSentiment,
    #[serde(default)]
    pub rolling_summary: String,
    pub last_user_message_at: Option<DateTime<Utc>>,
    pub last_bot_message_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub followup_count_24h: u32,
    #[serde(default)]
    pub total_nudges: u32,
    #[serde(default)]
    pub needs_human_attention: bool,
    #[serde(default)]
    pub active_cta_id: Option<Uuid>,
}

/// Partial conversation update; absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConversationPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<ConversationStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent_level: Option<IntentLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_sentiment: Option<UserSentiment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<ConversationMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rolling_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub needs_human_attention: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_cta_id: Option<Uuid>,
}

impl ConversationPatch {
    pub fn is_empty(&self) -> bool {
        serde_json::to_value(self)
            .map(|v| v.as_object().map(|o| o.is_empty()).unwrap_or(true))
            .unwrap_or(true)
    }
}

/// A stored message returned for pipeline context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: Uuid,
    pub origin: MessageOrigin,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A CTA the tenant has configured in the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CtaOption {
    pub id: Uuid,
    pub name: String,
}

/// Outbound send request; provider formatting and session-window rules
/// are owned by the RPC server.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundSend {
    pub tenant_id: Uuid,
    pub to_phone: String,
    pub text: String,
}

/// Observer event type fanned out to the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObserverEventType {
    ConversationUpdated,
    ActionHumanAttentionRequired,
    ActionConversationsFlagged,
}

/// Observer event payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObserverEvent {
    pub event: ObserverEventType,
    pub conversation_id: Uuid,
    pub tenant_id: Uuid,
    pub stage: ConversationStage,
    pub intent_level: IntentLevel,
    pub sentiment: UserSentiment,
    pub needs_human_attention: bool,
}

impl ObserverEvent {
    /// Build an event from the current conversation snapshot.
    pub fn for_conversation(event: ObserverEventType, conversation: &Conversation) -> Self {
        Self {
            event,
            conversation_id: conversation.id,
            tenant_id: conversation.tenant_id,
            stage: conversation.stage,
            intent_level: conversation.intent_level,
            sentiment: conversation.user_sentiment,
            needs_human_attention: conversation.needs_human_attention,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_skips_absent_fields() {
        let patch = ConversationPatch {
            stage: Some(ConversationStage::Pricing),
            needs_human_attention: Some(true),
            ..Default::default()
        };
        let json = serde_json::to_value(&patch).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 2);
        assert_eq!(json["stage"], "pricing");
        assert_eq!(json["needs_human_attention"], true);
    }

    #[test]
    fn empty_patch_detected() {
        assert!(ConversationPatch::default().is_empty());
        assert!(!ConversationPatch {
            rolling_summary: Some("x".into()),
            ..Default::default()
        }
        .is_empty());
    }

    #[test]
    fn observer_event_types_are_screaming_snake() {
        let json = serde_json::to_string(&ObserverEventType::ActionHumanAttentionRequired).unwrap();
        assert_eq!(json, "\"ACTION_HUMAN_ATTENTION_REQUIRED\"");
        let json = serde_json::to_string(&ObserverEventType::ConversationUpdated).unwrap();
        assert_eq!(json, "\"CONVERSATION_UPDATED\"");
    }

    #[test]
    fn conversation_deserializes_with_defaults() {
        let raw = serde_json::json!({
            "id": Uuid::new_v4(),
            "tenant_id": Uuid::new_v4(),
            "lead_id": Uuid::new_v4(),
            "lead_phone": "15551234",
            "stage": "greeting",
            "last_user_message_at": null,
            "last_bot_message_at": null,
        });
        let conv: Conversation = serde_json::from_value(raw).unwrap();
        assert_eq!(conv.mode, ConversationMode::Bot);
        assert_eq!(conv.intent_level, IntentLevel::Unknown);
        assert_eq!(conv.followup_count_24h, 0);
        assert!(!conv.needs_human_attention);
    }
}
