//! Closed conversation enums.
//!
//! Every LLM-origin string enters these types through `crate::normalize`
//! only; downstream code never branches on raw strings.

use serde::{Deserialize, Serialize};

/// Funnel stage of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStage {
    Greeting,
    Qualification,
    Pricing,
    Cta,
    Followup,
    Closed,
    Lost,
    Ghosted,
}

impl ConversationStage {
    pub const ALL: [ConversationStage; 8] = [
        Self::Greeting,
        Self::Qualification,
        Self::Pricing,
        Self::Cta,
        Self::Followup,
        Self::Closed,
        Self::Lost,
        Self::Ghosted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::Qualification => "qualification",
            Self::Pricing => "pricing",
            Self::Cta => "cta",
            Self::Followup => "followup",
            Self::Closed => "closed",
            Self::Lost => "lost",
            Self::Ghosted => "ghosted",
        }
    }

    /// Terminal stages end the conversation lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Lost | Self::Ghosted)
    }
}

/// How strongly the lead signals buying intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IntentLevel {
    Low,
    Medium,
    High,
    VeryHigh,
    #[default]
    Unknown,
}

impl IntentLevel {
    pub const ALL: [IntentLevel; 5] = [
        Self::Low,
        Self::Medium,
        Self::High,
        Self::VeryHigh,
        Self::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::VeryHigh => "very_high",
            Self::Unknown => "unknown",
        }
    }
}

/// Lead's emotional read as inferred by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UserSentiment {
    #[default]
    Neutral,
    Curious,
    Annoyed,
    Distrustful,
    Confused,
    Disappointed,
    Uninterested,
}

impl UserSentiment {
    pub const ALL: [UserSentiment; 7] = [
        Self::Neutral,
        Self::Curious,
        Self::Annoyed,
        Self::Distrustful,
        Self::Confused,
        Self::Disappointed,
        Self::Uninterested,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Neutral => "neutral",
            Self::Curious => "curious",
            Self::Annoyed => "annoyed",
            Self::Distrustful => "distrustful",
            Self::Confused => "confused",
            Self::Disappointed => "disappointed",
            Self::Uninterested => "uninterested",
        }
    }
}

/// What the pipeline decided to do this turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    SendNow,
    #[default]
    WaitSchedule,
    FlagAttention,
    InitiateCta,
}

impl DecisionAction {
    pub const ALL: [DecisionAction; 4] = [
        Self::SendNow,
        Self::WaitSchedule,
        Self::FlagAttention,
        Self::InitiateCta,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendNow => "send_now",
            Self::WaitSchedule => "wait_schedule",
            Self::FlagAttention => "flag_attention",
            Self::InitiateCta => "initiate_cta",
        }
    }
}

/// Guardrail severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 3] = [Self::Low, Self::Medium, Self::High];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Who currently drives a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConversationMode {
    #[default]
    Bot,
    Human,
}

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageOrigin {
    Lead,
    Bot,
    Human,
}

impl MessageOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lead => "lead",
            Self::Bot => "bot",
            Self::Human => "human",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_uses_snake_case() {
        assert_eq!(
            serde_json::to_string(&IntentLevel::VeryHigh).unwrap(),
            "\"very_high\""
        );
        assert_eq!(
            serde_json::to_string(&DecisionAction::FlagAttention).unwrap(),
            "\"flag_attention\""
        );
        let stage: ConversationStage = serde_json::from_str("\"qualification\"").unwrap();
        assert_eq!(stage, ConversationStage::Qualification);
    }

    #[test]
    fn as_str_round_trips_through_serde() {
        for stage in ConversationStage::ALL {
            let json = serde_json::to_string(&stage).unwrap();
            assert_eq!(json, format!("\"{}\"", stage.as_str()));
        }
        for action in DecisionAction::ALL {
            let json = serde_json::to_string(&action).unwrap();
            assert_eq!(json, format!("\"{}\"", action.as_str()));
        }
    }

    #[test]
    fn terminal_stages() {
        assert!(ConversationStage::Closed.is_terminal());
        assert!(ConversationStage::Ghosted.is_terminal());
        assert!(!ConversationStage::Followup.is_terminal());
    }

    #[test]
    fn defaults_match_pipeline_fallbacks() {
        assert_eq!(IntentLevel::default(), IntentLevel::Unknown);
        assert_eq!(UserSentiment::default(), UserSentiment::Neutral);
        assert_eq!(DecisionAction::default(), DecisionAction::WaitSchedule);
        assert_eq!(RiskLevel::default(), RiskLevel::Low);
    }
}
