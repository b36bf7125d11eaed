//! Fuzzy enum normalization for LLM output.
//!
//! The model is asked for exact snake_case values but drifts: "qualifying",
//! "handoff", "Very-High". This module is the only place such strings are
//! trusted into the closed enums: lowercase/trim/underscore, then an alias
//! table, then a longest-common-subsequence fallback (length ≥ 3), then the
//! caller-supplied default. Every correction and fallback is logged.

use tracing::warn;

use crate::enums::{ConversationStage, DecisionAction, IntentLevel, RiskLevel, UserSentiment};

/// Known drift forms observed in production transcripts.
const ALIASES: &[(&str, &str)] = &[
    ("qualifying", "qualification"),
    ("qualified", "qualification"),
    ("qualify", "qualification"),
    ("greet", "greeting"),
    ("price", "pricing"),
    ("close", "closed"),
    ("followups", "followup"),
    ("follow_up", "followup"),
    ("ghost", "ghosted"),
    ("send", "send_now"),
    ("wait", "wait_schedule"),
    ("schedule", "wait_schedule"),
    ("handoff", "flag_attention"),
    ("escalate", "flag_attention"),
    ("handoff_human", "flag_attention"),
    ("veryhigh", "very_high"),
    ("positive", "curious"),
    ("negative", "annoyed"),
    ("frustrated", "annoyed"),
];

/// Canonicalize case/separators and apply the alias table.
fn canonicalize(value: &str) -> String {
    let v = value.trim().to_lowercase().replace(['-', ' '], "_");
    for (alias, target) in ALIASES {
        if v == *alias {
            return (*target).to_string();
        }
    }
    v
}

/// Longest common subsequence length between two byte strings.
fn lcs(a: &str, b: &str) -> usize {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    let (m, n) = (a.len(), b.len());
    let mut dp = vec![vec![0usize; n + 1]; m + 1];
    for i in 1..=m {
        for j in 1..=n {
            dp[i][j] = if a[i - 1] == b[j - 1] {
                dp[i - 1][j - 1] + 1
            } else {
                dp[i - 1][j].max(dp[i][j - 1])
            };
        }
    }
    dp[m][n]
}

/// Closest valid value by LCS, accepted only when the overlap is ≥ 3.
fn closest<'a>(input: &str, valid: &[&'a str]) -> Option<&'a str> {
    let mut best: Option<&str> = None;
    let mut best_score = 0usize;
    for candidate in valid {
        let score = lcs(input, candidate);
        if score > best_score {
            best_score = score;
            best = Some(candidate);
        }
    }
    if best_score >= 3 {
        best
    } else {
        None
    }
}

fn normalize_with_fallback<T: Copy>(
    field: &str,
    value: &str,
    valid: &[(&str, T)],
    default: T,
) -> T {
    if value.is_empty() || value == "null" {
        return default;
    }
    let normalized = canonicalize(value);
    if let Some((_, parsed)) = valid.iter().find(|(name, _)| *name == normalized) {
        if normalized != value {
            warn!(field, raw = value, accepted = %normalized, "enum correction");
        }
        return *parsed;
    }
    let names: Vec<&str> = valid.iter().map(|(name, _)| *name).collect();
    if let Some(matched) = closest(&normalized, &names) {
        warn!(field, raw = value, accepted = matched, "enum correction");
        return valid.iter().find(|(name, _)| *name == matched).unwrap().1;
    }
    warn!(field, raw = value, "enum fallback to default");
    default
}

pub fn normalize_stage(value: &str, default: ConversationStage) -> ConversationStage {
    let valid: Vec<(&str, ConversationStage)> =
        ConversationStage::ALL.iter().map(|s| (s.as_str(), *s)).collect();
    normalize_with_fallback("new_stage", value, &valid, default)
}

pub fn normalize_action(value: &str, default: DecisionAction) -> DecisionAction {
    let valid: Vec<(&str, DecisionAction)> =
        DecisionAction::ALL.iter().map(|a| (a.as_str(), *a)).collect();
    normalize_with_fallback("action", value, &valid, default)
}

pub fn normalize_intent(value: &str, default: IntentLevel) -> IntentLevel {
    let valid: Vec<(&str, IntentLevel)> =
        IntentLevel::ALL.iter().map(|i| (i.as_str(), *i)).collect();
    normalize_with_fallback("intent_level", value, &valid, default)
}

pub fn normalize_sentiment(value: &str, default: UserSentiment) -> UserSentiment {
    let valid: Vec<(&str, UserSentiment)> =
        UserSentiment::ALL.iter().map(|s| (s.as_str(), *s)).collect();
    normalize_with_fallback("user_sentiment", value, &valid, default)
}

pub fn normalize_risk(value: &str, default: RiskLevel) -> RiskLevel {
    let valid: Vec<(&str, RiskLevel)> =
        RiskLevel::ALL.iter().map(|r| (r.as_str(), *r)).collect();
    normalize_with_fallback("risk", value, &valid, default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_values_pass_through() {
        assert_eq!(
            normalize_stage("pricing", ConversationStage::Greeting),
            ConversationStage::Pricing
        );
        assert_eq!(
            normalize_action("send_now", DecisionAction::WaitSchedule),
            DecisionAction::SendNow
        );
    }

    #[test]
    fn case_and_separator_drift_is_canonicalized() {
        assert_eq!(
            normalize_intent("Very-High", IntentLevel::Unknown),
            IntentLevel::VeryHigh
        );
        assert_eq!(
            normalize_action("WAIT SCHEDULE", DecisionAction::SendNow),
            DecisionAction::WaitSchedule
        );
    }

    #[test]
    fn alias_table_maps_known_drift() {
        assert_eq!(
            normalize_stage("qualifying", ConversationStage::Greeting),
            ConversationStage::Qualification
        );
        assert_eq!(
            normalize_action("handoff", DecisionAction::WaitSchedule),
            DecisionAction::FlagAttention
        );
        assert_eq!(
            normalize_action("escalate", DecisionAction::WaitSchedule),
            DecisionAction::FlagAttention
        );
        assert_eq!(
            normalize_sentiment("positive", UserSentiment::Neutral),
            UserSentiment::Curious
        );
        assert_eq!(
            normalize_sentiment("frustrated", UserSentiment::Neutral),
            UserSentiment::Annoyed
        );
        // "follow-up" hits the separator rewrite first, then the alias table.
        assert_eq!(
            normalize_stage("follow-up", ConversationStage::Greeting),
            ConversationStage::Followup
        );
    }

    #[test]
    fn lcs_fallback_recovers_typos() {
        // "pricng" shares an LCS of 6 with "pricing".
        assert_eq!(
            normalize_stage("pricng", ConversationStage::Greeting),
            ConversationStage::Pricing
        );
        assert_eq!(
            normalize_intent("hgih", IntentLevel::Unknown),
            IntentLevel::High
        );
    }

    #[test]
    fn garbage_falls_back_to_default() {
        assert_eq!(
            normalize_stage("zz", ConversationStage::Cta),
            ConversationStage::Cta
        );
        assert_eq!(normalize_risk("??", RiskLevel::Low), RiskLevel::Low);
    }

    #[test]
    fn empty_and_null_return_default() {
        assert_eq!(
            normalize_stage("", ConversationStage::Followup),
            ConversationStage::Followup
        );
        assert_eq!(
            normalize_action("null", DecisionAction::WaitSchedule),
            DecisionAction::WaitSchedule
        );
    }

    #[test]
    fn lcs_is_a_subsequence_length() {
        assert_eq!(lcs("abcde", "ace"), 3);
        assert_eq!(lcs("", "abc"), 0);
        assert_eq!(lcs("same", "same"), 4);
    }
}
