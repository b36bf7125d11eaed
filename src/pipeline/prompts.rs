//! Prompt construction for the generate and memory steps.

use crate::pipeline::types::{GenerateOutput, MessageContext, PipelineInput};
use crate::rpc::CtaOption;

/// System prompt for the single generate step: observe, decide, and
/// perform in one strict-JSON response.
pub const GENERATE_SYSTEM_PROMPT: &str = "\
You are the thinking layer of a WhatsApp sales assistant. You observe the \
full conversation state, decide the next move, and write the next message \
when one should be sent.\n\
\n\
You are given the business identity, a flow prompt from the business \
(treat it as a directional hint, not a script), retrieved knowledge, a \
rolling summary (long-term memory), the recent raw messages, the current \
stage / intent / sentiment, nudge counters, timing facts including whether \
the 24-hour session window is open, and the CTAs configured in the \
dashboard.\n\
\n\
Respond with ONLY a JSON object with these fields:\n\
{\"thought_process\": \"...\", \"intent_level\": \"low|medium|high|very_high|unknown\", \
\"user_sentiment\": \"neutral|curious|annoyed|distrustful|confused|disappointed|uninterested\", \
\"risk_flags\": {\"spam_risk\": \"low|medium|high\", \"policy_risk\": \"low|medium|high\", \
\"hallucination_risk\": \"low|medium|high\"}, \
\"action\": \"send_now|wait_schedule|flag_attention|initiate_cta\", \
\"new_stage\": \"greeting|qualification|pricing|cta|followup|closed|lost|ghosted\", \
\"should_respond\": true, \"selected_cta_id\": null, \"cta_scheduled_at\": null, \
\"followup_in_minutes\": 0, \"followup_reason\": \"\", \"message_text\": \"...\", \
\"message_language\": \"en\", \"confidence\": 0.0, \"needs_human_attention\": false}\n\
\n\
Rules:\n\
- Use ONLY facts from the business description and retrieved knowledge. \
Never invent prices, links, timelines, or guarantees.\n\
- Mirror the user's language and message style. Keep replies WhatsApp-native: \
one or two short lines, no bullet lists, no assistant phrases.\n\
- Select a CTA ONLY from the provided list, by its id.\n\
- When the user should not be messaged right now, set action to \
wait_schedule with a followup_in_minutes, or flag_attention when a human \
needs to look.\n\
- When any risk flag is high, do not send.";

/// System prompt for the memory step.
pub const MEMORY_SYSTEM_PROMPT: &str = "\
You are the memory of a WhatsApp sales assistant. Compress the exchange \
into an updated rolling summary that preserves facts, commitments, \
objections, and stage-relevant signals. Respond with a JSON object: \
{\"updated_rolling_summary\": \"...\", \"needs_recursive_summary\": false}. \
Set needs_recursive_summary to true when the summary is approaching its \
length limit and should be re-compressed from scratch.";

fn format_messages(messages: &[MessageContext]) -> String {
    if messages.is_empty() {
        return "No messages yet".to_string();
    }
    messages
        .iter()
        .map(|m| format!("[{}] {}", m.sender, m.text))
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_ctas(ctas: &[CtaOption]) -> String {
    if ctas.is_empty() {
        return "No CTAs defined in dashboard.".to_string();
    }
    ctas.iter()
        .map(|c| format!("- ID: {} | Name: {}", c.id, c.name))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build the generate user prompt from the pipeline input.
pub fn build_generate_user_prompt(input: &PipelineInput) -> String {
    let knowledge = input
        .knowledge_context
        .as_deref()
        .unwrap_or("No specific knowledge retrieved.");
    let summary = if input.rolling_summary.is_empty() {
        "No summary yet"
    } else {
        &input.rolling_summary
    };

    format!(
        "## Business\n{name}\n{description}\n\n\
         ## Flow Prompt\n{flow}\n\n\
         ## Retrieved Knowledge\n{knowledge}\n\n\
         ## Rolling Summary\n{summary}\n\n\
         ## Conversation State\n\
         Stage: {stage}\n\
         Intent: {intent} | Sentiment: {sentiment}\n\
         Nudges sent total: {total_nudges} (last 24h: {nudges_24h})\n\
         Now: {now}\n\
         Session window open: {window}\n\
         Language preference: {language}\n\
         Reply budget: max {max_words} words, at most {questions} question(s)\n\n\
         ## Available CTAs\n{ctas}\n\n\
         ## Recent Messages\n{messages}",
        name = input.business_name,
        description = input.business_description,
        flow = input.flow_prompt,
        knowledge = knowledge,
        summary = summary,
        stage = input.conversation_stage.as_str(),
        intent = input.intent_level.as_str(),
        sentiment = input.user_sentiment.as_str(),
        total_nudges = input.nudges.total_nudges,
        nudges_24h = input.nudges.followup_count_24h,
        now = input.timing.now.to_rfc3339(),
        window = input.timing.window_open,
        language = input.language_pref,
        max_words = input.max_words,
        questions = input.questions_per_message,
        ctas = format_ctas(&input.available_ctas),
        messages = format_messages(&input.last_messages),
    )
}

/// Build the memory user prompt from the turn that just completed.
pub fn build_memory_user_prompt(
    rolling_summary: &str,
    user_message: &str,
    generate: &GenerateOutput,
) -> String {
    let bot_message = if generate.message_text.is_empty() {
        "(No response sent)"
    } else {
        &generate.message_text
    };
    let summary = if rolling_summary.is_empty() {
        "No prior summary"
    } else {
        rolling_summary
    };

    format!(
        "## Current Rolling Summary\n{summary}\n\n\
         ## New Exchange\nUser: {user_message}\nBot: {bot_message}\n\n\
         ## Action Taken\nAction: {action}, Stage: {stage}\n\n\
         Update the rolling summary to include this exchange.",
        action = generate.action.as_str(),
        stage = generate.new_stage.as_str(),
    )
}
