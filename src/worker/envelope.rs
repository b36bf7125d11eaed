//! Provider webhook envelope parsing.
//!
//! The queue carries opaque provider-envelope bytes; this is the single
//! place they are interpreted. Status updates and non-text payloads are
//! recognized so the consumer can ack them without further work.

use serde_json::Value;

use crate::error::WorkerError;

/// A text message extracted from a provider envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub provider_message_id: String,
    pub phone_number_id: String,
    pub sender_phone: String,
    pub sender_name: Option<String>,
    pub text: String,
}

/// What a queue entry turned out to contain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedEvent {
    /// A lead text message to process.
    Message(InboundEvent),
    /// Delivery/read receipts. Acked, never processed.
    StatusUpdate,
    /// Envelope without messages (e.g. subscription echoes).
    Empty,
    /// Media, location, reactions — acked, not processed.
    NonText,
}

/// Parse a raw provider envelope body.
///
/// Malformed JSON or a message missing its addressing fields is an error —
/// the consumer nacks those for redelivery and eventual dead-lettering.
pub fn parse_event(body: &str) -> Result<ParsedEvent, WorkerError> {
    let root: Value = serde_json::from_str(body)
        .map_err(|e| WorkerError::MalformedEvent(format!("invalid JSON: {e}")))?;

    let value = &root["entry"][0]["changes"][0]["value"];
    if value.is_null() {
        return Ok(ParsedEvent::Empty);
    }

    if value.get("statuses").is_some_and(|s| !s.is_null()) {
        return Ok(ParsedEvent::StatusUpdate);
    }

    let Some(messages) = value.get("messages").and_then(|m| m.as_array()) else {
        return Ok(ParsedEvent::Empty);
    };
    let Some(msg) = messages.first() else {
        return Ok(ParsedEvent::Empty);
    };

    let contacts = value.get("contacts").and_then(|c| c.as_array());
    let first_contact = contacts.and_then(|c| c.first());
    let sender_phone = first_contact
        .and_then(|c| c.get("wa_id"))
        .and_then(|v| v.as_str())
        .or_else(|| msg.get("from").and_then(|v| v.as_str()));
    let sender_name = first_contact
        .and_then(|c| c["profile"]["name"].as_str())
        .map(String::from);

    let phone_number_id = value["metadata"]["phone_number_id"].as_str();

    let (Some(sender_phone), Some(phone_number_id)) = (sender_phone, phone_number_id) else {
        return Err(WorkerError::MalformedEvent(
            "missing sender phone or phone_number_id".into(),
        ));
    };

    let Some(text) = extract_text(msg) else {
        return Ok(ParsedEvent::NonText);
    };

    let provider_message_id = msg
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| WorkerError::MalformedEvent("message missing id".into()))?;

    Ok(ParsedEvent::Message(InboundEvent {
        provider_message_id: provider_message_id.to_string(),
        phone_number_id: phone_number_id.to_string(),
        sender_phone: sender_phone.to_string(),
        sender_name,
        text,
    }))
}

/// Text content across the message shapes the provider sends: plain text,
/// button taps, and interactive replies.
fn extract_text(msg: &Value) -> Option<String> {
    match msg.get("type").and_then(|t| t.as_str())? {
        "text" => msg["text"]["body"].as_str().map(String::from),
        "button" => msg["button"]["text"].as_str().map(String::from),
        "interactive" => {
            let interactive = msg.get("interactive")?;
            match interactive.get("type").and_then(|t| t.as_str())? {
                "button_reply" => interactive["button_reply"]["title"].as_str().map(String::from),
                "list_reply" => interactive["list_reply"]["title"].as_str().map(String::from),
                _ => None,
            }
        }
        _ => None,
    }
}
