//! Action applier — pipeline output to side effects.
//!
//! Pure translation in a fixed order: outbound send, persist, conversation
//! patch, observer events, background memory update. The applier never
//! overrides the pipeline's "don't send" with a send.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::enums::MessageOrigin;
use crate::error::WorkerError;
use crate::pipeline::{HtlPipeline, PipelineInput, PipelineResult};
use crate::rpc::{
    Conversation, ConversationPatch, ObserverEvent, ObserverEventType, OutboundSend, StateStore,
};

pub struct ActionApplier {
    store: Arc<dyn StateStore>,
    pipeline: Arc<HtlPipeline>,
}

impl ActionApplier {
    pub fn new(store: Arc<dyn StateStore>, pipeline: Arc<HtlPipeline>) -> Self {
        Self { store, pipeline }
    }

    /// Apply a pipeline result for a conversation.
    ///
    /// `user_message` is the combined text that drove this invocation; it
    /// feeds the background memory update.
    pub async fn apply(
        &self,
        conversation: &Conversation,
        input: &PipelineInput,
        user_message: &str,
        result: &PipelineResult,
    ) -> Result<(), WorkerError> {
        let generate = &result.generate;

        // 1+2: outbound send, then persist. record_outgoing advances
        // last_bot_message_at server-side.
        if result.should_send_message() {
            self.store
                .send_message(&OutboundSend {
                    tenant_id: conversation.tenant_id,
                    to_phone: conversation.lead_phone.clone(),
                    text: generate.message_text.clone(),
                })
                .await?;
            self.store
                .record_outgoing(conversation.id, MessageOrigin::Bot, &generate.message_text)
                .await?;
            info!(
                conversation = %conversation.id,
                stage = generate.new_stage.as_str(),
                "outbound message dispatched"
            );
        }

        // 3: conversation patch. needs_human_attention is only ever raised
        // here — clearing it takes an explicit takeover/resolution command.
        let mut patch = ConversationPatch {
            stage: Some(generate.new_stage),
            intent_level: Some(generate.intent_level),
            user_sentiment: Some(generate.user_sentiment),
            ..Default::default()
        };
        if result.should_escalate() {
            patch.needs_human_attention = Some(true);
        }
        if let Some(cta_id) = generate.selected_cta_id.as_deref() {
            match Uuid::parse_str(cta_id) {
                Ok(id) => patch.active_cta_id = Some(id),
                Err(_) => warn!(
                    conversation = %conversation.id,
                    raw = cta_id,
                    "selected_cta_id is not a valid id; ignoring"
                ),
            }
        }
        let updated = self.store.patch_conversation(conversation.id, &patch).await?;

        // 4+5: observer events, from the post-patch snapshot.
        if result.should_escalate() {
            self.store
                .emit_event(&ObserverEvent::for_conversation(
                    ObserverEventType::ActionHumanAttentionRequired,
                    &updated,
                ))
                .await?;
        }
        if result.should_initiate_cta() {
            self.store
                .emit_event(&ObserverEvent::for_conversation(
                    ObserverEventType::ActionConversationsFlagged,
                    &updated,
                ))
                .await?;
        }

        // 6: background memory update. The next turn re-summarizes anyway,
        // so a lost update is tolerable.
        if result.needs_background_summary {
            let store = self.store.clone();
            let pipeline = self.pipeline.clone();
            let conversation_id = conversation.id;
            let rolling_summary = input.rolling_summary.clone();
            let user_message = user_message.to_string();
            let generate = generate.clone();
            tokio::spawn(async move {
                let memory = pipeline
                    .update_memory(&rolling_summary, &user_message, &generate)
                    .await;
                let patch = ConversationPatch {
                    rolling_summary: Some(memory.updated_rolling_summary),
                    ..Default::default()
                };
                if let Err(e) = store.patch_conversation(conversation_id, &patch).await {
                    warn!(
                        conversation = %conversation_id,
                        error = %e,
                        "failed to persist rolling summary"
                    );
                }
            });
        }

        Ok(())
    }
}
