//! Message processor — orchestrates one conversation turn.
//!
//! Resolves tenant and conversation, persists the inbound message, and
//! hands the text to the debounce layer. When the quiet window closes the
//! flush lands back here: rebuild context, run the pipeline under its
//! budget, and apply the result. Scheduled follow-ups enter through
//! `run_followup` and take the same per-conversation lock.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::enums::ConversationMode;
use crate::error::WorkerError;
use crate::pipeline::{
    emergency_result, HtlPipeline, MessageContext, NudgeContext, PipelineInput, TimingContext,
};
use crate::rpc::{Conversation, ConversationPatch, ObserverEvent, ObserverEventType, StateStore, TenantBinding};
use crate::worker::actions::ActionApplier;
use crate::worker::debounce::{DebounceTable, FlushHandler};
use crate::worker::envelope::{self, InboundEvent, ParsedEvent};

/// How many recent messages feed the prompt.
const LAST_MESSAGES_LIMIT: u32 = 10;

/// Reply budget passed to the model.
const DEFAULT_MAX_WORDS: u32 = 60;
const DEFAULT_QUESTIONS_PER_MESSAGE: u32 = 1;

/// Shared dependencies for message processing.
pub struct ProcessorDeps {
    pub store: Arc<dyn StateStore>,
    pub pipeline: Arc<HtlPipeline>,
    pub applier: Arc<ActionApplier>,
    pub debounce: Arc<DebounceTable>,
    pub pipeline_budget: Duration,
}

pub struct MessageProcessor {
    deps: ProcessorDeps,
}

impl MessageProcessor {
    pub fn new(deps: ProcessorDeps) -> Arc<Self> {
        Arc::new(Self { deps })
    }

    /// Handle one raw queue entry. `Ok` means the entry may be acked:
    /// either it needs no processing, or the inbound message is durably
    /// persisted and buffered.
    pub async fn handle_event(self: &Arc<Self>, body: &str) -> Result<(), WorkerError> {
        match envelope::parse_event(body)? {
            ParsedEvent::StatusUpdate | ParsedEvent::Empty | ParsedEvent::NonText => Ok(()),
            ParsedEvent::Message(event) => self.handle_inbound(event).await,
        }
    }

    async fn handle_inbound(self: &Arc<Self>, event: InboundEvent) -> Result<(), WorkerError> {
        let tenant = self
            .deps
            .store
            .tenant_by_phone_number_id(&event.phone_number_id)
            .await?
            .ok_or_else(|| WorkerError::TenantNotFound(event.phone_number_id.clone()))?;

        let conversation = self
            .deps
            .store
            .conversation_by_phone(
                tenant.tenant_id,
                &event.sender_phone,
                event.sender_name.as_deref(),
            )
            .await?;

        // Durable acceptance: redeliveries dedupe on the provider id here.
        self.deps
            .store
            .record_incoming(conversation.id, &event.provider_message_id, &event.text)
            .await?;

        info!(
            conversation = %conversation.id,
            tenant = %tenant.tenant_id,
            mode = ?conversation.mode,
            "inbound message persisted"
        );

        if conversation.mode == ConversationMode::Human {
            // A human drives this conversation — no pipeline, just notify.
            self.deps
                .store
                .emit_event(&ObserverEvent::for_conversation(
                    ObserverEventType::ConversationUpdated,
                    &conversation,
                ))
                .await?;
            return Ok(());
        }

        self.deps.debounce.buffer_message(
            conversation.id,
            event.text,
            self.clone() as Arc<dyn FlushHandler>,
        );
        Ok(())
    }

    async fn build_input(
        &self,
        tenant: &TenantBinding,
        conversation: &Conversation,
    ) -> Result<PipelineInput, WorkerError> {
        let messages = self
            .deps
            .store
            .last_messages(conversation.id, LAST_MESSAGES_LIMIT)
            .await?;
        let ctas = self.deps.store.available_ctas(tenant.tenant_id).await?;

        Ok(PipelineInput {
            tenant_id: tenant.tenant_id,
            business_name: tenant.business_name.clone(),
            business_description: tenant.business_description.clone(),
            flow_prompt: tenant.flow_prompt.clone(),
            available_ctas: ctas,
            rolling_summary: conversation.rolling_summary.clone(),
            last_messages: messages
                .into_iter()
                .map(|m| MessageContext {
                    sender: m.origin.as_str().to_string(),
                    text: m.content,
                    timestamp: m.created_at.to_rfc3339(),
                })
                .collect(),
            conversation_stage: conversation.stage,
            conversation_mode: conversation.mode,
            intent_level: conversation.intent_level,
            user_sentiment: conversation.user_sentiment,
            active_cta_id: conversation.active_cta_id,
            timing: TimingContext::compute(
                Utc::now(),
                conversation.last_user_message_at,
                conversation.last_bot_message_at,
            ),
            nudges: NudgeContext {
                followup_count_24h: conversation.followup_count_24h,
                total_nudges: conversation.total_nudges,
            },
            max_words: DEFAULT_MAX_WORDS,
            questions_per_message: DEFAULT_QUESTIONS_PER_MESSAGE,
            language_pref: tenant.language_pref.clone(),
            knowledge_context: None,
        })
    }

    /// One pipeline turn for drained user text. Runs with the
    /// conversation's serialization lock held (via the debounce layer).
    async fn run_pipeline_turn(
        &self,
        conversation_id: Uuid,
        combined_text: &str,
    ) -> Result<(), WorkerError> {
        // Re-fetch: the snapshot at buffer time may be stale by drain time.
        let conversation = self.deps.store.get_conversation(conversation_id).await?;

        if conversation.mode == ConversationMode::Human {
            // Takeover happened while the burst was buffering.
            self.deps
                .store
                .emit_event(&ObserverEvent::for_conversation(
                    ObserverEventType::ConversationUpdated,
                    &conversation,
                ))
                .await?;
            return Ok(());
        }

        let tenant = self.deps.store.tenant_by_id(conversation.tenant_id).await?;
        let input = self.build_input(&tenant, &conversation).await?;

        let result = match tokio::time::timeout(
            self.deps.pipeline_budget,
            self.deps.pipeline.run(input.clone(), combined_text),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    conversation = %conversation_id,
                    budget_secs = self.deps.pipeline_budget.as_secs(),
                    "pipeline exceeded budget; applying emergency result"
                );
                emergency_result(&input)
            }
        };

        info!(
            conversation = %conversation_id,
            action = result.generate.action.as_str(),
            stage = result.generate.new_stage.as_str(),
            send = result.should_send_message(),
            latency_ms = result.pipeline_latency_ms,
            "pipeline turn complete"
        );

        self.deps
            .applier
            .apply(&conversation, &input, combined_text, &result)
            .await
    }

    /// Run a scheduler-initiated follow-up for a due conversation.
    ///
    /// Takes the same serialization lock as user-initiated turns. On
    /// success with `should_respond`, the follow-up counter is incremented
    /// atomically server-side.
    pub async fn run_followup(&self, conversation_id: Uuid) -> Result<(), WorkerError> {
        self.deps
            .debounce
            .run_locked(conversation_id, async {
                let conversation = self.deps.store.get_conversation(conversation_id).await?;
                if conversation.mode != ConversationMode::Bot {
                    info!(conversation = %conversation_id, "skipping follow-up: not in bot mode");
                    return Ok(());
                }
                if conversation.stage.is_terminal() {
                    info!(conversation = %conversation_id, "skipping follow-up: conversation ended");
                    return Ok(());
                }

                let tenant = self.deps.store.tenant_by_id(conversation.tenant_id).await?;
                let input = self.build_input(&tenant, &conversation).await?;

                let result = match tokio::time::timeout(
                    self.deps.pipeline_budget,
                    self.deps.pipeline.run_followup(input.clone()),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => emergency_result(&input),
                };

                self.deps
                    .applier
                    .apply(
                        &conversation,
                        &input,
                        crate::pipeline::FOLLOWUP_TRIGGER_MESSAGE,
                        &result,
                    )
                    .await?;

                if result.generate.should_respond {
                    self.deps
                        .store
                        .increment_followup_count(conversation_id)
                        .await?;
                }
                Ok(())
            })
            .await
    }
}

#[async_trait]
impl FlushHandler for MessageProcessor {
    async fn flush(&self, conversation_id: Uuid, combined_text: String) -> Result<(), WorkerError> {
        let outcome = self.run_pipeline_turn(conversation_id, &combined_text).await;
        if let Err(ref e) = outcome {
            error!(
                conversation = %conversation_id,
                error = %e,
                "pipeline turn failed; flagging for human attention"
            );
            let patch = ConversationPatch {
                needs_human_attention: Some(true),
                ..Default::default()
            };
            if let Err(patch_err) = self
                .deps
                .store
                .patch_conversation(conversation_id, &patch)
                .await
            {
                warn!(
                    conversation = %conversation_id,
                    error = %patch_err,
                    "could not flag conversation after failed turn"
                );
            }
        }
        outcome
    }
}
