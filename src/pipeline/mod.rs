//! HTL pipeline — retrieve, generate, background memory.
//!
//! A deterministic staged transformation from `PipelineInput` + the user's
//! combined text to a validated `PipelineResult`. The pipeline never
//! decides what to do with its result; the action applier does.

pub mod generate;
pub mod memory;
pub mod prompts;
pub mod types;

use std::sync::Arc;
use std::time::Instant;

use uuid::Uuid;

use crate::enums::DecisionAction;
use crate::knowledge::KnowledgeRetriever;
use crate::llm::ChatModel;
pub use types::{
    GenerateOutput, MemoryOutput, MessageContext, NudgeContext, PipelineInput, PipelineResult,
    RiskFlags, TimingContext,
};

/// Retrieval parameters for the knowledge stage.
pub const RETRIEVAL_TOP_K: i64 = 5;
pub const VECTOR_THRESHOLD: f64 = 0.65;
pub const KEYWORD_RANK_THRESHOLD: i64 = 5;

/// Synthetic user text for scheduler-initiated invocations.
pub const FOLLOWUP_TRIGGER_MESSAGE: &str = "[System: Scheduled follow-up triggered]";

/// The staged pipeline. Stateless across invocations.
pub struct HtlPipeline {
    chat: Arc<dyn ChatModel>,
    retriever: Option<Arc<dyn KnowledgeRetriever>>,
}

impl HtlPipeline {
    pub fn new(chat: Arc<dyn ChatModel>, retriever: Option<Arc<dyn KnowledgeRetriever>>) -> Self {
        Self { chat, retriever }
    }

    /// Run the full pipeline for a user turn.
    pub async fn run(&self, mut input: PipelineInput, user_message: &str) -> PipelineResult {
        let start = Instant::now();

        if let Some(ref retriever) = self.retriever {
            input.knowledge_context = Some(
                self.retrieve_block(retriever.as_ref(), user_message, input.tenant_id)
                    .await,
            );
        }

        let (generate, _latency, tokens) = generate::run_generate(self.chat.as_ref(), &input).await;

        PipelineResult {
            generate,
            pipeline_latency_ms: start.elapsed().as_millis() as u64,
            total_tokens_used: tokens,
            needs_background_summary: true,
        }
    }

    /// Run a scheduler-initiated follow-up turn.
    pub async fn run_followup(&self, input: PipelineInput) -> PipelineResult {
        self.run(input, FOLLOWUP_TRIGGER_MESSAGE).await
    }

    /// Background memory step for a completed turn.
    pub async fn update_memory(
        &self,
        rolling_summary: &str,
        user_message: &str,
        generate: &GenerateOutput,
    ) -> MemoryOutput {
        memory::run_memory(self.chat.as_ref(), rolling_summary, user_message, generate).await
    }

    async fn retrieve_block(
        &self,
        retriever: &dyn KnowledgeRetriever,
        user_message: &str,
        tenant_id: Uuid,
    ) -> String {
        match retriever
            .search(
                user_message,
                tenant_id,
                RETRIEVAL_TOP_K,
                VECTOR_THRESHOLD,
                KEYWORD_RANK_THRESHOLD,
            )
            .await
        {
            Ok(chunks) if chunks.is_empty() => "No relevant knowledge found.".to_string(),
            Ok(chunks) => chunks
                .iter()
                .map(|c| {
                    format!(
                        "Source: {} (Confidence: {:.2})\nContent: {}",
                        c.title, c.score, c.content
                    )
                })
                .collect::<Vec<_>>()
                .join("\n\n"),
            Err(e) => {
                tracing::error!(error = %e, "knowledge retrieval failed");
                "Error retrieving knowledge.".to_string()
            }
        }
    }
}

/// The pre-fabricated result used when the pipeline cannot produce a safe
/// answer (budget exceeded, task failure). Always silent, always flags a
/// human, stage unchanged.
pub fn emergency_result(input: &PipelineInput) -> PipelineResult {
    PipelineResult {
        generate: GenerateOutput {
            thought_process: "Critical System Failure".into(),
            intent_level: crate::enums::IntentLevel::Unknown,
            user_sentiment: crate::enums::UserSentiment::Neutral,
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
        },
        pipeline_latency_ms: 0,
        total_tokens_used: 0,
        needs_background_summary: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::*;
    use crate::error::{LlmError, RetrievalError};
    use crate::knowledge::{MatchReason, RetrievedChunk};
    use crate::llm::{JsonCompletion, JsonCompletionRequest};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    /// Chat stub that records the prompts it receives.
    struct RecordingChat {
        response: Result<serde_json::Value, ()>,
        seen_prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl crate::llm::ChatModel for RecordingChat {
        async fn complete_json(
            &self,
            request: JsonCompletionRequest,
        ) -> Result<JsonCompletion, LlmError> {
            let user = request
                .messages
                .iter()
                .find(|m| m.role == "user")
                .map(|m| m.content.clone())
                .unwrap_or_default();
            self.seen_prompts.lock().unwrap().push(user);
            match &self.response {
                Ok(value) => Ok(JsonCompletion {
                    value: value.clone(),
                    total_tokens: 100,
                }),
                Err(()) => Err(LlmError::Status {
                    status: 500,
                    detail: "upstream exploded".into(),
                }),
            }
        }
    }

    struct StubRetriever {
        result: Result<Vec<RetrievedChunk>, ()>,
    }

    #[async_trait]
    impl KnowledgeRetriever for StubRetriever {
        async fn search(
            &self,
            _query: &str,
            _tenant_id: Uuid,
            _top_k: i64,
            _vector_threshold: f64,
            _keyword_rank_threshold: i64,
        ) -> Result<Vec<RetrievedChunk>, RetrievalError> {
            match &self.result {
                Ok(chunks) => Ok(chunks.clone()),
                Err(()) => Err(RetrievalError::Embedding("down".into())),
            }
        }
    }

    fn sample_input() -> PipelineInput {
        PipelineInput {
            tenant_id: Uuid::new_v4(),
            business_name: "Acme".into(),
            business_description: "Tutoring".into(),
            flow_prompt: String::new(),
            available_ctas: vec![],
            rolling_summary: String::new(),
            last_messages: vec![],
            conversation_stage: ConversationStage::Greeting,
            conversation_mode: ConversationMode::Bot,
            intent_level: IntentLevel::Unknown,
            user_sentiment: UserSentiment::Neutral,
            active_cta_id: None,
            timing: TimingContext::compute(Utc::now(), Some(Utc::now()), None),
            nudges: NudgeContext::default(),
            max_words: 60,
            questions_per_message: 1,
            language_pref: "en".into(),
            knowledge_context: None,
        }
    }

    fn happy_generate_json() -> serde_json::Value {
        serde_json::json!({
            "thought_process": "pricing question",
            "intent_level": "high",
            "user_sentiment": "curious",
            "action": "send_now",
            "new_stage": "pricing",
            "should_respond": true,
            "message_text": "Plans start at $20/h.",
            "confidence": 0.9,
        })
    }

    #[tokio::test]
    async fn happy_path_attaches_knowledge_and_decides() {
        let chat = Arc::new(RecordingChat {
            response: Ok(happy_generate_json()),
            seen_prompts: Mutex::new(vec![]),
        });
        let retriever = Arc::new(StubRetriever {
            result: Ok(vec![RetrievedChunk {
                id: Uuid::new_v4(),
                title: "Pricing".into(),
                content: "Plans start at $20/h.".into(),
                score: 0.0321,
                reason: MatchReason::Semantic,
            }]),
        });
        let pipeline = HtlPipeline::new(chat.clone(), Some(retriever));

        let result = pipeline.run(sample_input(), "What's your pricing?").await;
        assert!(result.should_send_message());
        assert_eq!(result.generate.new_stage, ConversationStage::Pricing);
        assert_eq!(result.total_tokens_used, 100);
        assert!(result.needs_background_summary);

        let prompts = chat.seen_prompts.lock().unwrap();
        assert!(prompts[0].contains("Source: Pricing (Confidence: 0.03)"));
        assert!(prompts[0].contains("Plans start at $20/h."));
    }

    #[tokio::test]
    async fn empty_retrieval_notes_no_knowledge() {
        let chat = Arc::new(RecordingChat {
            response: Ok(happy_generate_json()),
            seen_prompts: Mutex::new(vec![]),
        });
        let retriever = Arc::new(StubRetriever { result: Ok(vec![]) });
        let pipeline = HtlPipeline::new(chat.clone(), Some(retriever));

        pipeline.run(sample_input(), "hello").await;
        let prompts = chat.seen_prompts.lock().unwrap();
        assert!(prompts[0].contains("No relevant knowledge found."));
    }

    #[tokio::test]
    async fn retrieval_error_degrades_to_error_marker() {
        let chat = Arc::new(RecordingChat {
            response: Ok(happy_generate_json()),
            seen_prompts: Mutex::new(vec![]),
        });
        let retriever = Arc::new(StubRetriever { result: Err(()) });
        let pipeline = HtlPipeline::new(chat.clone(), Some(retriever));

        let result = pipeline.run(sample_input(), "hello").await;
        // Retrieval failure does not sink the pipeline.
        assert!(result.should_send_message());
        let prompts = chat.seen_prompts.lock().unwrap();
        assert!(prompts[0].contains("Error retrieving knowledge."));
    }

    #[tokio::test]
    async fn no_retriever_leaves_default_knowledge_line() {
        let chat = Arc::new(RecordingChat {
            response: Ok(happy_generate_json()),
            seen_prompts: Mutex::new(vec![]),
        });
        let pipeline = HtlPipeline::new(chat.clone(), None);

        pipeline.run(sample_input(), "hello").await;
        let prompts = chat.seen_prompts.lock().unwrap();
        assert!(prompts[0].contains("No specific knowledge retrieved."));
    }

    #[tokio::test]
    async fn llm_failure_yields_silent_flagged_result() {
        let chat = Arc::new(RecordingChat {
            response: Err(()),
            seen_prompts: Mutex::new(vec![]),
        });
        let pipeline = HtlPipeline::new(chat, None);

        let result = pipeline.run(sample_input(), "hello").await;
        assert!(!result.should_send_message());
        assert!(result.generate.needs_human_attention);
        assert_eq!(result.generate.new_stage, ConversationStage::Greeting);
        assert_eq!(result.generate.confidence, 0.0);
    }

    #[tokio::test]
    async fn followup_uses_trigger_message() {
        let chat = Arc::new(RecordingChat {
            response: Ok(happy_generate_json()),
            seen_prompts: Mutex::new(vec![]),
        });
        let retriever = Arc::new(StubRetriever { result: Ok(vec![]) });
        let pipeline = HtlPipeline::new(chat.clone(), Some(retriever));

        pipeline.run_followup(sample_input()).await;
        // The trigger text drives retrieval, not the prompt body — the
        // prompt sections still come from the input itself.
        let prompts = chat.seen_prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
    }

    #[test]
    fn emergency_result_shape() {
        let input = sample_input();
        let result = emergency_result(&input);
        assert!(!result.generate.should_respond);
        assert!(result.generate.needs_human_attention);
        assert_eq!(result.generate.action, DecisionAction::WaitSchedule);
        assert_eq!(result.generate.new_stage, input.conversation_stage);
        assert!(!result.needs_background_summary);
        assert_eq!(result.generate.thought_process, "Critical System Failure");
    }
}
