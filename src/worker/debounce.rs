//! Per-conversation debounce and serialization.
//!
//! Bursts of short user messages coalesce behind a quiet-window timer and
//! flush as a single combined text. Every conversation owns one tokio
//! mutex — the serialization lock — so at most one pipeline is in flight
//! per conversation, and scheduler-injected follow-ups can never
//! interleave with a user-initiated run.
//!
//! The table is process-local by design; cross-process correctness relies
//! on conversation→worker affinity at the queue layer.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error};
use uuid::Uuid;

use crate::error::WorkerError;

/// Receives the combined text when a conversation's buffer drains.
///
/// Called with the conversation's serialization lock held. An `Err` return
/// means the text was not consumed: the debounce layer reinserts it at the
/// front of the buffer for the next drain.
#[async_trait]
pub trait FlushHandler: Send + Sync + 'static {
    async fn flush(&self, conversation_id: Uuid, combined_text: String) -> Result<(), WorkerError>;
}

struct ConversationEntry {
    /// Buffered message texts in arrival order.
    buffer: Mutex<Vec<String>>,
    /// Bumped on every (re)arm; a timer only fires if its generation is
    /// still current, so later arrivals supersede earlier timers.
    timer_generation: AtomicU64,
    /// The serialization lock.
    pipeline_lock: AsyncMutex<()>,
}

impl ConversationEntry {
    fn new() -> Self {
        Self {
            buffer: Mutex::new(Vec::new()),
            timer_generation: AtomicU64::new(0),
            pipeline_lock: AsyncMutex::new(()),
        }
    }
}

/// The per-conversation debounce state table.
pub struct DebounceTable {
    window: Duration,
    entries: Mutex<HashMap<Uuid, Arc<ConversationEntry>>>,
}

impl DebounceTable {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entry(&self, conversation_id: Uuid) -> Arc<ConversationEntry> {
        let mut entries = self.entries.lock().expect("debounce table poisoned");
        entries
            .entry(conversation_id)
            .or_insert_with(|| Arc::new(ConversationEntry::new()))
            .clone()
    }

    /// Number of texts currently buffered for a conversation.
    pub fn buffered_len(&self, conversation_id: Uuid) -> usize {
        self.entry(conversation_id)
            .buffer
            .lock()
            .expect("buffer poisoned")
            .len()
    }

    /// Append a message and (re)arm the quiet-window timer.
    ///
    /// If a timer was already armed it is superseded — the window restarts
    /// from this arrival, coalescing the burst.
    pub fn buffer_message(
        self: &Arc<Self>,
        conversation_id: Uuid,
        text: String,
        handler: Arc<dyn FlushHandler>,
    ) {
        let entry = self.entry(conversation_id);
        entry.buffer.lock().expect("buffer poisoned").push(text);
        self.arm_timer(conversation_id, entry, handler);
    }

    fn arm_timer(
        self: &Arc<Self>,
        conversation_id: Uuid,
        entry: Arc<ConversationEntry>,
        handler: Arc<dyn FlushHandler>,
    ) {
        let generation = entry.timer_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let window = self.window;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if entry.timer_generation.load(Ordering::SeqCst) != generation {
                // A later arrival re-armed the window.
                return;
            }
            Self::flush_now(conversation_id, entry, handler).await;
        });
    }

    /// Acquire the lock, drain the buffer, run the handler.
    ///
    /// Draining happens after the lock is held: messages arriving while a
    /// pipeline is executing wait in the buffer and come out in one batch
    /// on the next drain, preserving arrival order.
    async fn flush_now(
        conversation_id: Uuid,
        entry: Arc<ConversationEntry>,
        handler: Arc<dyn FlushHandler>,
    ) {
        let _guard = entry.pipeline_lock.lock().await;

        let combined = {
            let mut buffer = entry.buffer.lock().expect("buffer poisoned");
            if buffer.is_empty() {
                return;
            }
            buffer.drain(..).collect::<Vec<_>>().join("\n")
        };

        debug!(conversation = %conversation_id, "draining debounce buffer");
        if let Err(e) = handler.flush(conversation_id, combined.clone()).await {
            error!(
                conversation = %conversation_id,
                error = %e,
                "flush handler failed; re-queueing buffered text"
            );
            entry
                .buffer
                .lock()
                .expect("buffer poisoned")
                .insert(0, combined);
        }
    }

    /// Run `fut` while holding the conversation's serialization lock.
    ///
    /// Used for synthetic invocations (scheduled follow-ups) that bypass
    /// the arrival buffer but must not interleave with user-initiated
    /// pipelines.
    pub async fn run_locked<F, T>(&self, conversation_id: Uuid, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let entry = self.entry(conversation_id);
        let _guard = entry.pipeline_lock.lock().await;
        fut.await
    }
}
