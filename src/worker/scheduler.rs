//! Follow-up scheduler — periodic scan for due nudges.
//!
//! Every tick asks the state store which conversations fall into a
//! follow-up bucket right now and injects a synthetic pipeline invocation
//! for each. Idempotent under re-entry: a conversation advanced past its
//! bucket (counter incremented) no longer matches the query.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::FollowupBucket;
use crate::rpc::StateStore;
use crate::worker::processor::MessageProcessor;

pub struct FollowupScheduler {
    store: Arc<dyn StateStore>,
    processor: Arc<MessageProcessor>,
    interval: Duration,
    buckets: Vec<FollowupBucket>,
}

impl FollowupScheduler {
    pub fn new(
        store: Arc<dyn StateStore>,
        processor: Arc<MessageProcessor>,
        interval: Duration,
        buckets: Vec<FollowupBucket>,
    ) -> Self {
        Self {
            store,
            processor,
            interval,
            buckets,
        }
    }

    /// Tick until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "scheduler started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => self.tick().await,
            }
        }
        info!("scheduler stopped");
    }

    /// One scan: fetch due conversations and run their follow-ups.
    ///
    /// Follow-ups run concurrently across conversations; within one
    /// conversation the serialization lock in the debounce layer still
    /// applies, so a follow-up never interleaves with a user turn.
    pub async fn tick(&self) {
        let due = match self.store.due_followups(Utc::now(), &self.buckets).await {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "due-followups query failed");
                return;
            }
        };
        if due.is_empty() {
            return;
        }
        info!(count = due.len(), "processing due follow-ups");

        for conversation in due {
            let processor = self.processor.clone();
            tokio::spawn(async move {
                if let Err(e) = processor.run_followup(conversation.id).await {
                    error!(
                        conversation = %conversation.id,
                        error = %e,
                        "follow-up pipeline failed"
                    );
                }
            });
        }
    }
}
