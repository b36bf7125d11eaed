//! Worker system — queue consumption through action application.
//!
//! Components:
//! - `envelope` — provider envelope parsing
//! - `consumer` — long-poll loop with ack-after-acceptance
//! - `debounce` — per-conversation buffering + serialization lock
//! - `processor` — one conversation turn, end to end
//! - `scheduler` — due follow-up scan and synthetic invocations
//! - `actions` — ordered side effects from pipeline output

pub mod actions;
pub mod consumer;
pub mod debounce;
pub mod envelope;
pub mod processor;
pub mod scheduler;

pub use actions::ActionApplier;
pub use consumer::QueueConsumer;
pub use debounce::{DebounceTable, FlushHandler};
pub use envelope::{InboundEvent, ParsedEvent};
pub use processor::{MessageProcessor, ProcessorDeps};
pub use scheduler::FollowupScheduler;
