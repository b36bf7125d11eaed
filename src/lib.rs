//! Leadflow — multi-tenant WhatsApp conversation automation core.
//!
//! Inbound webhook events flow through a durable queue into a worker that
//! debounces bursts per conversation, runs the HTL (Human Thinking Layer)
//! pipeline, and applies the resulting actions through the internal state
//! RPC. The dashboard, auth, and provider transport live in external
//! services; this crate owns only the contracts it consumes from them.

pub mod config;
pub mod enums;
pub mod error;
pub mod gateway;
pub mod knowledge;
pub mod llm;
pub mod normalize;
pub mod pipeline;
pub mod queue;
pub mod rpc;
pub mod worker;
