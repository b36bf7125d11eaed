//! Error types for the automation core.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),
}

/// Configuration-related errors. All of these are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Durable queue errors.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Queue send failed: {0}")]
    SendFailed(String),

    #[error("Queue receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Queue ack failed for receipt {receipt}: {reason}")]
    AckFailed { receipt: String, reason: String },

    #[error("Unknown receipt: {0}")]
    UnknownReceipt(String),
}

/// Internal state-store RPC errors.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("RPC request to {endpoint} failed: {reason}")]
    Transport { endpoint: String, reason: String },

    #[error("RPC {endpoint} returned {status}: {detail}")]
    Status {
        endpoint: String,
        status: u16,
        detail: String,
    },

    #[error("Entity not found: {entity}")]
    NotFound { entity: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RpcError {
    /// Whether the failure is worth a bounded retry.
    pub fn is_transient(&self) -> bool {
        match self {
            RpcError::Transport { .. } => true,
            RpcError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// LLM transport errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM request failed: {0}")]
    RequestFailed(String),

    #[error("LLM returned {status}: {detail}")]
    Status { status: u16, detail: String },

    #[error("Empty completion response")]
    EmptyResponse,

    #[error("Could not parse JSON from completion: {0}")]
    Unparseable(String),
}

/// Knowledge retrieval errors.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("Embedding request failed: {0}")]
    Embedding(String),

    #[error("Knowledge query failed: {0}")]
    Query(#[from] sqlx::Error),
}

/// Worker-level errors. Invariant violations nack the queue entry.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("No tenant bound to phone-number-id {0}")]
    TenantNotFound(String),

    #[error("Malformed provider event: {0}")]
    MalformedEvent(String),

    #[error("State store error: {0}")]
    Rpc(#[from] RpcError),
}

/// Result type alias for the core.
pub type Result<T> = std::result::Result<T, Error>;
