//! Environment-driven configuration.
//!
//! Required keys are fatal when absent: the process refuses to start.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default quiet window before a buffered burst is flushed to the pipeline.
pub const DEFAULT_DEBOUNCE_WINDOW_SECS: u64 = 5;

/// Default hard ceiling for a single pipeline invocation.
pub const DEFAULT_PIPELINE_BUDGET_SECS: u64 = 30;

/// Default scheduler cadence.
pub const DEFAULT_SCHEDULER_INTERVAL_SECS: u64 = 60;

/// Default follow-up buckets: (minutes-elapsed window, required prior count).
pub const DEFAULT_FOLLOWUP_BUCKETS: &str = "10-20:0,180-200:1,360-400:2";

/// A window in which a conversation becomes due for a scheduled nudge.
///
/// Elapsed time is measured from `last_bot_message_at`. Overlapping windows
/// across scheduler ticks are tolerated; `required_prior_count` keeps each
/// bucket one-shot per conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FollowupBucket {
    pub min_minutes: u32,
    pub max_minutes: u32,
    pub required_prior_count: u32,
}

impl FollowupBucket {
    fn parse(spec: &str) -> Result<Self, String> {
        let (window, count) = spec
            .split_once(':')
            .ok_or_else(|| format!("bucket '{spec}' missing ':count'"))?;
        let (min, max) = window
            .split_once('-')
            .ok_or_else(|| format!("bucket window '{window}' missing '-'"))?;
        let min_minutes: u32 = min.trim().parse().map_err(|_| format!("bad minutes '{min}'"))?;
        let max_minutes: u32 = max.trim().parse().map_err(|_| format!("bad minutes '{max}'"))?;
        if max_minutes <= min_minutes {
            return Err(format!("bucket window '{window}' is empty"));
        }
        let required_prior_count: u32 =
            count.trim().parse().map_err(|_| format!("bad count '{count}'"))?;
        Ok(Self {
            min_minutes,
            max_minutes,
            required_prior_count,
        })
    }
}

/// Parse a comma-separated bucket list, e.g. `10-20:0,180-200:1`.
pub fn parse_buckets(raw: &str) -> Result<Vec<FollowupBucket>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|spec| {
            FollowupBucket::parse(spec).map_err(|message| ConfigError::InvalidValue {
                key: "FOLLOWUP_BUCKETS".into(),
                message,
            })
        })
        .collect()
}

/// Full core configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the durable queue service.
    pub queue_url: String,
    /// Base URL of the internal state-store RPC.
    pub internal_api_base_url: String,
    /// Shared secret for the `X-Internal-Secret` header.
    pub internal_secret: SecretString,
    /// OpenAI-compatible chat-completions endpoint.
    pub llm_base_url: String,
    pub llm_model: String,
    pub llm_api_key: SecretString,
    /// Embeddings endpoint; falls back to the LLM endpoint/key.
    pub embedding_base_url: String,
    pub embedding_model: String,
    pub embedding_api_key: SecretString,
    /// Postgres DSN for the knowledge store. Retrieval is disabled when unset.
    pub database_url: Option<String>,
    /// Ingress gateway listen address.
    pub webhook_bind: String,
    /// HMAC app secret for webhook signatures. Validation skipped when unset.
    pub webhook_app_secret: Option<SecretString>,
    /// Token for the provider's hub-challenge verification handshake.
    pub webhook_verify_token: Option<String>,
    pub debounce_window: Duration,
    pub pipeline_budget: Duration,
    pub scheduler_interval: Duration,
    pub followup_buckets: Vec<FollowupBucket>,
    /// Presence of this file signals a running instance; `stop` removes it.
    pub liveness_file: String,
}

impl Config {
    /// Build configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let llm_base_url = require("LLM_BASE_URL")?;
        let llm_api_key = require("LLM_API_KEY")?;

        Ok(Self {
            queue_url: require("QUEUE_URL")?,
            internal_api_base_url: require("INTERNAL_API_BASE_URL")?,
            internal_secret: SecretString::from(require("INTERNAL_SECRET")?),
            embedding_base_url: optional("EMBEDDING_BASE_URL")
                .unwrap_or_else(|| llm_base_url.clone()),
            embedding_model: optional("EMBEDDING_MODEL")
                .unwrap_or_else(|| "text-embedding-3-small".to_string()),
            embedding_api_key: SecretString::from(
                optional("EMBEDDING_API_KEY").unwrap_or_else(|| llm_api_key.clone()),
            ),
            llm_base_url,
            llm_model: require("LLM_MODEL")?,
            llm_api_key: SecretString::from(llm_api_key),
            database_url: optional("DATABASE_URL"),
            webhook_bind: optional("WEBHOOK_BIND").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            webhook_app_secret: optional("WEBHOOK_APP_SECRET").map(SecretString::from),
            webhook_verify_token: optional("WEBHOOK_VERIFY_TOKEN"),
            debounce_window: Duration::from_secs(parsed_or(
                "DEBOUNCE_WINDOW_SECONDS",
                DEFAULT_DEBOUNCE_WINDOW_SECS,
            )),
            pipeline_budget: Duration::from_secs(parsed_or(
                "PIPELINE_BUDGET_SECONDS",
                DEFAULT_PIPELINE_BUDGET_SECS,
            )),
            scheduler_interval: Duration::from_secs(parsed_or(
                "SCHEDULER_INTERVAL_SECONDS",
                DEFAULT_SCHEDULER_INTERVAL_SECS,
            )),
            followup_buckets: parse_buckets(
                &optional("FOLLOWUP_BUCKETS").unwrap_or_else(|| DEFAULT_FOLLOWUP_BUCKETS.into()),
            )?,
            liveness_file: optional("LIVENESS_FILE")
                .unwrap_or_else(|| "/tmp/leadflow.alive".to_string()),
        })
    }
}

fn require(key: &str) -> Result<String, ConfigError> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

fn optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed_or(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_default_buckets() {
        let buckets = parse_buckets(DEFAULT_FOLLOWUP_BUCKETS).unwrap();
        assert_eq!(buckets.len(), 3);
        assert_eq!(
            buckets[0],
            FollowupBucket {
                min_minutes: 10,
                max_minutes: 20,
                required_prior_count: 0
            }
        );
        assert_eq!(buckets[2].required_prior_count, 2);
        assert_eq!(buckets[2].max_minutes, 400);
    }

    #[test]
    fn bucket_counts_are_monotonic_in_default() {
        let buckets = parse_buckets(DEFAULT_FOLLOWUP_BUCKETS).unwrap();
        for (i, b) in buckets.iter().enumerate() {
            assert_eq!(b.required_prior_count as usize, i);
        }
    }

    #[test]
    fn rejects_empty_window() {
        assert!(parse_buckets("20-10:0").is_err());
        assert!(parse_buckets("10-10:0").is_err());
    }

    #[test]
    fn rejects_malformed_specs() {
        assert!(parse_buckets("10-20").is_err());
        assert!(parse_buckets("abc-20:0").is_err());
        assert!(parse_buckets("10:0").is_err());
    }

    #[test]
    fn tolerates_whitespace_and_trailing_comma() {
        let buckets = parse_buckets(" 10-20:0 , 180-200:1 ,").unwrap();
        assert_eq!(buckets.len(), 2);
    }
}
