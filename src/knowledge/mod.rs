//! Hybrid knowledge retrieval — vector + full-text with RRF fusion.
//!
//! One SQL round-trip per retrieval: cosine ranks over pgvector embeddings
//! and `ts_rank_cd` ranks over the full-text index, full-outer-joined and
//! fused with reciprocal ranks. A chunk is admitted by strength in either
//! channel (the dual gate), never by aggregate score alone.

pub mod embedding;

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::RetrievalError;
pub use embedding::{EmbeddingProvider, HttpEmbedder};

/// Stored embedding dimension. Provider-native vectors are truncated to
/// this before normalization (MRL-style truncation).
pub const EMBEDDING_DIM: usize = 768;

/// RRF smoothing constant per the retrieval literature.
pub const RRF_K: f64 = 60.0;

/// Why a chunk passed the dual gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchReason {
    Semantic,
    Keyword,
}

impl MatchReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Semantic => "semantic",
            Self::Keyword => "keyword",
        }
    }
}

/// A knowledge chunk that survived the dual gate.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub score: f64,
    pub reason: MatchReason,
}

/// Retrieval seam — mocked in pipeline tests.
#[async_trait]
pub trait KnowledgeRetriever: Send + Sync {
    async fn search(
        &self,
        query: &str,
        tenant_id: Uuid,
        top_k: i64,
        vector_threshold: f64,
        keyword_rank_threshold: i64,
    ) -> Result<Vec<RetrievedChunk>, RetrievalError>;
}

/// Truncate to `target_dim` and L2-normalize.
pub fn process_vector(mut vec: Vec<f64>, target_dim: usize) -> Vec<f64> {
    vec.truncate(target_dim);
    let norm = vec.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm == 0.0 {
        return vec;
    }
    vec.iter().map(|x| x / norm).collect()
}

/// `Σ 1/(k+rank)` over the channels the candidate appears in.
pub fn rrf_score(vec_rank: Option<i64>, key_rank: Option<i64>) -> f64 {
    let vec_term = vec_rank.map_or(0.0, |r| 1.0 / (RRF_K + r as f64));
    let key_term = key_rank.map_or(0.0, |r| 1.0 / (RRF_K + r as f64));
    vec_term + key_term
}

/// Dual gate: admit iff semantically strong OR lexically strong.
/// Semantic wins the label when both hold.
pub fn gate_reason(
    vec_sim: f64,
    key_rank: Option<i64>,
    vector_threshold: f64,
    keyword_rank_threshold: i64,
) -> Option<MatchReason> {
    let strong_semantic = vec_sim > vector_threshold;
    let strong_keyword = key_rank.is_some_and(|r| r <= keyword_rank_threshold);
    if strong_semantic {
        Some(MatchReason::Semantic)
    } else if strong_keyword {
        Some(MatchReason::Keyword)
    } else {
        None
    }
}

/// pgvector literal: `[0.1,0.2,…]`.
fn to_pgvector_literal(vec: &[f64]) -> String {
    let parts: Vec<String> = vec.iter().map(|f| format!("{f}")).collect();
    format!("[{}]", parts.join(","))
}

#[derive(sqlx::FromRow)]
struct CandidateRow {
    id: Uuid,
    title: String,
    content: String,
    vec_sim: f64,
    vec_rank: Option<i64>,
    key_rank: Option<i64>,
    rrf_score: f64,
}

/// Postgres-backed hybrid search over per-tenant knowledge chunks.
pub struct KnowledgeService {
    pool: PgPool,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl KnowledgeService {
    pub fn new(pool: PgPool, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { pool, embedder }
    }

    /// Ingest markdown content: split on blank lines, embed, insert.
    pub async fn ingest_markdown(
        &self,
        text: &str,
        tenant_id: Uuid,
        title_prefix: &str,
    ) -> Result<usize, RetrievalError> {
        self.save_splits(split_markdown(text), tenant_id, title_prefix)
            .await
    }

    /// Ingest flat text with a fixed sliding window (1000 chars, 200 overlap).
    pub async fn ingest_text(
        &self,
        text: &str,
        tenant_id: Uuid,
        title_prefix: &str,
    ) -> Result<usize, RetrievalError> {
        self.save_splits(recursive_split(text, 1000, 200), tenant_id, title_prefix)
            .await
    }

    async fn save_splits(
        &self,
        splits: Vec<String>,
        tenant_id: Uuid,
        title_prefix: &str,
    ) -> Result<usize, RetrievalError> {
        let title = if title_prefix.is_empty() {
            "General Knowledge"
        } else {
            title_prefix
        };
        let mut count = 0usize;
        for content in splits {
            let raw = self.embedder.embed_document(&content).await?;
            let vector = process_vector(raw, EMBEDDING_DIM);
            sqlx::query(
                "INSERT INTO knowledge_items (id, tenant_id, title, content, embedding, search_vector)
                 VALUES ($1, $2, $3, $4, $5::vector, to_tsvector('english', $4))",
            )
            .bind(Uuid::new_v4())
            .bind(tenant_id)
            .bind(title)
            .bind(&content)
            .bind(to_pgvector_literal(&vector))
            .execute(&self.pool)
            .await?;
            count += 1;
        }
        Ok(count)
    }
}

#[async_trait]
impl KnowledgeRetriever for KnowledgeService {
    async fn search(
        &self,
        query: &str,
        tenant_id: Uuid,
        top_k: i64,
        vector_threshold: f64,
        keyword_rank_threshold: i64,
    ) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        let raw = self.embedder.embed_query(query).await?;
        let query_vector = to_pgvector_literal(&process_vector(raw, EMBEDDING_DIM));

        let rows: Vec<CandidateRow> = sqlx::query_as(
            r#"
            WITH vector_results AS (
                SELECT id, title, content,
                       1 - (embedding <=> $1::vector) AS vec_sim,
                       row_number() OVER (ORDER BY embedding <=> $1::vector) AS vec_rank
                FROM knowledge_items
                WHERE tenant_id = $2
                LIMIT $3
            ),
            keyword_results AS (
                SELECT id, title, content,
                       row_number() OVER (
                           ORDER BY ts_rank_cd(search_vector, websearch_to_tsquery('english', $4)) DESC
                       ) AS key_rank
                FROM knowledge_items
                WHERE tenant_id = $2
                  AND search_vector @@ websearch_to_tsquery('english', $4)
                LIMIT $3
            )
            SELECT COALESCE(v.id, k.id) AS id,
                   COALESCE(v.title, k.title) AS title,
                   COALESCE(v.content, k.content) AS content,
                   COALESCE(v.vec_sim, 0.0)::double precision AS vec_sim,
                   v.vec_rank AS vec_rank,
                   k.key_rank AS key_rank,
                   (COALESCE(1.0 / (60 + v.vec_rank), 0)
                    + COALESCE(1.0 / (60 + k.key_rank), 0))::double precision AS rrf_score
            FROM vector_results v
            FULL OUTER JOIN keyword_results k ON v.id = k.id
            "#,
        )
        .bind(&query_vector)
        .bind(tenant_id)
        .bind(top_k)
        .bind(query)
        .fetch_all(&self.pool)
        .await?;

        let mut chunks: Vec<RetrievedChunk> = rows
            .into_iter()
            .filter_map(|row| {
                gate_reason(
                    row.vec_sim,
                    row.key_rank,
                    vector_threshold,
                    keyword_rank_threshold,
                )
                .map(|reason| RetrievedChunk {
                    id: row.id,
                    title: row.title,
                    content: row.content,
                    score: row.rrf_score,
                    reason,
                })
            })
            .collect();

        chunks.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        tracing::debug!(
            tenant = %tenant_id,
            admitted = chunks.len(),
            "knowledge search complete"
        );
        Ok(chunks)
    }
}

// ── Splitters ───────────────────────────────────────────────────────

fn split_markdown(text: &str) -> Vec<String> {
    text.split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect()
}

fn recursive_split(text: &str, size: usize, overlap: usize) -> Vec<String> {
    if text.len() <= size {
        return vec![text.to_string()];
    }
    let bytes = text.as_bytes();
    let mut chunks = Vec::new();
    let mut start = 0usize;
    loop {
        let end = (start + size).min(bytes.len());
        // Chunk on char boundaries to stay valid UTF-8.
        let mut safe_start = start;
        while !text.is_char_boundary(safe_start) {
            safe_start += 1;
        }
        let mut safe_end = end;
        while !text.is_char_boundary(safe_end) {
            safe_end -= 1;
        }
        chunks.push(text[safe_start..safe_end].to_string());
        if end == bytes.len() {
            break;
        }
        start += size - overlap;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_vector_truncates_and_normalizes() {
        let long: Vec<f64> = (0..1000).map(|i| (i % 7) as f64 + 1.0).collect();
        let out = process_vector(long, EMBEDDING_DIM);
        assert_eq!(out.len(), EMBEDDING_DIM);
        let norm: f64 = out.iter().map(|x| x * x).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-9);
    }

    #[test]
    fn process_vector_zero_vector_is_untouched() {
        let out = process_vector(vec![0.0; 10], EMBEDDING_DIM);
        assert_eq!(out, vec![0.0; 10]);
    }

    #[test]
    fn rrf_matches_both_channel_formula() {
        // Present in both with ranks (1, 3): 1/61 + 1/63.
        let expected = 1.0 / 61.0 + 1.0 / 63.0;
        assert!((rrf_score(Some(1), Some(3)) - expected).abs() < 1e-12);
    }

    #[test]
    fn rrf_missing_rank_contributes_zero() {
        assert!((rrf_score(Some(2), None) - 1.0 / 62.0).abs() < 1e-12);
        assert!((rrf_score(None, Some(2)) - 1.0 / 62.0).abs() < 1e-12);
        assert_eq!(rrf_score(None, None), 0.0);
    }

    #[test]
    fn dual_gate_admits_semantic_strength() {
        assert_eq!(
            gate_reason(0.80, None, 0.65, 5),
            Some(MatchReason::Semantic)
        );
    }

    #[test]
    fn dual_gate_admits_keyword_strength() {
        assert_eq!(
            gate_reason(0.10, Some(3), 0.65, 5),
            Some(MatchReason::Keyword)
        );
        assert_eq!(gate_reason(0.10, Some(5), 0.65, 5), Some(MatchReason::Keyword));
    }

    #[test]
    fn dual_gate_rejects_mediocre_in_both() {
        assert_eq!(gate_reason(0.50, Some(9), 0.65, 5), None);
        assert_eq!(gate_reason(0.65, None, 0.65, 5), None); // threshold is strict
    }

    #[test]
    fn dual_gate_prefers_semantic_label() {
        assert_eq!(
            gate_reason(0.90, Some(1), 0.65, 5),
            Some(MatchReason::Semantic)
        );
    }

    #[test]
    fn pgvector_literal_shape() {
        assert_eq!(to_pgvector_literal(&[1.0, 0.5]), "[1,0.5]");
        assert_eq!(to_pgvector_literal(&[]), "[]");
    }

    #[test]
    fn markdown_split_drops_blank_paragraphs() {
        let chunks = split_markdown("first\n\n\n\nsecond para\n\n  \n\nthird");
        assert_eq!(chunks, vec!["first", "second para", "third"]);
    }

    #[test]
    fn recursive_split_windows_overlap() {
        let text = "a".repeat(2500);
        let chunks = recursive_split(&text, 1000, 200);
        assert!(chunks.len() >= 3);
        assert_eq!(chunks[0].len(), 1000);
        // Each step advances by size - overlap.
        assert!(chunks.last().unwrap().len() <= 1000);
    }

    #[test]
    fn recursive_split_short_text_is_single_chunk() {
        let chunks = recursive_split("short", 1000, 200);
        assert_eq!(chunks, vec!["short"]);
    }
}
