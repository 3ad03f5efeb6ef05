//! Vector search adapter.
//!
//! Defines the [`SearchAdapter`] capability interface and two backings:
//! - **[`SqliteIndex`]** — embeddings stored as little-endian f32 BLOBs in
//!   SQLite, scored with in-process cosine similarity.
//! - **[`MemoryIndex`]** — in-memory backing for tests and dev mode.
//!
//! Ranking contract: results are sorted by descending score, ties broken by
//! insertion order; entries below the threshold are excluded; `top_k = 0`
//! returns an empty list. A repository with no indexed embeddings at all is
//! `NotFound` — distinct from a computed-but-empty result set.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::{EmbeddingRecord, SearchHit};

#[async_trait]
pub trait SearchAdapter: Send + Sync {
    /// Add an embedding to the index.
    async fn index_embedding(&self, record: &EmbeddingRecord) -> Result<(), CoreError>;

    /// Ranked similarity search within one repository's embeddings.
    async fn similarity_search(
        &self,
        query: &[f32],
        repository_id: &str,
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<SearchHit>, CoreError>;

    /// Lightweight reachability check for readiness probes.
    async fn ping(&self) -> Result<(), CoreError>;
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors or vectors
/// of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Score, filter, and rank candidates. `candidates` must be iterated in
/// insertion order so the stable sort preserves it on score ties.
fn rank(
    candidates: impl IntoIterator<Item = (Uuid, Option<String>, Vec<f32>)>,
    query: &[f32],
    top_k: usize,
    threshold: f32,
) -> Vec<SearchHit> {
    if top_k == 0 {
        return Vec::new();
    }

    let mut hits: Vec<SearchHit> = candidates
        .into_iter()
        .map(|(embedding_id, source_id, vector)| SearchHit {
            embedding_id,
            source_id,
            score: cosine_similarity(query, &vector),
        })
        .filter(|hit| hit.score >= threshold)
        .collect();

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(top_k);
    hits
}

// ============ SQLite index ============

/// SQLite-backed vector index over the `embeddings` table.
#[derive(Clone)]
pub struct SqliteIndex {
    pool: SqlitePool,
}

impl SqliteIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SearchAdapter for SqliteIndex {
    async fn index_embedding(&self, record: &EmbeddingRecord) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO embeddings (embedding_id, repository_id, source_id, model, vector, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(embedding_id) DO UPDATE SET
                repository_id = excluded.repository_id,
                source_id = excluded.source_id,
                model = excluded.model,
                vector = excluded.vector,
                created_at = excluded.created_at
            "#,
        )
        .bind(record.embedding_id.to_string())
        .bind(&record.repository_id)
        .bind(&record.source_id)
        .bind(&record.model)
        .bind(vec_to_blob(&record.vector))
        .bind(record.created_at.timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn similarity_search(
        &self,
        query: &[f32],
        repository_id: &str,
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<SearchHit>, CoreError> {
        // rowid order = insertion order, which decides score ties.
        let rows = sqlx::query(
            "SELECT embedding_id, source_id, vector FROM embeddings WHERE repository_id = ? ORDER BY rowid",
        )
        .bind(repository_id)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Err(CoreError::NotFound(format!(
                "no embeddings indexed for repository '{}'",
                repository_id
            )));
        }

        let mut candidates = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("embedding_id");
            let embedding_id = Uuid::parse_str(&id)
                .map_err(|e| CoreError::Storage(format!("corrupt embedding id '{}': {}", id, e)))?;
            let source_id: Option<String> = row.get("source_id");
            let blob: Vec<u8> = row.get("vector");
            candidates.push((embedding_id, source_id, blob_to_vec(&blob)));
        }

        Ok(rank(candidates, query, top_k, threshold))
    }

    async fn ping(&self) -> Result<(), CoreError> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }
}

// ============ In-memory index ============

/// In-memory vector index. Deterministic backing for tests and the `static`
/// dev profile; keeps records in insertion order.
#[derive(Default)]
pub struct MemoryIndex {
    entries: Mutex<Vec<EmbeddingRecord>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("memory index lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SearchAdapter for MemoryIndex {
    async fn index_embedding(&self, record: &EmbeddingRecord) -> Result<(), CoreError> {
        let mut entries = self.entries.lock().expect("memory index lock poisoned");
        // Upsert keeps the original insertion position, matching the SQLite
        // backing's ON CONFLICT behavior.
        match entries
            .iter_mut()
            .find(|r| r.embedding_id == record.embedding_id)
        {
            Some(existing) => *existing = record.clone(),
            None => entries.push(record.clone()),
        }
        Ok(())
    }

    async fn similarity_search(
        &self,
        query: &[f32],
        repository_id: &str,
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<SearchHit>, CoreError> {
        let entries = self.entries.lock().expect("memory index lock poisoned");

        let candidates: Vec<_> = entries
            .iter()
            .filter(|r| r.repository_id == repository_id)
            .map(|r| (r.embedding_id, r.source_id.clone(), r.vector.clone()))
            .collect();

        if candidates.is_empty() {
            return Err(CoreError::NotFound(format!(
                "no embeddings indexed for repository '{}'",
                repository_id
            )));
        }

        Ok(rank(candidates, query, top_k, threshold))
    }

    async fn ping(&self) -> Result<(), CoreError> {
        Ok(())
    }
}

/// Build an [`EmbeddingRecord`] for a freshly computed vector.
///
/// Records with a `source_id` get a stable embedding id derived from
/// `(repository, source, model)`, so re-indexing the same source upserts
/// instead of accumulating duplicates when a stage retries or a repository
/// is re-analyzed. Ad-hoc records without a source get a random id.
pub fn new_record(
    repository_id: &str,
    source_id: Option<String>,
    model: &str,
    vector: Vec<f32>,
) -> EmbeddingRecord {
    let embedding_id = match &source_id {
        Some(source) => stable_embedding_id(repository_id, source, model),
        None => Uuid::new_v4(),
    };
    EmbeddingRecord {
        embedding_id,
        repository_id: repository_id.to_string(),
        source_id,
        model: model.to_string(),
        vector,
        created_at: Utc::now(),
    }
}

fn stable_embedding_id(repository_id: &str, source_id: &str, model: &str) -> Uuid {
    let mut hasher = Sha256::new();
    hasher.update(repository_id.as_bytes());
    hasher.update([0x1f]);
    hasher.update(source_id.as_bytes());
    hasher.update([0x1f]);
    hasher.update(model.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        let restored = blob_to_vec(&blob);
        assert_eq!(vec, restored);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    fn record(repo: &str, source: &str, vector: Vec<f32>) -> EmbeddingRecord {
        new_record(repo, Some(source.to_string()), "test-model", vector)
    }

    #[tokio::test]
    async fn search_ranks_descending_and_filters_threshold() {
        let index = MemoryIndex::new();
        // Scores against query [1, 0]: 0.9..., 0.75-ish, 0.5-ish via angles.
        index.index_embedding(&record("r1", "high", vec![1.0, 0.1])).await.unwrap();
        index.index_embedding(&record("r1", "low", vec![0.5, 1.0])).await.unwrap();
        index.index_embedding(&record("r1", "mid", vec![1.0, 0.5])).await.unwrap();

        let hits = index
            .similarity_search(&[1.0, 0.0], "r1", 5, 0.7)
            .await
            .unwrap();

        let sources: Vec<&str> = hits
            .iter()
            .map(|h| h.source_id.as_deref().unwrap())
            .collect();
        assert_eq!(sources, vec!["high", "mid"]);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(hits.iter().all(|h| h.score >= 0.7));
    }

    #[tokio::test]
    async fn search_top_k_zero_returns_empty() {
        let index = MemoryIndex::new();
        index.index_embedding(&record("r1", "a", vec![1.0, 0.0])).await.unwrap();

        let hits = index
            .similarity_search(&[1.0, 0.0], "r1", 0, 0.0)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn search_ties_break_by_insertion_order() {
        let index = MemoryIndex::new();
        let first = record("r1", "first", vec![2.0, 0.0]);
        let second = record("r1", "second", vec![1.0, 0.0]);
        index.index_embedding(&first).await.unwrap();
        index.index_embedding(&second).await.unwrap();

        // Both are colinear with the query: identical scores.
        let hits = index
            .similarity_search(&[1.0, 0.0], "r1", 5, 0.5)
            .await
            .unwrap();
        assert_eq!(hits[0].embedding_id, first.embedding_id);
        assert_eq!(hits[1].embedding_id, second.embedding_id);
    }

    #[tokio::test]
    async fn search_missing_repository_is_not_found() {
        let index = MemoryIndex::new();
        let err = index
            .similarity_search(&[1.0, 0.0], "ghost", 5, 0.0)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn search_below_threshold_is_empty_not_error() {
        let index = MemoryIndex::new();
        index.index_embedding(&record("r1", "a", vec![0.0, 1.0])).await.unwrap();

        let hits = index
            .similarity_search(&[1.0, 0.0], "r1", 5, 0.9)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }
}
