//! Durable storage adapter and the job state store layered on it.
//!
//! [`StoreAdapter`] is the narrow key-value capability interface: whole-job
//! put/get, atomic stage-result append, repository source snapshots, and the
//! queries the facade needs. Two backings exist: [`SqliteStore`] (production)
//! and [`MemoryStore`] (tests, dev mode).
//!
//! [`JobStateStore`] owns the consistency rules on top of whichever backing
//! is plugged in: jobs become terminal exactly once, a `succeeded` job always
//! carries a complete stage sequence, and every write is guarded by a
//! last-writer check on `updated_at`. One pipeline owns one job at a time by
//! construction; the check defends against misuse.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::{
    AnalysisJob, AnalysisResult, JobError, JobStatus, SourceFile, Stage, StageOutcome, StageResult,
};

#[async_trait]
pub trait StoreAdapter: Send + Sync {
    /// Write the whole job record, overwriting any previous version.
    async fn put_job(&self, job: &AnalysisJob) -> Result<(), CoreError>;

    /// Read a job record. `NotFound` for unknown ids.
    async fn get_job(&self, job_id: Uuid) -> Result<AnalysisJob, CoreError>;

    /// Append one stage result to a job's history and bump `updated_at`,
    /// atomically. Returns the updated record.
    async fn append_stage_result(
        &self,
        job_id: Uuid,
        result: &StageResult,
    ) -> Result<AnalysisJob, CoreError>;

    /// Replace a repository's source snapshot.
    async fn put_sources(&self, repository_id: &str, files: &[SourceFile])
        -> Result<(), CoreError>;

    /// Fetch a repository's source files, optionally restricted to specific
    /// paths. `NotFound` when the repository has no snapshot at all.
    async fn fetch_source(
        &self,
        repository_id: &str,
        paths: Option<&[String]>,
    ) -> Result<Vec<SourceFile>, CoreError>;

    /// The most recently updated succeeded jobs for a repository, newest
    /// first.
    async fn recent_succeeded(
        &self,
        repository_id: &str,
        limit: usize,
    ) -> Result<Vec<AnalysisJob>, CoreError>;

    /// Lightweight reachability check for readiness probes.
    async fn ping(&self) -> Result<(), CoreError>;
}

// ============ SQLite backing ============

/// SQLite-backed store. Each job is one row whose `record` column holds the
/// full JSON document; a row update is a single atomic write.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn encode_job(job: &AnalysisJob) -> Result<String, CoreError> {
    serde_json::to_string(job).map_err(|e| CoreError::Storage(format!("encode job: {}", e)))
}

fn decode_job(record: &str) -> Result<AnalysisJob, CoreError> {
    serde_json::from_str(record).map_err(|e| CoreError::Storage(format!("decode job: {}", e)))
}

#[async_trait]
impl StoreAdapter for SqliteStore {
    async fn put_job(&self, job: &AnalysisJob) -> Result<(), CoreError> {
        let record = encode_job(job)?;
        sqlx::query(
            r#"
            INSERT INTO jobs (job_id, fingerprint, repository_id, status, updated_at, record)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(job_id) DO UPDATE SET
                status = excluded.status,
                updated_at = excluded.updated_at,
                record = excluded.record
            "#,
        )
        .bind(job.job_id.to_string())
        .bind(&job.fingerprint)
        .bind(&job.request.repository_id)
        .bind(job.status.as_str())
        .bind(job.updated_at.timestamp_millis())
        .bind(record)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<AnalysisJob, CoreError> {
        let record: Option<String> =
            sqlx::query_scalar("SELECT record FROM jobs WHERE job_id = ?")
                .bind(job_id.to_string())
                .fetch_optional(&self.pool)
                .await?;

        match record {
            Some(record) => decode_job(&record),
            None => Err(CoreError::NotFound(format!("job '{}' not found", job_id))),
        }
    }

    async fn append_stage_result(
        &self,
        job_id: Uuid,
        result: &StageResult,
    ) -> Result<AnalysisJob, CoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CoreError::Storage(e.to_string()))?;

        let record: Option<String> =
            sqlx::query_scalar("SELECT record FROM jobs WHERE job_id = ?")
                .bind(job_id.to_string())
                .fetch_optional(&mut *tx)
                .await?;

        let mut job = match record {
            Some(record) => decode_job(&record)?,
            None => return Err(CoreError::NotFound(format!("job '{}' not found", job_id))),
        };

        job.stages.push(result.clone());
        job.updated_at = Utc::now();

        sqlx::query("UPDATE jobs SET updated_at = ?, record = ? WHERE job_id = ?")
            .bind(job.updated_at.timestamp_millis())
            .bind(encode_job(&job)?)
            .bind(job_id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit()
            .await
            .map_err(|e| CoreError::Storage(e.to_string()))?;

        Ok(job)
    }

    async fn put_sources(
        &self,
        repository_id: &str,
        files: &[SourceFile],
    ) -> Result<(), CoreError> {
        let now = Utc::now().timestamp();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CoreError::Storage(e.to_string()))?;

        sqlx::query("DELETE FROM sources WHERE repository_id = ?")
            .bind(repository_id)
            .execute(&mut *tx)
            .await?;

        for file in files {
            sqlx::query(
                "INSERT INTO sources (repository_id, path, content, ingested_at) VALUES (?, ?, ?, ?)",
            )
            .bind(repository_id)
            .bind(&file.path)
            .bind(&file.content)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit()
            .await
            .map_err(|e| CoreError::Storage(e.to_string()))?;

        Ok(())
    }

    async fn fetch_source(
        &self,
        repository_id: &str,
        paths: Option<&[String]>,
    ) -> Result<Vec<SourceFile>, CoreError> {
        let rows = sqlx::query("SELECT path, content FROM sources WHERE repository_id = ? ORDER BY path")
            .bind(repository_id)
            .fetch_all(&self.pool)
            .await?;

        if rows.is_empty() {
            return Err(CoreError::NotFound(format!(
                "no sources ingested for repository '{}'",
                repository_id
            )));
        }

        let mut files: Vec<SourceFile> = rows
            .into_iter()
            .map(|row| SourceFile {
                path: row.get("path"),
                content: row.get("content"),
            })
            .collect();

        if let Some(wanted) = paths {
            files.retain(|f| wanted.iter().any(|p| p == &f.path));
        }

        Ok(files)
    }

    async fn recent_succeeded(
        &self,
        repository_id: &str,
        limit: usize,
    ) -> Result<Vec<AnalysisJob>, CoreError> {
        let rows = sqlx::query(
            "SELECT record FROM jobs WHERE repository_id = ? AND status = 'succeeded' \
             ORDER BY updated_at DESC LIMIT ?",
        )
        .bind(repository_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| decode_job(row.get("record")))
            .collect()
    }

    async fn ping(&self) -> Result<(), CoreError> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }
}

// ============ In-memory backing ============

/// In-memory store for tests and dev mode.
#[derive(Default)]
pub struct MemoryStore {
    jobs: Mutex<HashMap<Uuid, AnalysisJob>>,
    sources: Mutex<HashMap<String, Vec<SourceFile>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StoreAdapter for MemoryStore {
    async fn put_job(&self, job: &AnalysisJob) -> Result<(), CoreError> {
        self.jobs
            .lock()
            .expect("job map lock poisoned")
            .insert(job.job_id, job.clone());
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<AnalysisJob, CoreError> {
        self.jobs
            .lock()
            .expect("job map lock poisoned")
            .get(&job_id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("job '{}' not found", job_id)))
    }

    async fn append_stage_result(
        &self,
        job_id: Uuid,
        result: &StageResult,
    ) -> Result<AnalysisJob, CoreError> {
        let mut jobs = self.jobs.lock().expect("job map lock poisoned");
        let job = jobs
            .get_mut(&job_id)
            .ok_or_else(|| CoreError::NotFound(format!("job '{}' not found", job_id)))?;
        job.stages.push(result.clone());
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    async fn put_sources(
        &self,
        repository_id: &str,
        files: &[SourceFile],
    ) -> Result<(), CoreError> {
        self.sources
            .lock()
            .expect("source map lock poisoned")
            .insert(repository_id.to_string(), files.to_vec());
        Ok(())
    }

    async fn fetch_source(
        &self,
        repository_id: &str,
        paths: Option<&[String]>,
    ) -> Result<Vec<SourceFile>, CoreError> {
        let sources = self.sources.lock().expect("source map lock poisoned");
        let mut files = sources
            .get(repository_id)
            .cloned()
            .ok_or_else(|| {
                CoreError::NotFound(format!(
                    "no sources ingested for repository '{}'",
                    repository_id
                ))
            })?;

        if let Some(wanted) = paths {
            files.retain(|f| wanted.iter().any(|p| p == &f.path));
        }

        Ok(files)
    }

    async fn recent_succeeded(
        &self,
        repository_id: &str,
        limit: usize,
    ) -> Result<Vec<AnalysisJob>, CoreError> {
        let jobs = self.jobs.lock().expect("job map lock poisoned");
        let mut succeeded: Vec<AnalysisJob> = jobs
            .values()
            .filter(|j| {
                j.request.repository_id == repository_id && j.status == JobStatus::Succeeded
            })
            .cloned()
            .collect();
        succeeded.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        succeeded.truncate(limit);
        Ok(succeeded)
    }

    async fn ping(&self) -> Result<(), CoreError> {
        Ok(())
    }
}

// ============ Job state store ============

/// Authoritative job-record API used by the facade and pipeline.
#[derive(Clone)]
pub struct JobStateStore {
    inner: Arc<dyn StoreAdapter>,
}

impl JobStateStore {
    pub fn new(inner: Arc<dyn StoreAdapter>) -> Self {
        Self { inner }
    }

    pub fn adapter(&self) -> &Arc<dyn StoreAdapter> {
        &self.inner
    }

    /// Persist a freshly created job. The dedup index guarantees no live job
    /// shares this fingerprint.
    pub async fn create(&self, job: &AnalysisJob) -> Result<(), CoreError> {
        self.inner.put_job(job).await
    }

    pub async fn get(&self, job_id: Uuid) -> Result<AnalysisJob, CoreError> {
        self.inner.get_job(job_id).await
    }

    /// Last-writer check: the caller's snapshot must match the stored record.
    async fn guard(&self, job: &AnalysisJob) -> Result<AnalysisJob, CoreError> {
        let current = self.inner.get_job(job.job_id).await?;
        if current.updated_at != job.updated_at {
            return Err(CoreError::Storage(format!(
                "stale write to job '{}': record changed underneath the caller",
                job.job_id
            )));
        }
        Ok(current)
    }

    /// Move the job to `running` at the given stage.
    pub async fn mark_running(
        &self,
        job: &mut AnalysisJob,
        stage: Stage,
    ) -> Result<(), CoreError> {
        let current = self.guard(job).await?;
        if current.status.is_terminal() {
            return Err(CoreError::Storage(format!(
                "job '{}' is already terminal ({})",
                job.job_id, current.status
            )));
        }

        job.status = JobStatus::Running;
        job.stage = Some(stage);
        job.updated_at = Utc::now();
        self.inner.put_job(job).await
    }

    /// Append one stage result to the job's history.
    pub async fn update_stage(
        &self,
        job: &mut AnalysisJob,
        result: StageResult,
    ) -> Result<(), CoreError> {
        self.guard(job).await?;
        *job = self.inner.append_stage_result(job.job_id, &result).await?;
        Ok(())
    }

    /// Attach the computed analysis result (persist stage).
    pub async fn attach_result(
        &self,
        job: &mut AnalysisJob,
        result: AnalysisResult,
    ) -> Result<(), CoreError> {
        self.guard(job).await?;
        job.result = Some(result);
        job.updated_at = Utc::now();
        self.inner.put_job(job).await
    }

    /// Transition the job to a terminal state. Exactly once: finalizing an
    /// already-terminal job is an error, and `succeeded` requires a result
    /// plus a complete, all-ok stage sequence.
    pub async fn finalize(
        &self,
        job: &mut AnalysisJob,
        status: JobStatus,
        error: Option<JobError>,
    ) -> Result<(), CoreError> {
        if !status.is_terminal() {
            return Err(CoreError::Storage(format!(
                "cannot finalize job '{}' to non-terminal status {}",
                job.job_id, status
            )));
        }

        let current = self.guard(job).await?;
        if current.status.is_terminal() {
            return Err(CoreError::Storage(format!(
                "job '{}' is already terminal ({})",
                job.job_id, current.status
            )));
        }

        if status == JobStatus::Succeeded {
            if job.result.is_none() {
                return Err(CoreError::Storage(format!(
                    "job '{}' cannot succeed without a result",
                    job.job_id
                )));
            }
            for stage in Stage::ALL {
                let completed = job
                    .stages
                    .iter()
                    .rev()
                    .find(|s| s.stage == stage)
                    .map(|s| s.outcome == StageOutcome::Ok)
                    .unwrap_or(false);
                if !completed {
                    return Err(CoreError::Storage(format!(
                        "job '{}' cannot succeed with incomplete stage '{}'",
                        job.job_id, stage
                    )));
                }
            }
        }

        job.status = status;
        job.error = error;
        if status != JobStatus::Succeeded {
            // Leave the last stage visible on failures; a queue-canceled job
            // never had one.
            if job.stages.is_empty() {
                job.stage = None;
            }
        } else {
            job.stage = None;
        }
        job.updated_at = Utc::now();
        self.inner.put_job(job).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::{AnalysisKind, AnalysisRequest};

    fn request() -> AnalysisRequest {
        AnalysisRequest {
            repository_id: "r1".to_string(),
            commit_reference: None,
            branch: "main".to_string(),
            analysis_kind: AnalysisKind::Comprehensive,
            file_paths: None,
        }
    }

    fn job() -> AnalysisJob {
        AnalysisJob::new(Uuid::new_v4(), "fp".to_string(), request())
    }

    fn ok_stage(stage: Stage) -> StageResult {
        let now = Utc::now();
        StageResult {
            stage,
            started_at: now,
            finished_at: now,
            outcome: StageOutcome::Ok,
            attempt_count: 1,
            payload: serde_json::json!({}),
        }
    }

    fn result() -> AnalysisResult {
        AnalysisResult {
            insights: Vec::new(),
            dimensions: Default::default(),
            overall: 100.0,
            files_analyzed: 0,
            embeddings_indexed: 0,
            model: "static".to_string(),
            tokens_used: 0,
        }
    }

    fn state_store() -> JobStateStore {
        JobStateStore::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn get_unknown_job_is_not_found() {
        let store = state_store();
        let err = store.get(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn finalize_is_terminal_exactly_once() {
        let store = state_store();
        let mut job = job();
        store.create(&job).await.unwrap();

        store
            .finalize(&mut job, JobStatus::Canceled, None)
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Canceled);

        let err = store
            .finalize(&mut job, JobStatus::Failed, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Storage(_)));
    }

    #[tokio::test]
    async fn succeed_requires_complete_stage_sequence() {
        let store = state_store();
        let mut job = job();
        store.create(&job).await.unwrap();

        store
            .update_stage(&mut job, ok_stage(Stage::FetchSource))
            .await
            .unwrap();
        store.attach_result(&mut job, result()).await.unwrap();

        let err = store
            .finalize(&mut job, JobStatus::Succeeded, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Storage(_)));

        for stage in [
            Stage::ComputeEmbeddings,
            Stage::ComputeInsights,
            Stage::PersistResults,
        ] {
            store.update_stage(&mut job, ok_stage(stage)).await.unwrap();
        }
        store
            .finalize(&mut job, JobStatus::Succeeded, None)
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn stale_writer_is_rejected() {
        let store = state_store();
        let mut job = job();
        store.create(&job).await.unwrap();

        // A second handle advances the record.
        let mut other = store.get(job.job_id).await.unwrap();
        store
            .update_stage(&mut other, ok_stage(Stage::FetchSource))
            .await
            .unwrap();

        // The original snapshot is now stale.
        let err = store
            .mark_running(&mut job, Stage::FetchSource)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Storage(_)));
    }

    #[tokio::test]
    async fn failed_job_records_error_verbatim() {
        let store = state_store();
        let mut job = job();
        store.create(&job).await.unwrap();

        store
            .finalize(
                &mut job,
                JobStatus::Failed,
                Some(JobError {
                    kind: ErrorKind::UpstreamUnavailable,
                    message: "model endpoint timed out".to_string(),
                }),
            )
            .await
            .unwrap();

        let read = store.get(job.job_id).await.unwrap();
        let error = read.error.unwrap();
        assert_eq!(error.kind, ErrorKind::UpstreamUnavailable);
        assert_eq!(error.message, "model endpoint timed out");
    }

    #[tokio::test]
    async fn memory_store_source_snapshots() {
        let store = MemoryStore::new();
        store
            .put_sources(
                "r1",
                &[
                    SourceFile {
                        path: "src/lib.rs".to_string(),
                        content: "pub fn x() {}".to_string(),
                    },
                    SourceFile {
                        path: "src/main.rs".to_string(),
                        content: "fn main() {}".to_string(),
                    },
                ],
            )
            .await
            .unwrap();

        let all = store.fetch_source("r1", None).await.unwrap();
        assert_eq!(all.len(), 2);

        let filtered = store
            .fetch_source("r1", Some(&["src/lib.rs".to_string()]))
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].path, "src/lib.rs");

        let err = store.fetch_source("ghost", None).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }
}
