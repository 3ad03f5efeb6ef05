//! Job orchestration facade.
//!
//! The [`Orchestrator`] is the single entry point callers (the HTTP server
//! and the CLI) go through: trigger, status, cancel, health score, semantic
//! search, and the direct inference passthroughs. It owns admission control
//! and ties the dedup index, job state store, pipeline, and adapters
//! together.
//!
//! Admission is two semaphores. `admission` caps the total number of jobs in
//! the system (`max_concurrency + queue_capacity`); a trigger that cannot
//! take a permit without waiting is rejected with `Backpressure`. `runners`
//! caps concurrent pipeline executions at `max_concurrency`; spawned jobs
//! wait on it in submission order, which is the queue.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Notify, Semaphore};
use tracing::{error, info};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::dedup::{DedupIndex, Submission};
use crate::error::CoreError;
use crate::fingerprint::fingerprint;
use crate::inference::InferenceAdapter;
use crate::models::{
    AnalysisJob, AnalysisRequest, EmbeddingRecord, HealthScore, InsightBundle, JobStatus,
    Rationale, SearchHit, Trend,
};
use crate::pipeline::StagePipeline;
use crate::search_index::{new_record, SearchAdapter};
use crate::store::JobStateStore;

/// Score delta treated as noise when classifying the health trend.
const TREND_STABLE_BAND: f64 = 1.0;

/// How long a deduplicated trigger waits for the winning trigger's record
/// to become readable.
const DEDUP_READ_ATTEMPTS: u32 = 50;
const DEDUP_READ_INTERVAL: Duration = Duration::from_millis(5);

/// Per-job cancellation handle.
///
/// The flag is observed cooperatively at stage boundaries once the job is
/// running; the notify wakes a job still waiting for a runner slot so a
/// queued job cancels immediately instead of on its turn.
#[derive(Clone)]
struct CancelSignal {
    flag: Arc<AtomicBool>,
    queued: Arc<Notify>,
}

impl CancelSignal {
    fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            queued: Arc::new(Notify::new()),
        }
    }

    fn fire(&self) {
        self.flag.store(true, Ordering::SeqCst);
        // notify_one stores a permit, so a fire before the job task first
        // polls its queue wait is not lost.
        self.queued.notify_one();
    }
}

/// Outcome of a trigger call.
#[derive(Debug, Clone, Copy)]
pub struct Trigger {
    pub job_id: Uuid,
    /// True when the request matched a live job and no new work started.
    pub deduplicated: bool,
}

/// Component readiness, one flag per backing dependency.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct Readiness {
    pub store: bool,
    pub index: bool,
    pub inference: bool,
}

impl Readiness {
    pub fn ok(&self) -> bool {
        self.store && self.index && self.inference
    }
}

pub struct Orchestrator {
    store: JobStateStore,
    index: Arc<dyn SearchAdapter>,
    inference: Arc<dyn InferenceAdapter>,
    dedup: Arc<DedupIndex>,
    pipeline: Arc<StagePipeline>,
    admission: Arc<Semaphore>,
    runners: Arc<Semaphore>,
    active: Arc<Mutex<HashMap<Uuid, CancelSignal>>>,
    accepting: AtomicBool,
    drained: Arc<Notify>,
}

impl Orchestrator {
    pub fn new(
        store: JobStateStore,
        index: Arc<dyn SearchAdapter>,
        inference: Arc<dyn InferenceAdapter>,
        config: PipelineConfig,
    ) -> Arc<Self> {
        let pipeline = Arc::new(StagePipeline::new(
            store.clone(),
            inference.clone(),
            index.clone(),
            config.clone(),
        ));

        Arc::new(Self {
            store,
            index,
            inference,
            dedup: Arc::new(DedupIndex::new()),
            pipeline,
            admission: Arc::new(Semaphore::new(
                config.max_concurrency + config.queue_capacity,
            )),
            runners: Arc::new(Semaphore::new(config.max_concurrency)),
            active: Arc::new(Mutex::new(HashMap::new())),
            accepting: AtomicBool::new(true),
            drained: Arc::new(Notify::new()),
        })
    }

    /// Submit an analysis request.
    ///
    /// Identical requests (same fingerprint) return the live job instead of
    /// starting a second one. When both the runner pool and the queue are
    /// full the request is rejected with `Backpressure` and no job record is
    /// created.
    pub async fn trigger(self: &Arc<Self>, request: AnalysisRequest) -> Result<Trigger, CoreError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(CoreError::Backpressure(
                "service is shutting down".to_string(),
            ));
        }
        validate(&request)?;

        let fp = fingerprint(&request);
        let job_id = Uuid::new_v4();

        match self.dedup.submit(&fp, job_id) {
            Submission::Existing(existing) => {
                // The winning trigger publishes its reservation before its
                // record write completes; wait until the record is readable
                // so the caller can immediately fetch what we point at.
                for _ in 0..DEDUP_READ_ATTEMPTS {
                    match self.store.get(existing).await {
                        Ok(_) => {
                            info!(job_id = %existing, fingerprint = %fp, "deduplicated trigger");
                            return Ok(Trigger {
                                job_id: existing,
                                deduplicated: true,
                            });
                        }
                        Err(CoreError::NotFound(_)) => {
                            tokio::time::sleep(DEDUP_READ_INTERVAL).await;
                        }
                        Err(err) => return Err(err),
                    }
                }
                return Err(CoreError::Storage(format!(
                    "job '{}' is reserved but its record never became readable",
                    existing
                )));
            }
            Submission::Reserved => {}
        }

        // Reservation held from here on; every early return must release it.
        let permit = match self.admission.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.dedup.release(&fp, job_id);
                return Err(CoreError::Backpressure(
                    "analysis queue is full, retry later".to_string(),
                ));
            }
        };

        let job = AnalysisJob::new(job_id, fp.clone(), request);
        if let Err(err) = self.store.create(&job).await {
            self.dedup.release(&fp, job_id);
            return Err(err);
        }

        let signal = CancelSignal::new();
        self.active
            .lock()
            .expect("active job map lock poisoned")
            .insert(job_id, signal.clone());

        info!(job_id = %job_id, repository_id = %job.request.repository_id, "job accepted");

        let this = self.clone();
        tokio::spawn(async move {
            // Permits are acquired in submission order, so waiting here is
            // the queue. A cancel that lands during the wait finalizes the
            // job without it ever reaching a runner.
            tokio::select! {
                runner = this.runners.clone().acquire_owned() => {
                    let _runner = runner.expect("runner semaphore closed");
                    this.pipeline.run(job, signal.flag.clone()).await;
                }
                _ = signal.queued.notified() => {
                    let mut job = job;
                    if let Err(err) = this.store.finalize(&mut job, JobStatus::Canceled, None).await {
                        error!(job_id = %job_id, error = %err, "failed to persist queued-job cancellation");
                    }
                }
            }

            this.active
                .lock()
                .expect("active job map lock poisoned")
                .remove(&job_id);
            this.dedup.release(&fp, job_id);
            drop(permit);
            this.drained.notify_waiters();
        });

        Ok(Trigger {
            job_id,
            deduplicated: false,
        })
    }

    /// Current record of a job. `NotFound` for unknown ids.
    pub async fn get_status(&self, job_id: Uuid) -> Result<AnalysisJob, CoreError> {
        self.store.get(job_id).await
    }

    /// Request cancellation of a job.
    ///
    /// A queued job is canceled immediately, before it ever reaches a
    /// runner. A running job stops cooperatively at its next stage
    /// boundary. Canceling a job that is already terminal is a no-op.
    pub async fn cancel(&self, job_id: Uuid) -> Result<AnalysisJob, CoreError> {
        let job = self.store.get(job_id).await?;
        if job.status.is_terminal() {
            return Ok(job);
        }

        let signal = self
            .active
            .lock()
            .expect("active job map lock poisoned")
            .get(&job_id)
            .cloned();
        if let Some(signal) = signal {
            signal.fire();
            info!(job_id = %job_id, "cancellation requested");
        }

        self.store.get(job_id).await
    }

    /// Health score for a repository, derived from its latest succeeded
    /// analysis. `NotFound` until at least one analysis has succeeded.
    pub async fn health_score(&self, repository_id: &str) -> Result<HealthScore, CoreError> {
        let recent = self
            .store
            .adapter()
            .recent_succeeded(repository_id, 2)
            .await?;

        let latest = recent.first().ok_or_else(|| {
            CoreError::NotFound(format!(
                "no completed analysis for repository '{}'",
                repository_id
            ))
        })?;
        let result = latest.result.as_ref().ok_or_else(|| {
            CoreError::Storage(format!(
                "succeeded job '{}' has no result",
                latest.job_id
            ))
        })?;

        let trend = match recent.get(1).and_then(|j| j.result.as_ref()) {
            Some(previous) => {
                let delta = result.overall - previous.overall;
                if delta > TREND_STABLE_BAND {
                    Trend::Improving
                } else if delta < -TREND_STABLE_BAND {
                    Trend::Declining
                } else {
                    Trend::Stable
                }
            }
            None => Trend::Stable,
        };

        Ok(HealthScore {
            repository_id: repository_id.to_string(),
            overall: result.overall,
            dimensions: result.dimensions.clone(),
            trend,
            computed_at: latest.updated_at,
        })
    }

    /// Embed a query string and rank it against a repository's indexed
    /// embeddings.
    pub async fn semantic_search(
        &self,
        query: &str,
        repository_id: &str,
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<SearchHit>, CoreError> {
        if query.trim().is_empty() {
            return Err(CoreError::Validation("query must not be empty".to_string()));
        }
        if repository_id.trim().is_empty() {
            return Err(CoreError::Validation(
                "repository_id must not be empty".to_string(),
            ));
        }

        let vectors = self.inference.embed(&[query.to_string()]).await?;
        let vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::UpstreamRejected("no embedding returned".to_string()))?;

        self.index
            .similarity_search(&vector, repository_id, top_k, threshold)
            .await
    }

    /// Direct insight generation for an ad-hoc snippet, outside any job.
    pub async fn generate_insights(
        &self,
        code: &str,
        language: &str,
        context: Option<&serde_json::Value>,
    ) -> Result<InsightBundle, CoreError> {
        self.inference.generate_insights(code, language, context).await
    }

    /// Direct rationale generation for an ad-hoc snippet.
    pub async fn generate_rationale(
        &self,
        code: &str,
        language: &str,
    ) -> Result<Rationale, CoreError> {
        self.inference.generate_rationale(code, language).await
    }

    /// Embed one text and wrap it in a full embedding record, without
    /// indexing it. An explicit `model` must name the configured embedding
    /// model; anything else is rejected.
    pub async fn generate_embedding(
        &self,
        text: &str,
        repository_id: Option<&str>,
        source_id: Option<String>,
        model: Option<&str>,
    ) -> Result<EmbeddingRecord, CoreError> {
        if text.trim().is_empty() {
            return Err(CoreError::Validation("text must not be empty".to_string()));
        }
        if let Some(model) = model {
            if model != self.inference.embed_model() {
                return Err(CoreError::Validation(format!(
                    "unsupported embedding model '{}'; configured model is '{}'",
                    model,
                    self.inference.embed_model()
                )));
            }
        }

        let vectors = self.inference.embed(&[text.to_string()]).await?;
        let vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::UpstreamRejected("no embedding returned".to_string()))?;

        Ok(new_record(
            repository_id.unwrap_or(""),
            source_id,
            self.inference.embed_model(),
            vector,
        ))
    }

    /// Embed a batch of texts without indexing them.
    pub async fn generate_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CoreError> {
        if texts.is_empty() {
            return Err(CoreError::Validation(
                "texts must not be empty".to_string(),
            ));
        }
        self.inference.embed(texts).await
    }

    /// Ping every backing dependency.
    pub async fn readiness(&self) -> Readiness {
        Readiness {
            store: self.store.adapter().ping().await.is_ok(),
            index: self.index.ping().await.is_ok(),
            inference: self.inference.ping().await.is_ok(),
        }
    }

    /// Number of jobs currently queued or running.
    pub fn active_jobs(&self) -> usize {
        self.active
            .lock()
            .expect("active job map lock poisoned")
            .len()
    }

    /// Stop accepting triggers and wait for in-flight jobs to finish.
    pub async fn shutdown(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        info!("draining in-flight jobs");
        loop {
            let notified = self.drained.notified();
            if self.active_jobs() == 0 {
                return;
            }
            notified.await;
        }
    }
}

fn validate(request: &AnalysisRequest) -> Result<(), CoreError> {
    if request.repository_id.trim().is_empty() {
        return Err(CoreError::Validation(
            "repository_id must not be empty".to_string(),
        ));
    }
    if request.branch.trim().is_empty() {
        return Err(CoreError::Validation(
            "branch must not be empty".to_string(),
        ));
    }
    if let Some(paths) = &request.file_paths {
        if paths.iter().any(|p| p.trim().is_empty()) {
            return Err(CoreError::Validation(
                "file_paths entries must not be empty".to_string(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_blank_repository() {
        let request = AnalysisRequest {
            repository_id: "  ".to_string(),
            commit_reference: None,
            branch: "main".to_string(),
            analysis_kind: crate::models::AnalysisKind::Comprehensive,
            file_paths: None,
        };
        assert!(matches!(
            validate(&request),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn validate_rejects_blank_file_path_entry() {
        let request = AnalysisRequest {
            repository_id: "r1".to_string(),
            commit_reference: None,
            branch: "main".to_string(),
            analysis_kind: crate::models::AnalysisKind::Comprehensive,
            file_paths: Some(vec!["src/lib.rs".to_string(), "".to_string()]),
        };
        assert!(matches!(
            validate(&request),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn readiness_requires_all_components() {
        let ready = Readiness {
            store: true,
            index: true,
            inference: true,
        };
        assert!(ready.ok());
        let degraded = Readiness {
            store: true,
            index: false,
            inference: true,
        };
        assert!(!degraded.ok());
    }
}
