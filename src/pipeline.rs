//! Stage pipeline executor.
//!
//! Drives one job through the fixed stage order `fetch_source →
//! compute_embeddings → compute_insights → persist_results`. Each stage is a
//! unit of work against a capability adapter, bounded by the configured
//! per-stage timeout. Retryable failures back off exponentially (honoring a
//! rate-limit hint when the upstream provides one) up to `max_attempts`;
//! non-retryable failures end the job immediately with the error recorded
//! verbatim. Stages are strictly sequential within a job.
//!
//! Cancellation is cooperative: the cancel flag is observed at stage
//! boundaries only. An in-progress adapter call is never torn down; the
//! current stage completes (or times out) before the pipeline halts.
//!
//! Every attempt emits one structured event (job id, stage, outcome,
//! attempt, elapsed ms) for external instrumentation.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::error::CoreError;
use crate::inference::InferenceAdapter;
use crate::models::{
    AnalysisJob, AnalysisResult, Insight, InsightBundle, JobError, JobStatus, Severity,
    SourceFile, Stage, StageOutcome, StageResult,
};
use crate::search_index::{new_record, SearchAdapter};
use crate::store::JobStateStore;

/// Per-file character budget for embedding input.
const EMBED_CHUNK_CHARS: usize = 2000;

/// Character budget for the insight prompt across all files.
const INSIGHT_CONTEXT_CHARS: usize = 12_000;

/// Backoff doubling cap: delays grow up to `base << 5`.
const BACKOFF_SHIFT_CAP: u32 = 5;

/// The six health dimensions scored by every analysis.
pub const DIMENSIONS: [&str; 6] = [
    "coupling",
    "cohesion",
    "complexity",
    "security",
    "performance",
    "documentation",
];

pub struct StagePipeline {
    store: JobStateStore,
    inference: Arc<dyn InferenceAdapter>,
    index: Arc<dyn SearchAdapter>,
    config: PipelineConfig,
}

/// State carried between stages of one job.
#[derive(Default)]
struct Scratch {
    files: Vec<SourceFile>,
    embeddings_indexed: usize,
    bundle: Option<InsightBundle>,
}

impl StagePipeline {
    pub fn new(
        store: JobStateStore,
        inference: Arc<dyn InferenceAdapter>,
        index: Arc<dyn SearchAdapter>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            inference,
            index,
            config,
        }
    }

    /// Run the full stage sequence for a job and return it in its terminal
    /// state. The caller owns the job record for the duration of the run.
    pub async fn run(&self, mut job: AnalysisJob, cancel: Arc<AtomicBool>) -> AnalysisJob {
        let mut scratch = Scratch::default();

        for stage in Stage::ALL {
            if cancel.load(Ordering::SeqCst) {
                self.finish(&mut job, JobStatus::Canceled, None).await;
                return job;
            }

            if let Err(err) = self.store.mark_running(&mut job, stage).await {
                error!(job_id = %job.job_id, stage = %stage, error = %err, "failed to advance job");
                self.finish(&mut job, JobStatus::Failed, Some(err)).await;
                return job;
            }

            if let Err(err) = self.run_stage(stage, &mut job, &mut scratch).await {
                self.finish(&mut job, JobStatus::Failed, Some(err)).await;
                return job;
            }
        }

        self.finish(&mut job, JobStatus::Succeeded, None).await;
        job
    }

    /// Run one stage with retry, timeout, and history bookkeeping.
    async fn run_stage(
        &self,
        stage: Stage,
        job: &mut AnalysisJob,
        scratch: &mut Scratch,
    ) -> Result<(), CoreError> {
        let timeout = Duration::from_secs(self.config.stage_timeout_secs);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let started_at = Utc::now();
            let start = Instant::now();

            let outcome = match tokio::time::timeout(
                timeout,
                self.execute(stage, job, scratch),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(CoreError::UpstreamUnavailable(format!(
                    "stage {} timed out after {}s",
                    stage, self.config.stage_timeout_secs
                ))),
            };
            let elapsed_ms = start.elapsed().as_millis() as u64;

            match outcome {
                Ok(payload) => {
                    info!(
                        job_id = %job.job_id,
                        stage = %stage,
                        outcome = "ok",
                        attempt,
                        elapsed_ms,
                        "stage complete"
                    );
                    self.store
                        .update_stage(
                            job,
                            StageResult {
                                stage,
                                started_at,
                                finished_at: Utc::now(),
                                outcome: StageOutcome::Ok,
                                attempt_count: attempt,
                                payload,
                            },
                        )
                        .await?;
                    return Ok(());
                }
                Err(err) if err.is_retryable() && attempt < self.config.max_attempts => {
                    warn!(
                        job_id = %job.job_id,
                        stage = %stage,
                        outcome = "retried",
                        attempt,
                        elapsed_ms,
                        error = %err,
                        "stage attempt failed, retrying"
                    );
                    self.store
                        .update_stage(
                            job,
                            StageResult {
                                stage,
                                started_at,
                                finished_at: Utc::now(),
                                outcome: StageOutcome::Retried,
                                attempt_count: attempt,
                                payload: serde_json::json!({ "error": err.to_string() }),
                            },
                        )
                        .await?;
                    tokio::time::sleep(self.backoff_delay(&err, attempt)).await;
                }
                Err(err) => {
                    error!(
                        job_id = %job.job_id,
                        stage = %stage,
                        outcome = "failed",
                        attempt,
                        elapsed_ms,
                        error = %err,
                        "stage failed"
                    );
                    self.store
                        .update_stage(
                            job,
                            StageResult {
                                stage,
                                started_at,
                                finished_at: Utc::now(),
                                outcome: StageOutcome::Failed,
                                attempt_count: attempt,
                                payload: serde_json::json!({ "error": err.to_string() }),
                            },
                        )
                        .await?;
                    return Err(err);
                }
            }
        }
    }

    fn backoff_delay(&self, err: &CoreError, attempt: u32) -> Duration {
        if let CoreError::RateLimited {
            retry_after_ms: Some(ms),
            ..
        } = err
        {
            return Duration::from_millis(*ms);
        }
        let shift = (attempt - 1).min(BACKOFF_SHIFT_CAP);
        Duration::from_millis(self.config.backoff_base_ms << shift)
    }

    /// The actual unit of work per stage.
    async fn execute(
        &self,
        stage: Stage,
        job: &mut AnalysisJob,
        scratch: &mut Scratch,
    ) -> Result<serde_json::Value, CoreError> {
        match stage {
            Stage::FetchSource => {
                let files = self
                    .store
                    .adapter()
                    .fetch_source(
                        &job.request.repository_id,
                        job.request.file_paths.as_deref(),
                    )
                    .await?;
                if files.is_empty() {
                    return Err(CoreError::NotFound(format!(
                        "no matching source files in repository '{}'",
                        job.request.repository_id
                    )));
                }
                let payload = serde_json::json!({ "files": files.len() });
                scratch.files = files;
                Ok(payload)
            }
            Stage::ComputeEmbeddings => {
                let texts: Vec<String> = scratch
                    .files
                    .iter()
                    .map(|f| {
                        let body: String = f.content.chars().take(EMBED_CHUNK_CHARS).collect();
                        format!("{}\n{}", f.path, body)
                    })
                    .collect();

                let vectors = self.inference.embed(&texts).await?;
                if vectors.len() != scratch.files.len() {
                    return Err(CoreError::UpstreamRejected(format!(
                        "embedding count mismatch: {} files, {} vectors",
                        scratch.files.len(),
                        vectors.len()
                    )));
                }

                for (file, vector) in scratch.files.iter().zip(vectors) {
                    let record = new_record(
                        &job.request.repository_id,
                        Some(file.path.clone()),
                        self.inference.embed_model(),
                        vector,
                    );
                    self.index.index_embedding(&record).await?;
                }

                scratch.embeddings_indexed = scratch.files.len();
                Ok(serde_json::json!({
                    "embeddings": scratch.embeddings_indexed,
                    "model": self.inference.embed_model(),
                }))
            }
            Stage::ComputeInsights => {
                let code = build_insight_context(&scratch.files);
                let language = dominant_language(&scratch.files);
                let context = serde_json::json!({
                    "repository_id": job.request.repository_id,
                    "analysis_kind": job.request.analysis_kind,
                });

                let bundle = self
                    .inference
                    .generate_insights(&code, language, Some(&context))
                    .await?;

                let payload = serde_json::json!({
                    "insights": bundle.insights.len(),
                    "model": bundle.model,
                });
                scratch.bundle = Some(bundle);
                Ok(payload)
            }
            Stage::PersistResults => {
                let bundle = scratch.bundle.take().ok_or_else(|| {
                    CoreError::Storage("insights missing before persist stage".to_string())
                })?;
                let (dimensions, overall) = score_dimensions(&bundle.insights);

                let result = AnalysisResult {
                    insights: bundle.insights,
                    dimensions,
                    overall,
                    files_analyzed: scratch.files.len(),
                    embeddings_indexed: scratch.embeddings_indexed,
                    model: bundle.model,
                    tokens_used: bundle.tokens_used,
                };
                let payload = serde_json::json!({ "overall": result.overall });

                self.store.attach_result(job, result).await?;
                Ok(payload)
            }
        }
    }

    /// Finalize the job, logging instead of propagating if the store itself
    /// is down — the record cannot be saved, but the run must still end.
    async fn finish(&self, job: &mut AnalysisJob, status: JobStatus, cause: Option<CoreError>) {
        let error = cause.map(|e| JobError {
            kind: e.kind(),
            message: e.to_string(),
        });

        if let Err(store_err) = self.store.finalize(job, status, error.clone()).await {
            error!(
                job_id = %job.job_id,
                status = %status,
                error = %store_err,
                "failed to persist terminal job state"
            );
            // Keep the in-memory copy truthful for the caller.
            job.status = status;
            job.error = error;
        }

        info!(job_id = %job.job_id, status = %status, "job finished");
    }
}

/// Concatenate file bodies into a bounded prompt context.
fn build_insight_context(files: &[SourceFile]) -> String {
    let mut context = String::new();
    for file in files {
        if context.len() >= INSIGHT_CONTEXT_CHARS {
            break;
        }
        let remaining = INSIGHT_CONTEXT_CHARS - context.len();
        context.push_str("// ");
        context.push_str(&file.path);
        context.push('\n');
        context.extend(file.content.chars().take(remaining));
        context.push('\n');
    }
    context
}

/// Pick the most common source language by file extension.
fn dominant_language(files: &[SourceFile]) -> &'static str {
    let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
    for file in files {
        let language = match file.path.rsplit('.').next() {
            Some("rs") => "rust",
            Some("ts") | Some("tsx") | Some("js") | Some("jsx") => "typescript",
            Some("py") => "python",
            Some("go") => "go",
            Some("java") => "java",
            _ => "text",
        };
        *counts.entry(language).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by_key(|(_, count)| *count)
        .map(|(language, _)| language)
        .unwrap_or("text")
}

/// Score the six health dimensions from a set of insights.
///
/// Each dimension starts at 100; every insight deducts a severity weight
/// scaled by its confidence from the dimension its category maps onto.
/// Scores are clamped to `[0, 100]`; the overall score is their mean.
pub fn score_dimensions(insights: &[Insight]) -> (BTreeMap<String, f64>, f64) {
    let mut dimensions: BTreeMap<String, f64> =
        DIMENSIONS.iter().map(|d| (d.to_string(), 100.0)).collect();

    for insight in insights {
        let dimension = match insight.category.as_str() {
            "dependency" => "coupling",
            "architecture" => "cohesion",
            category if DIMENSIONS.contains(&category) => category,
            _ => "complexity",
        };
        let weight = match insight.severity {
            Severity::Critical => 25.0,
            Severity::Warning => 10.0,
            Severity::Info => 3.0,
        };
        let deduction = weight * insight.confidence.clamp(0.0, 1.0);
        if let Some(score) = dimensions.get_mut(dimension) {
            *score = (*score - deduction).clamp(0.0, 100.0);
        }
    }

    let overall = dimensions.values().sum::<f64>() / dimensions.len() as f64;
    (dimensions, overall)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    use async_trait::async_trait;
    use uuid::Uuid;

    use crate::error::ErrorKind;
    use crate::inference::StaticInference;
    use crate::models::{AnalysisKind, AnalysisRequest, Rationale};
    use crate::search_index::MemoryIndex;
    use crate::store::{MemoryStore, StoreAdapter};

    fn test_config() -> PipelineConfig {
        PipelineConfig {
            max_attempts: 3,
            stage_timeout_secs: 30,
            backoff_base_ms: 1,
            max_concurrency: 2,
            queue_capacity: 4,
        }
    }

    fn request(repo: &str) -> AnalysisRequest {
        AnalysisRequest {
            repository_id: repo.to_string(),
            commit_reference: None,
            branch: "main".to_string(),
            analysis_kind: AnalysisKind::Comprehensive,
            file_paths: None,
        }
    }

    async fn seeded_store(repo: &str) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .put_sources(
                repo,
                &[
                    SourceFile {
                        path: "src/lib.rs".to_string(),
                        content: "pub mod auth;".to_string(),
                    },
                    SourceFile {
                        path: "src/auth.rs".to_string(),
                        content: "pub fn login() {}".to_string(),
                    },
                ],
            )
            .await
            .unwrap();
        store
    }

    fn pipeline(
        store: Arc<MemoryStore>,
        inference: Arc<dyn InferenceAdapter>,
        config: PipelineConfig,
    ) -> (StagePipeline, JobStateStore, Arc<MemoryIndex>) {
        let state = JobStateStore::new(store);
        let index = Arc::new(MemoryIndex::new());
        let pipeline = StagePipeline::new(state.clone(), inference, index.clone(), config);
        (pipeline, state, index)
    }

    async fn new_job(state: &JobStateStore, repo: &str) -> AnalysisJob {
        let job = AnalysisJob::new(Uuid::new_v4(), format!("fp-{}", repo), request(repo));
        state.create(&job).await.unwrap();
        job
    }

    /// Wraps the static provider and fails `embed` a configurable number of
    /// times before delegating.
    struct FlakyInference {
        inner: StaticInference,
        failures_left: AtomicU32,
        error: fn() -> CoreError,
    }

    impl FlakyInference {
        fn new(failures: u32, error: fn() -> CoreError) -> Self {
            Self {
                inner: StaticInference::with_dims(16),
                failures_left: AtomicU32::new(failures),
                error,
            }
        }
    }

    #[async_trait]
    impl InferenceAdapter for FlakyInference {
        async fn generate_insights(
            &self,
            code: &str,
            language: &str,
            context: Option<&serde_json::Value>,
        ) -> Result<InsightBundle, CoreError> {
            self.inner.generate_insights(code, language, context).await
        }

        async fn generate_rationale(
            &self,
            code: &str,
            language: &str,
        ) -> Result<Rationale, CoreError> {
            self.inner.generate_rationale(code, language).await
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CoreError> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err((self.error)());
            }
            self.inner.embed(texts).await
        }

        fn model_name(&self) -> &str {
            self.inner.model_name()
        }

        fn embed_model(&self) -> &str {
            self.inner.embed_model()
        }

        fn dims(&self) -> usize {
            self.inner.dims()
        }

        async fn ping(&self) -> Result<(), CoreError> {
            Ok(())
        }
    }

    /// Wraps the static provider and stalls `embed` well past any stage
    /// timeout a test would configure.
    struct StalledInference {
        inner: StaticInference,
    }

    #[async_trait]
    impl InferenceAdapter for StalledInference {
        async fn generate_insights(
            &self,
            code: &str,
            language: &str,
            context: Option<&serde_json::Value>,
        ) -> Result<InsightBundle, CoreError> {
            self.inner.generate_insights(code, language, context).await
        }

        async fn generate_rationale(
            &self,
            code: &str,
            language: &str,
        ) -> Result<Rationale, CoreError> {
            self.inner.generate_rationale(code, language).await
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CoreError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            self.inner.embed(texts).await
        }

        fn model_name(&self) -> &str {
            self.inner.model_name()
        }

        fn embed_model(&self) -> &str {
            self.inner.embed_model()
        }

        fn dims(&self) -> usize {
            self.inner.dims()
        }

        async fn ping(&self) -> Result<(), CoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn happy_path_runs_all_four_stages() {
        let store = seeded_store("r1").await;
        let inference = Arc::new(StaticInference::with_dims(16));
        let (pipeline, state, index) = pipeline(store, inference, test_config());

        let job = new_job(&state, "r1").await;
        let done = pipeline.run(job, Arc::new(AtomicBool::new(false))).await;

        assert_eq!(done.status, JobStatus::Succeeded);
        let stages: Vec<Stage> = done.stages.iter().map(|s| s.stage).collect();
        assert_eq!(stages, Stage::ALL.to_vec());
        assert!(done
            .stages
            .iter()
            .all(|s| s.outcome == StageOutcome::Ok && s.attempt_count == 1));

        let result = done.result.unwrap();
        assert_eq!(result.files_analyzed, 2);
        assert_eq!(result.embeddings_indexed, 2);
        assert_eq!(result.dimensions.len(), 6);
        assert_eq!(index.len(), 2);

        // The stored record matches the returned one.
        let stored = state.get(done.job_id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Succeeded);
        assert_eq!(stored.stages.len(), 4);
    }

    #[tokio::test]
    async fn missing_repository_fails_fetch_stage() {
        let store = Arc::new(MemoryStore::new());
        let inference = Arc::new(StaticInference::with_dims(16));
        let (pipeline, state, _) = pipeline(store, inference, test_config());

        let job = new_job(&state, "ghost").await;
        let done = pipeline.run(job, Arc::new(AtomicBool::new(false))).await;

        assert_eq!(done.status, JobStatus::Failed);
        assert_eq!(done.error.as_ref().unwrap().kind, ErrorKind::NotFound);
        // NotFound is not retryable: one failed fetch attempt, no later stages.
        assert_eq!(done.stages.len(), 1);
        assert_eq!(done.stages[0].stage, Stage::FetchSource);
        assert_eq!(done.stages[0].outcome, StageOutcome::Failed);
        assert_eq!(done.stages[0].attempt_count, 1);
    }

    #[tokio::test]
    async fn transient_failure_retries_then_succeeds() {
        let store = seeded_store("r1").await;
        let inference = Arc::new(FlakyInference::new(2, || {
            CoreError::UpstreamUnavailable("embedding endpoint down".to_string())
        }));
        let (pipeline, state, _) = pipeline(store, inference, test_config());

        let job = new_job(&state, "r1").await;
        let done = pipeline.run(job, Arc::new(AtomicBool::new(false))).await;

        assert_eq!(done.status, JobStatus::Succeeded);

        let embed_entries: Vec<&StageResult> = done
            .stages
            .iter()
            .filter(|s| s.stage == Stage::ComputeEmbeddings)
            .collect();
        assert_eq!(embed_entries.len(), 3);
        assert_eq!(embed_entries[0].outcome, StageOutcome::Retried);
        assert_eq!(embed_entries[1].outcome, StageOutcome::Retried);
        assert_eq!(embed_entries[2].outcome, StageOutcome::Ok);
        assert_eq!(embed_entries[2].attempt_count, 3);
    }

    #[tokio::test]
    async fn retry_exhaustion_fails_with_max_attempts() {
        let store = seeded_store("r1").await;
        let inference = Arc::new(FlakyInference::new(u32::MAX, || {
            CoreError::UpstreamUnavailable("embedding endpoint down".to_string())
        }));
        let config = test_config();
        let max_attempts = config.max_attempts;
        let (pipeline, state, _) = pipeline(store, inference, config);

        let job = new_job(&state, "r1").await;
        let done = pipeline.run(job, Arc::new(AtomicBool::new(false))).await;

        assert_eq!(done.status, JobStatus::Failed);
        assert_eq!(
            done.error.as_ref().unwrap().kind,
            ErrorKind::UpstreamUnavailable
        );

        let last = done.stages.last().unwrap();
        assert_eq!(last.stage, Stage::ComputeEmbeddings);
        assert_eq!(last.outcome, StageOutcome::Failed);
        assert_eq!(last.attempt_count, max_attempts);

        // No stage after the failed one ran.
        assert!(!done
            .stages
            .iter()
            .any(|s| s.stage == Stage::ComputeInsights));
    }

    #[tokio::test]
    async fn stalled_stage_times_out_retries_then_fails() {
        let store = seeded_store("r1").await;
        let inference = Arc::new(StalledInference {
            inner: StaticInference::with_dims(16),
        });
        let config = PipelineConfig {
            max_attempts: 2,
            stage_timeout_secs: 1,
            backoff_base_ms: 1,
            max_concurrency: 2,
            queue_capacity: 4,
        };
        let (pipeline, state, _) = pipeline(store, inference, config);

        let job = new_job(&state, "r1").await;
        let done = pipeline.run(job, Arc::new(AtomicBool::new(false))).await;

        assert_eq!(done.status, JobStatus::Failed);
        let error = done.error.as_ref().unwrap();
        assert_eq!(error.kind, ErrorKind::UpstreamUnavailable);
        assert!(error.message.contains("timed out"));

        // A timeout is retryable: one retried attempt, then the final one.
        let embed_entries: Vec<&StageResult> = done
            .stages
            .iter()
            .filter(|s| s.stage == Stage::ComputeEmbeddings)
            .collect();
        assert_eq!(embed_entries.len(), 2);
        assert_eq!(embed_entries[0].outcome, StageOutcome::Retried);
        assert_eq!(embed_entries[1].outcome, StageOutcome::Failed);
        assert_eq!(embed_entries[1].attempt_count, 2);
        assert!(!done.stages.iter().any(|s| s.stage == Stage::ComputeInsights));
    }

    #[tokio::test]
    async fn permanent_failure_does_not_retry() {
        let store = seeded_store("r1").await;
        let inference = Arc::new(FlakyInference::new(u32::MAX, || {
            CoreError::UpstreamRejected("input rejected by model".to_string())
        }));
        let (pipeline, state, _) = pipeline(store, inference, test_config());

        let job = new_job(&state, "r1").await;
        let done = pipeline.run(job, Arc::new(AtomicBool::new(false))).await;

        assert_eq!(done.status, JobStatus::Failed);
        assert_eq!(
            done.error.as_ref().unwrap().kind,
            ErrorKind::UpstreamRejected
        );
        let last = done.stages.last().unwrap();
        assert_eq!(last.attempt_count, 1);
        assert_eq!(
            done.error.as_ref().unwrap().message,
            "upstream rejected request: input rejected by model"
        );
    }

    #[tokio::test]
    async fn cancel_before_start_produces_empty_stage_list() {
        let store = seeded_store("r1").await;
        let inference = Arc::new(StaticInference::with_dims(16));
        let (pipeline, state, _) = pipeline(store, inference, test_config());

        let job = new_job(&state, "r1").await;
        let done = pipeline.run(job, Arc::new(AtomicBool::new(true))).await;

        assert_eq!(done.status, JobStatus::Canceled);
        assert!(done.stages.is_empty());
        assert!(done.stage.is_none());
    }

    #[test]
    fn dimensions_start_at_hundred_and_deduct() {
        let insights = vec![Insight {
            category: "security".to_string(),
            severity: Severity::Critical,
            title: "t".to_string(),
            description: "d".to_string(),
            affected_files: Vec::new(),
            suggested_fix: None,
            confidence: 1.0,
        }];

        let (dimensions, overall) = score_dimensions(&insights);
        assert_eq!(dimensions["security"], 75.0);
        assert_eq!(dimensions["performance"], 100.0);
        assert!(overall < 100.0);
    }

    #[test]
    fn dependency_category_maps_to_coupling() {
        let insights = vec![Insight {
            category: "dependency".to_string(),
            severity: Severity::Warning,
            title: "t".to_string(),
            description: "d".to_string(),
            affected_files: Vec::new(),
            suggested_fix: None,
            confidence: 0.5,
        }];

        let (dimensions, _) = score_dimensions(&insights);
        assert_eq!(dimensions["coupling"], 95.0);
    }

    #[test]
    fn scores_clamp_at_zero() {
        let critical = Insight {
            category: "security".to_string(),
            severity: Severity::Critical,
            title: "t".to_string(),
            description: "d".to_string(),
            affected_files: Vec::new(),
            suggested_fix: None,
            confidence: 1.0,
        };
        let insights = vec![critical; 10];

        let (dimensions, _) = score_dimensions(&insights);
        assert_eq!(dimensions["security"], 0.0);
    }

    #[test]
    fn dominant_language_by_majority() {
        let files = vec![
            SourceFile {
                path: "a.rs".to_string(),
                content: String::new(),
            },
            SourceFile {
                path: "b.rs".to_string(),
                content: String::new(),
            },
            SourceFile {
                path: "c.py".to_string(),
                content: String::new(),
            },
        ];
        assert_eq!(dominant_language(&files), "rust");
        assert_eq!(dominant_language(&[]), "text");
    }
}
