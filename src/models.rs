//! Core data models used throughout the orchestration core.
//!
//! These types represent analysis requests, jobs, stage results, insights,
//! and scores that flow through the pipeline. String unions from the wire
//! format (analysis kind, severity, status) are closed enums so invalid
//! values are rejected at the boundary.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorKind;

/// What kind of analysis a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisKind {
    Architectural,
    Security,
    Performance,
    Dependency,
    Comprehensive,
}

impl AnalysisKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisKind::Architectural => "architectural",
            AnalysisKind::Security => "security",
            AnalysisKind::Performance => "performance",
            AnalysisKind::Dependency => "dependency",
            AnalysisKind::Comprehensive => "comprehensive",
        }
    }
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AnalysisKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "architectural" => Ok(AnalysisKind::Architectural),
            "security" => Ok(AnalysisKind::Security),
            "performance" => Ok(AnalysisKind::Performance),
            "dependency" => Ok(AnalysisKind::Dependency),
            "comprehensive" => Ok(AnalysisKind::Comprehensive),
            other => Err(format!(
                "unknown analysis kind '{}'. Use architectural, security, performance, dependency, or comprehensive.",
                other
            )),
        }
    }
}

/// An incoming analysis request. Job identity is derived from a canonical
/// hash of these fields (see [`crate::fingerprint`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub repository_id: String,
    #[serde(default)]
    pub commit_reference: Option<String>,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_kind")]
    pub analysis_kind: AnalysisKind,
    #[serde(default)]
    pub file_paths: Option<Vec<String>>,
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_kind() -> AnalysisKind {
    AnalysisKind::Comprehensive
}

/// Lifecycle state of an analysis job. Terminal states are entered exactly
/// once; no mutation follows except reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Canceled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered pipeline stages. Every job runs these strictly in sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    FetchSource,
    ComputeEmbeddings,
    ComputeInsights,
    PersistResults,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::FetchSource,
        Stage::ComputeEmbeddings,
        Stage::ComputeInsights,
        Stage::PersistResults,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::FetchSource => "fetch_source",
            Stage::ComputeEmbeddings => "compute_embeddings",
            Stage::ComputeInsights => "compute_insights",
            Stage::PersistResults => "persist_results",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of a single recorded stage attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageOutcome {
    Ok,
    Retried,
    Failed,
}

/// One entry in a job's append-only stage history.
///
/// A stage that succeeds first try produces a single `ok` entry. Retryable
/// failures append `retried` entries before the final `ok` or `failed` one,
/// so the history preserves every attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: Stage,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: StageOutcome,
    pub attempt_count: u32,
    pub payload: serde_json::Value,
}

/// Terminal error recorded on a failed job: the classified kind plus the
/// last error message verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Authoritative record of one analysis job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisJob {
    pub job_id: Uuid,
    pub fingerprint: String,
    pub request: AnalysisRequest,
    pub status: JobStatus,
    /// Current pipeline position while running; `None` before the first
    /// stage starts and after cancellation from the queue.
    pub stage: Option<Stage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub stages: Vec<StageResult>,
    pub result: Option<AnalysisResult>,
    pub error: Option<JobError>,
}

impl AnalysisJob {
    pub fn new(job_id: Uuid, fingerprint: String, request: AnalysisRequest) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            fingerprint,
            request,
            status: JobStatus::Queued,
            stage: None,
            created_at: now,
            updated_at: now,
            stages: Vec::new(),
            result: None,
            error: None,
        }
    }
}

/// Severity of a generated insight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// A single architectural insight produced by the inference model.
/// Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insight {
    pub category: String,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub affected_files: Vec<String>,
    #[serde(default)]
    pub suggested_fix: Option<String>,
    /// Model confidence in `[0.0, 1.0]`.
    #[serde(default)]
    pub confidence: f64,
}

/// Insights plus the model metadata that produced them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightBundle {
    pub insights: Vec<Insight>,
    pub model: String,
    pub tokens_used: u64,
}

/// Architectural rationale for a code snippet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rationale {
    pub rationale: String,
    pub alternatives_considered: Vec<String>,
    pub trade_offs: Vec<String>,
    pub model: String,
}

/// A stored embedding vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub embedding_id: Uuid,
    pub repository_id: String,
    #[serde(default)]
    pub source_id: Option<String>,
    pub model: String,
    pub vector: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

/// One ranked similarity-search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub embedding_id: Uuid,
    pub source_id: Option<String>,
    pub score: f32,
}

/// Final payload of a succeeded analysis job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub insights: Vec<Insight>,
    /// Per-dimension scores in `[0, 100]`.
    pub dimensions: BTreeMap<String, f64>,
    /// Mean of the dimension scores, in `[0, 100]`.
    pub overall: f64,
    pub files_analyzed: usize,
    pub embeddings_indexed: usize,
    pub model: String,
    pub tokens_used: u64,
}

/// Trend of a repository's health across succeeded analyses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Improving,
    Declining,
    Stable,
}

/// Repository health score derived from the latest succeeded analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthScore {
    pub repository_id: String,
    pub overall: f64,
    pub dimensions: BTreeMap<String, f64>,
    pub trend: Trend,
    pub computed_at: DateTime<Utc>,
}

/// One source file fetched from the durable store for analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    pub path: String,
    pub content: String,
}
