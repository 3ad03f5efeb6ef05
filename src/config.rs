use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Maximum attempts per stage, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Per-stage timeout. Independent of the overall job duration.
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,
    /// Base delay for exponential backoff between retries.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Number of jobs executing concurrently.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Jobs waiting beyond the concurrency limit. Triggers past this are
    /// rejected with a backpressure signal.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            stage_timeout_secs: default_stage_timeout_secs(),
            backoff_base_ms: default_backoff_base_ms(),
            max_concurrency: default_max_concurrency(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_stage_timeout_secs() -> u64 {
    30
}
fn default_backoff_base_ms() -> u64 {
    500
}
fn default_max_concurrency() -> usize {
    4
}
fn default_queue_capacity() -> usize {
    16
}

#[derive(Debug, Deserialize, Clone)]
pub struct InferenceConfig {
    /// `"gemini"` for the real client, `"static"` for the deterministic
    /// offline provider.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_embed_model")]
    pub embed_model: String,
    /// Embedding vector dimensionality.
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Override for the Gemini API base URL. Mainly for tests.
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            embed_model: default_embed_model(),
            dims: default_dims(),
            timeout_secs: default_timeout_secs(),
            endpoint: None,
        }
    }
}

fn default_provider() -> String {
    "static".to_string()
}
fn default_model() -> String {
    "gemini-2.0-flash".to_string()
}
fn default_embed_model() -> String {
    "text-embedding-004".to_string()
}
fn default_dims() -> usize {
    768
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    /// Files larger than this are skipped during ingest.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.rs".to_string(),
        "**/*.ts".to_string(),
        "**/*.tsx".to_string(),
        "**/*.py".to_string(),
        "**/*.go".to_string(),
        "**/*.java".to_string(),
        "**/*.md".to_string(),
    ]
}

fn default_max_file_bytes() -> u64 {
    512 * 1024
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate pipeline
    if config.pipeline.max_attempts == 0 {
        anyhow::bail!("pipeline.max_attempts must be >= 1");
    }
    if config.pipeline.stage_timeout_secs == 0 {
        anyhow::bail!("pipeline.stage_timeout_secs must be > 0");
    }
    if config.pipeline.max_concurrency == 0 {
        anyhow::bail!("pipeline.max_concurrency must be >= 1");
    }

    // Validate inference
    if config.inference.dims == 0 {
        anyhow::bail!("inference.dims must be > 0");
    }
    match config.inference.provider.as_str() {
        "gemini" | "static" => {}
        other => anyhow::bail!(
            "Unknown inference provider: '{}'. Must be gemini or static.",
            other
        ),
    }

    Ok(config)
}
