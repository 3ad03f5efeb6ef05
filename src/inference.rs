//! AI inference adapter.
//!
//! Defines the [`InferenceAdapter`] capability interface and two providers:
//! - **[`GeminiClient`]** — calls the Google AI (Gemini) HTTP API for insight
//!   generation, rationale, and embeddings. Requires the `GOOGLE_AI_KEY`
//!   environment variable.
//! - **[`StaticInference`]** — deterministic offline provider: hash-derived
//!   embedding vectors and fixed insight fixtures. Used when
//!   `inference.provider = "static"` and throughout the test suite.
//!
//! Adapter calls are single-attempt; transport failures are classified into
//! the core error taxonomy at this boundary (429 → `RateLimited` with the
//! server's backoff hint, 5xx and network errors → `UpstreamUnavailable`,
//! other 4xx → `UpstreamRejected`). Retry policy belongs to the pipeline,
//! not the adapter.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::config::InferenceConfig;
use crate::error::CoreError;
use crate::models::{Insight, InsightBundle, Rationale, Severity};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

#[async_trait]
pub trait InferenceAdapter: Send + Sync {
    /// Generate architectural insights for a code snippet.
    async fn generate_insights(
        &self,
        code: &str,
        language: &str,
        context: Option<&serde_json::Value>,
    ) -> Result<InsightBundle, CoreError>;

    /// Explain the architectural rationale behind a code snippet.
    async fn generate_rationale(&self, code: &str, language: &str)
        -> Result<Rationale, CoreError>;

    /// Embed a batch of texts; one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CoreError>;

    /// Returns the insight model identifier (e.g. `"gemini-2.0-flash"`).
    fn model_name(&self) -> &str;

    /// Returns the embedding model identifier (e.g. `"text-embedding-004"`).
    fn embed_model(&self) -> &str;

    /// Returns the embedding vector dimensionality.
    fn dims(&self) -> usize;

    /// Lightweight reachability check for readiness probes.
    async fn ping(&self) -> Result<(), CoreError>;
}

/// Create the configured [`InferenceAdapter`].
pub fn create_inference(config: &InferenceConfig) -> Result<Arc<dyn InferenceAdapter>, CoreError> {
    match config.provider.as_str() {
        "gemini" => Ok(Arc::new(GeminiClient::new(config)?)),
        "static" => Ok(Arc::new(StaticInference::new(config))),
        other => Err(CoreError::Validation(format!(
            "unknown inference provider: '{}'",
            other
        ))),
    }
}

// ============ Gemini provider ============

/// Inference provider backed by the Google AI Gemini API.
pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    embed_model: String,
    dims: usize,
}

impl GeminiClient {
    /// Create a new client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `GOOGLE_AI_KEY` is not in the environment or the
    /// HTTP client cannot be constructed.
    pub fn new(config: &InferenceConfig) -> Result<Self, CoreError> {
        let api_key = std::env::var("GOOGLE_AI_KEY").map_err(|_| {
            CoreError::Validation("GOOGLE_AI_KEY environment variable not set".to_string())
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CoreError::UpstreamUnavailable(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config
                .endpoint
                .clone()
                .unwrap_or_else(|| GEMINI_BASE_URL.to_string()),
            api_key,
            model: config.model.clone(),
            embed_model: config.embed_model.clone(),
            dims: config.dims,
        })
    }

    async fn post_json(
        &self,
        url: String,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, CoreError> {
        let resp = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = resp.status();
        if status.is_success() {
            return resp
                .json()
                .await
                .map_err(|e| CoreError::UpstreamRejected(format!("invalid response body: {}", e)));
        }

        let retry_after_ms = resp
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(|secs| secs * 1000);
        let body_text = resp.text().await.unwrap_or_default();

        Err(classify_status(status, retry_after_ms, body_text))
    }

    /// Ask the model for structured output and extract the first candidate's
    /// text part.
    async fn generate_text(&self, prompt: String) -> Result<(String, u64), CoreError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );
        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": { "responseMimeType": "application/json" },
        });

        let json = self.post_json(url, body).await?;

        let text = json
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(|t| t.as_str())
            .ok_or_else(|| {
                CoreError::UpstreamRejected("Gemini response missing candidate text".to_string())
            })?
            .to_string();

        let tokens_used = json
            .pointer("/usageMetadata/totalTokenCount")
            .and_then(|t| t.as_u64())
            .unwrap_or(0);

        Ok((text, tokens_used))
    }
}

#[async_trait]
impl InferenceAdapter for GeminiClient {
    async fn generate_insights(
        &self,
        code: &str,
        language: &str,
        context: Option<&serde_json::Value>,
    ) -> Result<InsightBundle, CoreError> {
        let context_block = context
            .map(|c| format!("\nAdditional context:\n{}\n", c))
            .unwrap_or_default();
        let prompt = format!(
            "You are an architectural analysis engine. Analyze the following {language} code \
             and return a JSON array of insights. Each insight has: category (string), severity \
             (\"info\"|\"warning\"|\"critical\"), title, description, affected_files (string \
             array), suggested_fix (string or null), confidence (0.0-1.0).\n{context_block}\
             Code:\n```{language}\n{code}\n```"
        );

        let (text, tokens_used) = self.generate_text(prompt).await?;
        let insights: Vec<Insight> = serde_json::from_str(strip_code_fences(&text))
            .map_err(|e| CoreError::UpstreamRejected(format!("unparseable insights: {}", e)))?;

        Ok(InsightBundle {
            insights,
            model: self.model.clone(),
            tokens_used,
        })
    }

    async fn generate_rationale(
        &self,
        code: &str,
        language: &str,
    ) -> Result<Rationale, CoreError> {
        let prompt = format!(
            "Explain the architectural rationale behind the following {language} code. Return a \
             JSON object with: rationale (string), alternatives_considered (string array), \
             trade_offs (string array).\nCode:\n```{language}\n{code}\n```"
        );

        let (text, _) = self.generate_text(prompt).await?;

        #[derive(serde::Deserialize)]
        struct RationaleBody {
            rationale: String,
            #[serde(default)]
            alternatives_considered: Vec<String>,
            #[serde(default)]
            trade_offs: Vec<String>,
        }

        let body: RationaleBody = serde_json::from_str(strip_code_fences(&text))
            .map_err(|e| CoreError::UpstreamRejected(format!("unparseable rationale: {}", e)))?;

        Ok(Rationale {
            rationale: body.rationale,
            alternatives_considered: body.alternatives_considered,
            trade_offs: body.trade_offs,
            model: self.model.clone(),
        })
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CoreError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!(
            "{}/v1beta/models/{}:batchEmbedContents?key={}",
            self.base_url, self.embed_model, self.api_key
        );
        let requests: Vec<serde_json::Value> = texts
            .iter()
            .map(|t| {
                serde_json::json!({
                    "model": format!("models/{}", self.embed_model),
                    "content": { "parts": [{ "text": t }] },
                })
            })
            .collect();

        let json = self
            .post_json(url, serde_json::json!({ "requests": requests }))
            .await?;

        let embeddings = json
            .get("embeddings")
            .and_then(|e| e.as_array())
            .ok_or_else(|| {
                CoreError::UpstreamRejected("Gemini response missing embeddings".to_string())
            })?;

        let mut vectors = Vec::with_capacity(embeddings.len());
        for item in embeddings {
            let values = item
                .get("values")
                .and_then(|v| v.as_array())
                .ok_or_else(|| {
                    CoreError::UpstreamRejected("embedding entry missing values".to_string())
                })?;
            vectors.push(
                values
                    .iter()
                    .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                    .collect(),
            );
        }

        if vectors.len() != texts.len() {
            return Err(CoreError::UpstreamRejected(format!(
                "embedding count mismatch: sent {}, got {}",
                texts.len(),
                vectors.len()
            )));
        }

        Ok(vectors)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn embed_model(&self) -> &str {
        &self.embed_model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn ping(&self) -> Result<(), CoreError> {
        let url = format!("{}/v1beta/models?key={}", self.base_url, self.api_key);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(classify_status(status, None, format!("ping returned {}", status)))
        }
    }
}

fn classify_transport_error(e: reqwest::Error) -> CoreError {
    CoreError::UpstreamUnavailable(e.to_string())
}

fn classify_status(
    status: reqwest::StatusCode,
    retry_after_ms: Option<u64>,
    body: String,
) -> CoreError {
    if status.as_u16() == 429 {
        CoreError::RateLimited {
            message: format!("Gemini API: {}", body),
            retry_after_ms,
        }
    } else if status.is_server_error() {
        CoreError::UpstreamUnavailable(format!("Gemini API {}: {}", status, body))
    } else {
        CoreError::UpstreamRejected(format!("Gemini API {}: {}", status, body))
    }
}

/// Models often wrap JSON output in markdown fences despite instructions.
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open.strip_suffix("```").unwrap_or(without_open).trim()
}

// ============ Static provider ============

/// Deterministic offline inference provider.
///
/// Embeddings are unit vectors derived from a SHA-256 expansion of the input
/// text, so identical texts always embed identically and similarity search
/// behaves predictably without a network. Insights and rationale are fixed
/// fixtures shaped like real model output.
pub struct StaticInference {
    model: String,
    embed_model: String,
    dims: usize,
}

impl StaticInference {
    pub fn new(config: &InferenceConfig) -> Self {
        Self {
            model: config.model.clone(),
            embed_model: config.embed_model.clone(),
            dims: config.dims,
        }
    }

    /// Build one with explicit models and dimensionality. Convenient in tests.
    pub fn with_dims(dims: usize) -> Self {
        Self {
            model: "static".to_string(),
            embed_model: "static-embed".to_string(),
            dims,
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = Vec::with_capacity(self.dims);
        let mut counter: u64 = 0;

        while vector.len() < self.dims {
            let mut hasher = Sha256::new();
            hasher.update(text.as_bytes());
            hasher.update(counter.to_le_bytes());
            let block = hasher.finalize();
            for byte in block {
                if vector.len() == self.dims {
                    break;
                }
                // Map 0..=255 onto [-1, 1].
                vector.push((byte as f32 / 127.5) - 1.0);
            }
            counter += 1;
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl InferenceAdapter for StaticInference {
    async fn generate_insights(
        &self,
        code: &str,
        language: &str,
        _context: Option<&serde_json::Value>,
    ) -> Result<InsightBundle, CoreError> {
        if code.trim().is_empty() {
            return Err(CoreError::UpstreamRejected(
                "empty code snippet".to_string(),
            ));
        }

        let mut insights = vec![
            Insight {
                category: "dependency".to_string(),
                severity: Severity::Critical,
                title: "Circular Dependency Detected".to_string(),
                description: format!(
                    "The analyzed {} code creates a bi-directional coupling between services.",
                    language
                ),
                affected_files: Vec::new(),
                suggested_fix: Some(
                    "Extract a shared interface to break the circular dependency.".to_string(),
                ),
                confidence: 0.92,
            },
            Insight {
                category: "architecture".to_string(),
                severity: Severity::Warning,
                title: "Internal API Boundary Violation".to_string(),
                description: "Direct access to internal state bypasses the public contract."
                    .to_string(),
                affected_files: Vec::new(),
                suggested_fix: Some(
                    "Use the public API contract instead of internal accessors.".to_string(),
                ),
                confidence: 0.88,
            },
        ];

        if code.len() > 4000 {
            insights.push(Insight {
                category: "complexity".to_string(),
                severity: Severity::Info,
                title: "Large Analysis Surface".to_string(),
                description: "The submitted snippet is large; consider scoping the analysis."
                    .to_string(),
                affected_files: Vec::new(),
                suggested_fix: None,
                confidence: 0.6,
            });
        }

        Ok(InsightBundle {
            insights,
            model: self.model.clone(),
            tokens_used: 0,
        })
    }

    async fn generate_rationale(
        &self,
        _code: &str,
        language: &str,
    ) -> Result<Rationale, CoreError> {
        Ok(Rationale {
            rationale: format!(
                "This {} architectural pattern was chosen to ensure loose coupling and high cohesion.",
                language
            ),
            alternatives_considered: vec!["Monolithic module".to_string()],
            trade_offs: vec!["Indirection adds a small maintenance cost.".to_string()],
            model: self.model.clone(),
        })
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CoreError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn embed_model(&self) -> &str {
        &self.embed_model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn ping(&self) -> Result<(), CoreError> {
        Ok(())
    }
}
