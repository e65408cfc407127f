//! The three caller-facing operations: list models, review an artifact, and
//! check provider health. Responses are plain serde types shaped as JSON
//! objects with snake_case fields.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::gateway::usage::CallStatus;
use crate::gateway::{ReviewResult, TokenUsage};
use crate::orchestrator::{BatchReport, ModelHealth, ModelReview, Orchestrator};
use crate::sandbox::{PathSandbox, SandboxError};

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
    #[error("Failed to read artifact {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// =============================================================================
// RESPONSE TYPES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub provider: String,
    pub model: String,
    /// True when a credential was resolved for the model.
    pub available: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelListing {
    pub models: Vec<ModelInfo>,
}

/// One model's entry in a review response.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewEntry {
    pub model: String,
    pub status: CallStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<TokenUsage>,
    /// Present on success; `null` there when the model has no pricing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<Option<f64>>,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub retries_attempted: u32,
}

impl From<ModelReview> for ReviewEntry {
    fn from(review: ModelReview) -> Self {
        let latency_ms = review.result.latency_ms();
        let retries_attempted = review.result.retries_used();
        let base = ReviewEntry {
            model: review.model_id,
            status: CallStatus::Success,
            timestamp: review.finished_at,
            response: None,
            tokens_used: None,
            cost_usd: None,
            latency_ms,
            error: None,
            retries_attempted,
        };

        match review.result {
            ReviewResult::Success {
                text,
                tokens,
                cost_usd,
                ..
            } => ReviewEntry {
                response: Some(text),
                tokens_used: Some(tokens),
                cost_usd: Some(cost_usd),
                ..base
            },
            ReviewResult::Failure { error, .. } => ReviewEntry {
                status: CallStatus::Error,
                error: Some(error),
                ..base
            },
        }
    }
}

/// A completed batch.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewReport {
    pub reviews: Vec<ReviewEntry>,
    pub models_called: Vec<String>,
    pub parallel: bool,
    pub total_latency_ms: u64,
    pub total_tokens: TokenUsage,
    pub total_cost_usd: Option<f64>,
}

impl ReviewReport {
    fn from_batch(batch: BatchReport, models_called: Vec<String>) -> Self {
        Self {
            reviews: batch.reviews.into_iter().map(ReviewEntry::from).collect(),
            models_called,
            parallel: true,
            total_latency_ms: batch.total_latency_ms,
            total_tokens: batch.total_tokens,
            total_cost_usd: batch.total_cost_usd,
        }
    }
}

/// A batch refused before any provider was called.
#[derive(Debug, Clone, Serialize)]
pub struct RejectedReview {
    pub error: String,
    pub reviews: Vec<ReviewEntry>,
    pub models_called: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ReviewResponse {
    Completed(ReviewReport),
    Rejected(RejectedReview),
}

impl ReviewResponse {
    pub fn rejected(error: impl Into<String>, models_called: Vec<String>) -> Self {
        ReviewResponse::Rejected(RejectedReview {
            error: error.into(),
            reviews: Vec::new(),
            models_called,
        })
    }

    pub fn report(&self) -> Option<&ReviewReport> {
        match self {
            ReviewResponse::Completed(report) => Some(report),
            ReviewResponse::Rejected(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ReviewResponse::Completed(_) => None,
            ReviewResponse::Rejected(rejected) => Some(&rejected.error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub models: Vec<ModelHealth>,
}

// =============================================================================
// SERVICE
// =============================================================================

/// Entry point for callers: sandboxed artifact loading in front of the
/// orchestrator.
#[derive(Clone)]
pub struct ReviewService {
    sandbox: Arc<PathSandbox>,
    orchestrator: Orchestrator,
}

impl ReviewService {
    pub fn new(sandbox: PathSandbox, orchestrator: Orchestrator) -> Self {
        Self {
            sandbox: Arc::new(sandbox),
            orchestrator,
        }
    }

    /// Configured models in file order. Reads only the in-memory catalog.
    pub fn list_models(&self) -> ModelListing {
        let models = self
            .orchestrator
            .catalog()
            .entries()
            .iter()
            .map(|entry| ModelInfo {
                id: entry.id.clone(),
                provider: entry.provider.clone(),
                model: entry.model.clone(),
                available: entry.is_available(),
            })
            .collect();
        ModelListing { models }
    }

    /// Review the artifact at `artifact_path` with every model in `models`.
    ///
    /// A path that fails the sandbox or cannot be read rejects the whole
    /// batch before any provider is called.
    pub async fn review(
        &self,
        models: &[String],
        artifact_path: &str,
        prompt: &str,
        timeout: Option<f64>,
    ) -> ReviewResponse {
        let artifact = match self.load_artifact(artifact_path).await {
            Ok(content) => content,
            Err(err) => {
                warn!(path = artifact_path, error = %err, "artifact rejected");
                return ReviewResponse::rejected(err.to_string(), models.to_vec());
            }
        };

        let batch = self
            .orchestrator
            .review_all(models, &artifact, prompt, timeout)
            .await;
        ReviewResponse::Completed(ReviewReport::from_batch(batch, models.to_vec()))
    }

    /// Health of the given models, or of every configured model.
    pub async fn health(&self, models: Option<&[String]>) -> HealthReport {
        HealthReport {
            models: self.orchestrator.health(models).await,
        }
    }

    async fn load_artifact(&self, artifact_path: &str) -> Result<String, ArtifactError> {
        let path = self.sandbox.validate(artifact_path)?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|source| ArtifactError::Read {
                path: path.clone(),
                source,
            })?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_entry_carries_response_and_nullable_cost() {
        let entry = ReviewEntry::from(ModelReview {
            model_id: "m1".into(),
            result: ReviewResult::Success {
                text: "fine".into(),
                tokens: TokenUsage::new(3, 2),
                cost_usd: None,
                latency_ms: 15,
                retries_used: 1,
            },
            finished_at: Utc::now(),
        });
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["status"], "success");
        assert_eq!(value["response"], "fine");
        assert_eq!(value["tokens_used"], json!({"input": 3, "output": 2}));
        assert!(value.as_object().unwrap().contains_key("cost_usd"));
        assert_eq!(value["cost_usd"], serde_json::Value::Null);
        assert_eq!(value["retries_attempted"], 1);
        assert!(value.get("error").is_none());
    }

    #[test]
    fn failure_entry_omits_success_fields() {
        let entry = ReviewEntry::from(ModelReview {
            model_id: "m2".into(),
            result: ReviewResult::rejected("Unknown model: m2"),
            finished_at: Utc::now(),
        });
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["error"], "Unknown model: m2");
        assert_eq!(value["retries_attempted"], 0);
        for absent in ["response", "tokens_used", "cost_usd"] {
            assert!(value.get(absent).is_none(), "{absent} should be omitted");
        }
    }

    #[test]
    fn rejected_response_shape() {
        let response = ReviewResponse::rejected(
            "Path must be absolute: x.md",
            vec!["m1".to_string()],
        );
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({
                "error": "Path must be absolute: x.md",
                "reviews": [],
                "models_called": ["m1"]
            })
        );
    }
}
