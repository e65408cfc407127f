//! Parallel fan-out of one artifact to many reviewer models.
//!
//! Each model gets its own spawned task. A model that cannot be resolved
//! (unknown id, missing key, unsupported provider) fails on its own without a
//! network call, and a task that panics is reported as a failure for that
//! model only. Results come back in the order the models were requested.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{ExecutionDefaults, ModelCatalog};
use crate::gateway::usage::ProviderCallRecord;
use crate::gateway::{
    round_usd, NoopUsageSink, ProviderError, ProviderKind, ProviderRegistry, ProviderTarget,
    RetryPolicy, ReviewProvider, ReviewRequest, ReviewResult, TokenUsage, UsageSink,
    HEALTH_CHECK_TIMEOUT,
};

/// Provider tag recorded when a model id never resolved.
const UNKNOWN_PROVIDER: &str = "unknown";

/// One model's slot in a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelReview {
    pub model_id: String,
    pub result: ReviewResult,
    /// When the call finished.
    pub finished_at: DateTime<Utc>,
}

/// Aggregated outcome of one fan-out.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub batch_id: Uuid,
    /// One entry per requested model, in request order.
    pub reviews: Vec<ModelReview>,
    /// Wall-clock span of the whole fan-out.
    pub total_latency_ms: u64,
    /// Tokens summed over successful calls.
    pub total_tokens: TokenUsage,
    /// Sum of the costs that are known, absent when none are.
    pub total_cost_usd: Option<f64>,
}

impl BatchReport {
    fn aggregate(batch_id: Uuid, reviews: Vec<ModelReview>, elapsed: Duration) -> Self {
        let mut total_tokens = TokenUsage::default();
        let mut cost_sum = None::<f64>;
        for review in &reviews {
            total_tokens += review.result.tokens();
            if let Some(cost) = review.result.cost_usd() {
                *cost_sum.get_or_insert(0.0) += cost;
            }
        }

        Self {
            batch_id,
            reviews,
            total_latency_ms: elapsed.as_millis() as u64,
            total_tokens,
            total_cost_usd: cost_sum.map(round_usd),
        }
    }

    pub fn succeeded(&self) -> usize {
        self.reviews.iter().filter(|r| r.result.is_success()).count()
    }
}

/// Health of one configured model.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ModelHealth {
    pub model: String,
    pub healthy: bool,
}

/// Runs review batches against a fixed catalog and provider registry.
#[derive(Clone)]
pub struct Orchestrator {
    catalog: Arc<ModelCatalog>,
    registry: Arc<ProviderRegistry>,
    defaults: ExecutionDefaults,
    backoff: Option<(Duration, Duration)>,
    usage: Arc<dyn UsageSink>,
}

impl Orchestrator {
    pub fn new(catalog: Arc<ModelCatalog>, registry: Arc<ProviderRegistry>) -> Self {
        Self {
            catalog,
            registry,
            defaults: ExecutionDefaults::default(),
            backoff: None,
            usage: Arc::new(NoopUsageSink),
        }
    }

    pub fn with_defaults(mut self, defaults: ExecutionDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Override the backoff base delay and jitter bound.
    pub fn with_backoff(mut self, base_delay: Duration, max_jitter: Duration) -> Self {
        self.backoff = Some((base_delay, max_jitter));
        self
    }

    pub fn with_usage_sink(mut self, usage: Arc<dyn UsageSink>) -> Self {
        self.usage = usage;
        self
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    /// Retry policy for a batch, honoring a positive timeout override.
    pub fn retry_policy(&self, timeout_override: Option<f64>) -> RetryPolicy {
        let policy = self.defaults.retry_policy(timeout_override);
        match self.backoff {
            Some((base, jitter)) => policy.backoff(base, jitter),
            None => policy,
        }
    }

    /// Send `artifact` and `prompt` to every model in `model_ids` concurrently.
    ///
    /// Never fails as a whole: every requested model gets an entry.
    pub async fn review_all(
        &self,
        model_ids: &[String],
        artifact: &str,
        prompt: &str,
        timeout_override: Option<f64>,
    ) -> BatchReport {
        let batch_id = Uuid::new_v4();
        let retry = self.retry_policy(timeout_override);
        let artifact: Arc<str> = Arc::from(artifact);
        let prompt: Arc<str> = Arc::from(prompt);

        info!(
            %batch_id,
            models = model_ids.len(),
            artifact_bytes = artifact.len(),
            timeout_secs = retry.attempt_timeout.as_secs_f64(),
            max_retries = retry.max_retries,
            "review batch started"
        );
        let start = Instant::now();

        let handles: Vec<_> = model_ids
            .iter()
            .map(|model_id| {
                let planned = self.plan(model_id, artifact.clone(), prompt.clone(), &retry);
                tokio::spawn(async move {
                    let result = match planned {
                        Ok((provider, req)) => provider.review(&req).await,
                        Err(err) => ReviewResult::rejected(err.to_string()),
                    };
                    (result, Utc::now())
                })
            })
            .collect();

        let joined = join_all(handles).await;
        let elapsed = start.elapsed();

        let mut reviews = Vec::with_capacity(model_ids.len());
        for (model_id, outcome) in model_ids.iter().zip(joined) {
            let (result, finished_at) = outcome.unwrap_or_else(|err| {
                warn!(model = %model_id, error = %err, "review task failed");
                (
                    ReviewResult::rejected(format!("Review task failed: {err}")),
                    Utc::now(),
                )
            });

            let provider = self
                .catalog
                .get(model_id)
                .map(|e| e.provider.as_str())
                .unwrap_or(UNKNOWN_PROVIDER);
            self.usage
                .record(
                    ProviderCallRecord::new(batch_id, model_id.as_str(), provider)
                        .result(&result)
                        .at(finished_at),
                )
                .await;

            reviews.push(ModelReview {
                model_id: model_id.clone(),
                result,
                finished_at,
            });
        }

        let report = BatchReport::aggregate(batch_id, reviews, elapsed);
        info!(
            %batch_id,
            succeeded = report.succeeded(),
            failed = report.reviews.len() - report.succeeded(),
            total_latency_ms = report.total_latency_ms,
            input_tokens = report.total_tokens.input,
            output_tokens = report.total_tokens.output,
            total_cost_usd = report.total_cost_usd,
            "review batch finished"
        );
        report
    }

    /// Probe the model-listing endpoint of each model's provider.
    ///
    /// `None` checks every configured model. Models that cannot be resolved
    /// report unhealthy without a network call.
    pub async fn health(&self, model_ids: Option<&[String]>) -> Vec<ModelHealth> {
        let ids: Vec<String> = match model_ids {
            Some(ids) => ids.to_vec(),
            None => self
                .catalog
                .entries()
                .iter()
                .map(|e| e.id.clone())
                .collect(),
        };

        let checks = ids.into_iter().map(|model| async move {
            let healthy = match self.health_target(&model) {
                Ok((provider, target)) => {
                    // Adapters set their own probe timeout; this caps custom ones.
                    tokio::time::timeout(
                        HEALTH_CHECK_TIMEOUT * 2,
                        provider.health_check(&target),
                    )
                    .await
                    .unwrap_or(false)
                }
                Err(err) => {
                    info!(model = %model, error = %err, "skipping health check");
                    false
                }
            };
            ModelHealth { model, healthy }
        });

        join_all(checks).await
    }

    fn plan(
        &self,
        model_id: &str,
        artifact: Arc<str>,
        prompt: Arc<str>,
        retry: &RetryPolicy,
    ) -> Result<(Arc<dyn ReviewProvider>, ReviewRequest), ProviderError> {
        let req = self.catalog.resolve(model_id, artifact, prompt, retry)?;
        let provider = self.provider_for(req.target.kind)?;
        Ok((provider, req))
    }

    fn health_target(
        &self,
        model_id: &str,
    ) -> Result<(Arc<dyn ReviewProvider>, ProviderTarget), ProviderError> {
        let entry = self
            .catalog
            .get(model_id)
            .ok_or_else(|| ProviderError::config(format!("Unknown model: {model_id}")))?;
        let target = entry.target()?;
        let provider = self.provider_for(target.kind)?;
        Ok((provider, target))
    }

    fn provider_for(&self, kind: ProviderKind) -> Result<Arc<dyn ReviewProvider>, ProviderError> {
        self.registry
            .get(kind)
            .ok_or_else(|| ProviderError::config(format!("Unknown provider type: {kind}")))
    }
}
