//! Usage tracking via the UsageSink trait.
//!
//! The orchestrator reports every finished call through a UsageSink. This
//! decouples accounting from any specific backend:
//! - the CLI uses StderrUsageSink (`--usage-log`) or TracingUsageSink
//! - tests use NoopUsageSink or a recording sink

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::types::{ReviewResult, TokenUsage};

/// Status of a provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Success,
    Error,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Success => "success",
            CallStatus::Error => "error",
        }
    }
}

/// Record of one model's review call.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderCallRecord {
    /// Batch this call belonged to.
    pub batch_id: Uuid,
    /// Configured model id.
    pub model_id: String,
    /// Provider tag, "unknown" when the model never resolved.
    pub provider: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Cost in USD, when pricing was configured.
    pub cost_usd: Option<f64>,
    pub latency_ms: u64,
    pub retries: u32,
    pub status: CallStatus,
    /// Error text if status is Error.
    pub error: Option<String>,
    /// When the call finished.
    pub timestamp: DateTime<Utc>,
}

impl ProviderCallRecord {
    /// Create a new record with required fields, defaulting others.
    pub fn new(batch_id: Uuid, model_id: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            batch_id,
            model_id: model_id.into(),
            provider: provider.into(),
            input_tokens: 0,
            output_tokens: 0,
            cost_usd: None,
            latency_ms: 0,
            retries: 0,
            status: CallStatus::Success,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn tokens(mut self, tokens: TokenUsage) -> Self {
        self.input_tokens = tokens.input;
        self.output_tokens = tokens.output;
        self
    }

    pub fn cost(mut self, usd: Option<f64>) -> Self {
        self.cost_usd = usd;
        self
    }

    pub fn latency(mut self, ms: u64) -> Self {
        self.latency_ms = ms;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.status = CallStatus::Error;
        self.error = Some(message.into());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Fill tokens, cost, latency, retries and status from a result.
    pub fn result(self, result: &ReviewResult) -> Self {
        let record = self
            .tokens(result.tokens())
            .cost(result.cost_usd())
            .latency(result.latency_ms())
            .retries(result.retries_used());
        match result.error() {
            Some(message) => record.error(message),
            None => record,
        }
    }
}

/// Trait for recording provider call usage.
///
/// Implement this trait to customize where usage data is stored.
#[async_trait]
pub trait UsageSink: Send + Sync {
    /// Record a provider call. This should be fire-and-forget:
    /// failures should be logged but not propagated.
    async fn record(&self, record: ProviderCallRecord);
}

/// No-op usage sink that discards all records.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopUsageSink;

#[async_trait]
impl UsageSink for NoopUsageSink {
    async fn record(&self, _record: ProviderCallRecord) {
        // Discard
    }
}

/// Usage sink that writes to stderr as JSON lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrUsageSink;

#[async_trait]
impl UsageSink for StderrUsageSink {
    async fn record(&self, record: ProviderCallRecord) {
        match serde_json::to_string(&record) {
            Ok(line) => eprintln!("{line}"),
            Err(e) => tracing::warn!(error = %e, "failed to serialize usage record"),
        }
    }
}

/// Usage sink that emits one structured `tracing` event per call.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingUsageSink;

#[async_trait]
impl UsageSink for TracingUsageSink {
    async fn record(&self, record: ProviderCallRecord) {
        tracing::info!(
            batch_id = %record.batch_id,
            model = %record.model_id,
            provider = %record.provider,
            status = record.status.as_str(),
            input_tokens = record.input_tokens,
            output_tokens = record.output_tokens,
            cost_usd = record.cost_usd,
            latency_ms = record.latency_ms,
            retries = record.retries,
            error = record.error.as_deref(),
            "provider call"
        );
    }
}
