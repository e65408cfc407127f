//! Core types for the provider gateway.

use std::fmt;
use std::ops::AddAssign;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::ProviderError;
use super::pricing::{review_cost, Pricing};
use super::retry::{RetryOutcome, RetryPolicy};

// =============================================================================
// PROVIDER TARGET
// =============================================================================

/// Which wire shape a provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// OpenAI-style `/chat/completions` (Kimi, DeepSeek, Together, ...).
    OpenAiCompat,
    /// Google `models/{model}:generateContent`.
    Google,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAiCompat => "openai_compat",
            ProviderKind::Google => "google",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai_compat" => Ok(ProviderKind::OpenAiCompat),
            "google" => Ok(ProviderKind::Google),
            other => Err(ProviderError::config(format!(
                "Unknown provider type: {other}"
            ))),
        }
    }
}

/// Provider credential. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// Where a call goes and how it authenticates.
#[derive(Debug, Clone)]
pub struct ProviderTarget {
    pub kind: ProviderKind,
    /// Base URL without a trailing slash.
    pub endpoint: String,
    pub api_key: ApiKey,
}

impl ProviderTarget {
    pub fn new(kind: ProviderKind, endpoint: impl Into<String>, api_key: ApiKey) -> Self {
        let endpoint = endpoint.into();
        Self {
            kind,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

// =============================================================================
// REQUEST
// =============================================================================

/// Sampling parameters shared by both wire shapes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SamplingParams {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f64>,
}

/// One normalized review call. Built once per model per batch and never mutated.
#[derive(Debug, Clone)]
pub struct ReviewRequest {
    /// Configuration id the caller asked for, e.g. "kimi-k2".
    pub model_id: String,
    /// Upstream model name sent to the provider.
    pub model: String,
    pub target: ProviderTarget,
    /// Artifact content, shared across the batch.
    pub artifact: Arc<str>,
    /// Review instructions, sent as the system instruction.
    pub prompt: Arc<str>,
    pub sampling: SamplingParams,
    /// Provider-specific fields merged last into the request body.
    pub extra_params: serde_json::Map<String, serde_json::Value>,
    pub retry: RetryPolicy,
    pub pricing: Option<Pricing>,
}

impl ReviewRequest {
    pub fn new(
        model_id: impl Into<String>,
        model: impl Into<String>,
        target: ProviderTarget,
        artifact: Arc<str>,
        prompt: Arc<str>,
    ) -> Self {
        Self {
            model_id: model_id.into(),
            model: model.into(),
            target,
            artifact,
            prompt,
            sampling: SamplingParams::default(),
            extra_params: serde_json::Map::new(),
            retry: RetryPolicy::default(),
            pricing: None,
        }
    }

    pub fn sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn extra_params(mut self, params: serde_json::Map<String, serde_json::Value>) -> Self {
        self.extra_params = params;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn pricing(mut self, pricing: Option<Pricing>) -> Self {
        self.pricing = pricing;
        self
    }
}

// =============================================================================
// RESULT
// =============================================================================

/// Token counts reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
}

impl TokenUsage {
    pub fn new(input: u64, output: u64) -> Self {
        Self { input, output }
    }

    pub fn total(&self) -> u64 {
        self.input.saturating_add(self.output)
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.input = self.input.saturating_add(rhs.input);
        self.output = self.output.saturating_add(rhs.output);
    }
}

/// What one successful HTTP round trip produced, before pricing.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub tokens: TokenUsage,
}

/// Outcome of one model's review call.
#[derive(Debug, Clone, PartialEq)]
pub enum ReviewResult {
    Success {
        text: String,
        tokens: TokenUsage,
        cost_usd: Option<f64>,
        latency_ms: u64,
        retries_used: u32,
    },
    Failure {
        error: String,
        latency_ms: u64,
        retries_used: u32,
    },
}

impl ReviewResult {
    /// A failure that never reached the network.
    pub fn rejected(error: impl Into<String>) -> Self {
        ReviewResult::Failure {
            error: error.into(),
            latency_ms: 0,
            retries_used: 0,
        }
    }

    /// Fold a retry loop's outcome into a result, pricing successful calls.
    pub fn from_outcome(
        outcome: RetryOutcome<Completion, ProviderError>,
        pricing: Option<&Pricing>,
        latency: Duration,
    ) -> Self {
        let latency_ms = latency.as_millis() as u64;
        let retries_used = outcome.retries;
        match outcome.result {
            Ok(completion) => ReviewResult::Success {
                cost_usd: review_cost(completion.tokens, pricing),
                text: completion.text,
                tokens: completion.tokens,
                latency_ms,
                retries_used,
            },
            Err(err) => ReviewResult::Failure {
                error: err.to_string(),
                latency_ms,
                retries_used,
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ReviewResult::Success { .. })
    }

    /// Tokens consumed; failures count as zero.
    pub fn tokens(&self) -> TokenUsage {
        match self {
            ReviewResult::Success { tokens, .. } => *tokens,
            ReviewResult::Failure { .. } => TokenUsage::default(),
        }
    }

    pub fn cost_usd(&self) -> Option<f64> {
        match self {
            ReviewResult::Success { cost_usd, .. } => *cost_usd,
            ReviewResult::Failure { .. } => None,
        }
    }

    pub fn latency_ms(&self) -> u64 {
        match self {
            ReviewResult::Success { latency_ms, .. } | ReviewResult::Failure { latency_ms, .. } => {
                *latency_ms
            }
        }
    }

    pub fn retries_used(&self) -> u32 {
        match self {
            ReviewResult::Success { retries_used, .. }
            | ReviewResult::Failure { retries_used, .. } => *retries_used,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ReviewResult::Success { .. } => None,
            ReviewResult::Failure { error, .. } => Some(error),
        }
    }
}
