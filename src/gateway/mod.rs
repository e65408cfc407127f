//! Provider gateway: one review contract over several LLM wire shapes.

pub mod error;
pub mod google;
pub mod openai_compat;
pub mod pricing;
pub mod retry;
pub mod types;
pub mod usage;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::StatusCode;

use google::GoogleAdapter;
use openai_compat::OpenAiCompatAdapter;

pub use error::{AttemptTimeout, ErrorContext, ProviderError, RETRYABLE_STATUSES};
pub use pricing::{review_cost, round_usd, Pricing};
pub use retry::{RetryOutcome, RetryPolicy};
pub use types::*;
pub use usage::{NoopUsageSink, StderrUsageSink, TracingUsageSink, UsageSink};

/// Maximum allowed response body length (1MB).
const MAX_RESPONSE_LEN: usize = 1_024 * 1_024;

/// Timeout for the model-listing health probe.
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// TRAIT
// =============================================================================

/// A provider that can review an artifact.
///
/// `review` never returns an error: transport and provider failures are
/// folded into [`ReviewResult::Failure`].
#[async_trait::async_trait]
pub trait ReviewProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    async fn review(&self, req: &ReviewRequest) -> ReviewResult;

    /// Lightweight connectivity probe against the model-listing endpoint.
    async fn health_check(&self, target: &ProviderTarget) -> bool;
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Maps a provider kind to the adapter that speaks it.
#[derive(Clone)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderKind, Arc<dyn ReviewProvider>>,
}

impl ProviderRegistry {
    /// Registry with both built-in adapters sharing one HTTP client.
    pub fn new() -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .build()
            .map_err(|e| ProviderError::config(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(OpenAiCompatAdapter::new(client.clone())));
        registry.register(Arc::new(GoogleAdapter::new(client)));
        registry
    }

    pub fn empty() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    /// Register (or replace) the adapter for `provider.kind()`.
    pub fn register(&mut self, provider: Arc<dyn ReviewProvider>) {
        self.providers.insert(provider.kind(), provider);
    }

    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn ReviewProvider>> {
        self.providers.get(&kind).cloned()
    }
}

// =============================================================================
// SHARED EXCHANGE
// =============================================================================

/// Send one request and return the body of a 200 response.
///
/// Any other status becomes [`ProviderError::Status`]; retryability is
/// decided by the caller's retry loop. Only a 200 body is held to the size
/// limit; error bodies are cut at the limit instead.
pub(crate) async fn exchange(
    provider: &'static str,
    request: reqwest::RequestBuilder,
) -> Result<Vec<u8>, ProviderError> {
    let mut response = request.send().await?;

    let status = response.status();
    let request_id = extract_request_id(response.headers());

    if status != StatusCode::OK {
        let ctx = ErrorContext::new().with_status(status.as_u16());
        let ctx = match request_id {
            Some(id) => ctx.with_request_id(id),
            None => ctx,
        };
        let bytes = read_error_body(&mut response).await;
        let body = String::from_utf8_lossy(&bytes);
        return Err(ProviderError::status(provider, status.as_u16(), &body, ctx));
    }

    // Stream response to enforce size limit
    let mut bytes = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        let new_len = bytes.len() + chunk.len();
        if new_len > MAX_RESPONSE_LEN {
            return Err(ProviderError::invalid_response(
                provider,
                format!("Response too large: {new_len} bytes"),
            ));
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}

/// Read at most `MAX_RESPONSE_LEN` bytes of an error body. A body that
/// fails midway keeps what arrived.
async fn read_error_body(response: &mut reqwest::Response) -> Vec<u8> {
    let mut bytes = Vec::new();
    while let Ok(Some(chunk)) = response.chunk().await {
        let room = MAX_RESPONSE_LEN - bytes.len();
        if chunk.len() >= room {
            bytes.extend_from_slice(&chunk[..room]);
            break;
        }
        bytes.extend_from_slice(&chunk);
    }
    bytes
}

/// Run a health probe; true only on HTTP 200.
pub(crate) async fn probe(request: reqwest::RequestBuilder) -> bool {
    match request.timeout(HEALTH_CHECK_TIMEOUT).send().await {
        Ok(resp) => resp.status() == StatusCode::OK,
        Err(err) => {
            tracing::debug!(error = %err, "health check failed");
            false
        }
    }
}

/// Drive one review through the retry loop and fold the outcome.
pub(crate) async fn run_review<F, Fut>(req: &ReviewRequest, attempt: F) -> ReviewResult
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<Completion, ProviderError>>,
{
    let start = Instant::now();
    let outcome = req
        .retry
        .execute(attempt, ProviderError::is_retryable)
        .await;
    ReviewResult::from_outcome(outcome, req.pricing.as_ref(), start.elapsed())
}

/// Merge caller-supplied fields over a generated JSON object.
pub(crate) fn merge_extra(
    body: &mut serde_json::Map<String, serde_json::Value>,
    extra: &serde_json::Map<String, serde_json::Value>,
) {
    for (key, value) in extra {
        body.insert(key.clone(), value.clone());
    }
}

/// Extract request ID from response headers.
fn extract_request_id(headers: &reqwest::header::HeaderMap) -> Option<String> {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}
