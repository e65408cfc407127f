//! Adapter for OpenAI-compatible chat completion APIs (Kimi, DeepSeek, Together, ...).

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::error::ProviderError;
use super::types::*;
use super::{exchange, merge_extra, probe, run_review, ReviewProvider};

const PROVIDER: &str = "openai_compat";

// =============================================================================
// ADAPTER
// =============================================================================

/// OpenAI-compatible chat completion adapter.
#[derive(Debug, Clone)]
pub struct OpenAiCompatAdapter {
    client: reqwest::Client,
}

impl OpenAiCompatAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn chat_url(target: &ProviderTarget) -> String {
        format!("{}/chat/completions", target.endpoint)
    }

    fn models_url(target: &ProviderTarget) -> String {
        format!("{}/models", target.endpoint)
    }

    /// Build the JSON body: typed fields first, then caller overrides.
    pub fn build_body(req: &ReviewRequest) -> serde_json::Value {
        let mut body = serde_json::Map::new();
        body.insert("model".into(), json!(req.model));
        body.insert(
            "messages".into(),
            json!([
                { "role": "system", "content": &*req.prompt },
                { "role": "user", "content": &*req.artifact },
            ]),
        );
        if let Some(temperature) = req.sampling.temperature {
            body.insert("temperature".into(), json!(temperature));
        }
        if let Some(max_tokens) = req.sampling.max_tokens {
            body.insert("max_tokens".into(), json!(max_tokens));
        }
        if let Some(top_p) = req.sampling.top_p {
            body.insert("top_p".into(), json!(top_p));
        }
        merge_extra(&mut body, &req.extra_params);
        serde_json::Value::Object(body)
    }

    /// Parse a 200 response body into a completion.
    pub fn parse_response(bytes: &[u8]) -> Result<Completion, ProviderError> {
        let parsed: ChatApiResponse = serde_json::from_slice(bytes)
            .map_err(|e| ProviderError::invalid_response(PROVIDER, format!("Invalid JSON: {e}")))?;

        let choice = parsed
            .choices
            .and_then(|c| c.into_iter().next())
            .ok_or_else(|| ProviderError::invalid_response(PROVIDER, "No choices in response"))?;

        let text = choice
            .message
            .and_then(|m| m.content)
            .unwrap_or_default();

        let usage = parsed.usage.unwrap_or_default();
        Ok(Completion {
            text,
            tokens: TokenUsage::new(
                usage.prompt_tokens.unwrap_or(0),
                usage.completion_tokens.unwrap_or(0),
            ),
        })
    }

    async fn attempt(
        &self,
        target: &ProviderTarget,
        body: &serde_json::Value,
        attempt: u32,
    ) -> Result<Completion, ProviderError> {
        debug!(provider = PROVIDER, attempt, "sending chat completion");
        let request = self
            .client
            .post(Self::chat_url(target))
            .bearer_auth(target.api_key.expose())
            .json(body);
        let bytes = exchange(PROVIDER, request).await?;
        Self::parse_response(&bytes)
    }
}

// =============================================================================
// API TYPES
// =============================================================================

#[derive(Deserialize)]
struct ChatApiResponse {
    choices: Option<Vec<Choice>>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct Usage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
}

// =============================================================================
// REVIEW PROVIDER IMPL
// =============================================================================

#[async_trait]
impl ReviewProvider for OpenAiCompatAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAiCompat
    }

    async fn review(&self, req: &ReviewRequest) -> ReviewResult {
        let body = Self::build_body(req);
        run_review(req, |attempt| self.attempt(&req.target, &body, attempt)).await
    }

    async fn health_check(&self, target: &ProviderTarget) -> bool {
        probe(
            self.client
                .get(Self::models_url(target))
                .bearer_auth(target.api_key.expose()),
        )
        .await
    }
}
