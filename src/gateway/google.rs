//! Adapter for the Google Generative Language API (Gemini).

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::error::ProviderError;
use super::types::*;
use super::{exchange, merge_extra, probe, run_review, ReviewProvider};

const PROVIDER: &str = "google";

/// Google `generateContent` adapter. The API key travels as a query parameter.
#[derive(Debug, Clone)]
pub struct GoogleAdapter {
    client: reqwest::Client,
}

impl GoogleAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn generate_url(target: &ProviderTarget, model: &str) -> String {
        format!("{}/models/{}:generateContent", target.endpoint, model)
    }

    fn models_url(target: &ProviderTarget) -> String {
        format!("{}/models", target.endpoint)
    }

    /// Build the JSON body. Extra params land in `generationConfig`, after
    /// the mapped sampling fields, and the block is dropped when empty.
    pub fn build_body(req: &ReviewRequest) -> serde_json::Value {
        let mut generation_config = serde_json::Map::new();
        if let Some(temperature) = req.sampling.temperature {
            generation_config.insert("temperature".into(), json!(temperature));
        }
        if let Some(max_tokens) = req.sampling.max_tokens {
            generation_config.insert("maxOutputTokens".into(), json!(max_tokens));
        }
        if let Some(top_p) = req.sampling.top_p {
            generation_config.insert("topP".into(), json!(top_p));
        }
        merge_extra(&mut generation_config, &req.extra_params);

        let mut body = json!({
            "system_instruction": { "parts": [{ "text": &*req.prompt }] },
            "contents": [{ "parts": [{ "text": &*req.artifact }] }],
        });
        if !generation_config.is_empty() {
            body["generationConfig"] = serde_json::Value::Object(generation_config);
        }
        body
    }

    /// Parse a 200 response body into a completion.
    pub fn parse_response(bytes: &[u8]) -> Result<Completion, ProviderError> {
        let parsed: GenerateResponse = serde_json::from_slice(bytes)
            .map_err(|e| ProviderError::invalid_response(PROVIDER, format!("Invalid JSON: {e}")))?;

        let text = parsed
            .candidates
            .unwrap_or_default()
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<String>()
            })
            .unwrap_or_default();

        let usage = parsed.usage_metadata.unwrap_or_default();
        Ok(Completion {
            text,
            tokens: TokenUsage::new(
                usage.prompt_token_count.unwrap_or(0),
                usage.candidates_token_count.unwrap_or(0),
            ),
        })
    }

    async fn attempt(
        &self,
        req: &ReviewRequest,
        body: &serde_json::Value,
        attempt: u32,
    ) -> Result<Completion, ProviderError> {
        debug!(provider = PROVIDER, attempt, model = %req.model, "sending generateContent");
        let request = self
            .client
            .post(Self::generate_url(&req.target, &req.model))
            .query(&[("key", req.target.api_key.expose())])
            .json(body);
        let bytes = exchange(PROVIDER, request).await?;
        Self::parse_response(&bytes)
    }
}

// =============================================================================
// API TYPES
// =============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    parts: Option<Vec<CandidatePart>>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: Option<u64>,
    candidates_token_count: Option<u64>,
}

// =============================================================================
// REVIEW PROVIDER IMPL
// =============================================================================

#[async_trait]
impl ReviewProvider for GoogleAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
    }

    async fn review(&self, req: &ReviewRequest) -> ReviewResult {
        let body = Self::build_body(req);
        run_review(req, |attempt| self.attempt(req, &body, attempt)).await
    }

    async fn health_check(&self, target: &ProviderTarget) -> bool {
        probe(
            self.client
                .get(Self::models_url(target))
                .query(&[("key", target.api_key.expose())]),
        )
        .await
    }
}
