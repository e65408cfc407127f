use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use external_review::config::{ExecutionDefaults, ModelCatalog};
use external_review::gateway::usage::{CallStatus, ProviderCallRecord};
use external_review::gateway::{
    ProviderKind, ProviderRegistry, ProviderTarget, ReviewProvider, ReviewRequest, ReviewResult,
    TokenUsage, UsageSink,
};
use external_review::Orchestrator;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn catalog_yaml(endpoint: &str) -> String {
    format!(
        r#"
models:
  m1:
    provider: openai_compat
    endpoint: {endpoint}
    model: model-one
    api_key: sk-one
    pricing:
      input_per_1m: 1.0
      output_per_1m: 2.0
  keyless:
    provider: openai_compat
    endpoint: {endpoint}
    model: model-two
    api_key_env: DEFINITELY_UNSET_REVIEW_KEY
  exotic:
    provider: smoke_signals
    endpoint: {endpoint}
    model: model-three
    api_key: sk-three
"#
    )
}

fn catalog(endpoint: &str) -> Arc<ModelCatalog> {
    Arc::new(ModelCatalog::from_yaml_str(&catalog_yaml(endpoint), |_| None).unwrap())
}

fn ids(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[derive(Default)]
struct RecordingSink {
    records: Mutex<Vec<ProviderCallRecord>>,
}

#[async_trait]
impl UsageSink for RecordingSink {
    async fn record(&self, record: ProviderCallRecord) {
        self.records.lock().unwrap().push(record);
    }
}

const SLOW_MS: u64 = 200;

/// Answers with the model name after a per-model delay.
struct DelayedEcho;

#[async_trait]
impl ReviewProvider for DelayedEcho {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAiCompat
    }

    async fn review(&self, req: &ReviewRequest) -> ReviewResult {
        let delay = if req.model.starts_with("slow") { SLOW_MS } else { 0 };
        tokio::time::sleep(Duration::from_millis(delay)).await;
        ReviewResult::Success {
            text: req.model.clone(),
            tokens: TokenUsage::new(1, 1),
            cost_usd: None,
            latency_ms: delay,
            retries_used: 0,
        }
    }

    async fn health_check(&self, _target: &ProviderTarget) -> bool {
        true
    }
}

/// Panics on any model whose upstream name contains "boom".
struct Explosive;

#[async_trait]
impl ReviewProvider for Explosive {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
    }

    async fn review(&self, req: &ReviewRequest) -> ReviewResult {
        if req.model.contains("boom") {
            panic!("adapter bug");
        }
        ReviewResult::Success {
            text: "calm".into(),
            tokens: TokenUsage::new(2, 3),
            cost_usd: Some(0.5),
            latency_ms: 1,
            retries_used: 0,
        }
    }

    async fn health_check(&self, _target: &ProviderTarget) -> bool {
        false
    }
}

#[tokio::test]
async fn mixed_batch_keeps_order_and_aggregates_successes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "content": "Looks solid." } }],
            "usage": { "prompt_tokens": 100, "completion_tokens": 50 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let sink = Arc::new(RecordingSink::default());
    let orchestrator = Orchestrator::new(
        catalog(&server.uri()),
        Arc::new(ProviderRegistry::with_client(reqwest::Client::new())),
    )
    .with_usage_sink(sink.clone());

    let report = orchestrator
        .review_all(&ids(&["m1", "m2"]), "artifact", "prompt", None)
        .await;

    let order: Vec<&str> = report.reviews.iter().map(|r| r.model_id.as_str()).collect();
    assert_eq!(order, ["m1", "m2"]);
    assert_eq!(report.reviews[0].result.cost_usd(), Some(0.0002));
    assert_eq!(report.reviews[1].result.error(), Some("Unknown model: m2"));
    assert_eq!(report.reviews[1].result.retries_used(), 0);
    assert_eq!(report.total_tokens, TokenUsage::new(100, 50));
    assert_eq!(report.total_cost_usd, Some(0.0002));

    let records = sink.records.lock().unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.batch_id == report.batch_id));
    assert_eq!(records[0].status, CallStatus::Success);
    assert_eq!(records[1].provider, "unknown");
}

#[tokio::test]
async fn configuration_errors_fail_without_network_calls() {
    let server = MockServer::start().await;
    let orchestrator = Orchestrator::new(
        catalog(&server.uri()),
        Arc::new(ProviderRegistry::with_client(reqwest::Client::new())),
    );

    let report = orchestrator
        .review_all(&ids(&["keyless", "exotic"]), "artifact", "prompt", None)
        .await;

    assert_eq!(
        report.reviews[0].result.error(),
        Some("No API key for model: keyless")
    );
    assert_eq!(
        report.reviews[1].result.error(),
        Some("Unknown provider type: smoke_signals")
    );
    assert_eq!(report.total_tokens, TokenUsage::default());
    assert_eq!(report.total_cost_usd, None);
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn kind_without_registered_adapter_is_a_configuration_error() {
    let orchestrator = Orchestrator::new(
        catalog("http://127.0.0.1:9"),
        Arc::new(ProviderRegistry::empty()),
    );

    let report = orchestrator
        .review_all(&ids(&["m1"]), "artifact", "prompt", None)
        .await;
    assert_eq!(
        report.reviews[0].result.error(),
        Some("Unknown provider type: openai_compat")
    );
}

#[tokio::test]
async fn results_follow_request_order_not_completion_order() {
    let yaml = r#"
models:
  slow:
    provider: openai_compat
    endpoint: http://unused.test
    model: slow-model
    api_key: k
  fast:
    provider: openai_compat
    endpoint: http://unused.test
    model: fast-model
    api_key: k
"#;
    let mut registry = ProviderRegistry::empty();
    registry.register(Arc::new(DelayedEcho));
    let orchestrator = Orchestrator::new(
        Arc::new(ModelCatalog::from_yaml_str(yaml, |_| None).unwrap()),
        Arc::new(registry),
    );

    let report = orchestrator
        .review_all(&ids(&["slow", "fast"]), "artifact", "prompt", None)
        .await;

    assert_eq!(report.reviews[0].model_id, "slow");
    assert_eq!(report.reviews[1].model_id, "fast");
    assert!(report.reviews[0].finished_at >= report.reviews[1].finished_at);
    assert_eq!(report.total_tokens, TokenUsage::new(2, 2));
    assert!(report.total_latency_ms >= SLOW_MS);
}

#[tokio::test]
async fn panicking_task_is_isolated() {
    let yaml = r#"
models:
  steady:
    provider: google
    endpoint: http://unused.test
    model: steady-model
    api_key: k
  fragile:
    provider: google
    endpoint: http://unused.test
    model: boom-model
    api_key: k
"#;
    let mut registry = ProviderRegistry::empty();
    registry.register(Arc::new(Explosive));
    let orchestrator = Orchestrator::new(
        Arc::new(ModelCatalog::from_yaml_str(yaml, |_| None).unwrap()),
        Arc::new(registry),
    );

    let report = orchestrator
        .review_all(&ids(&["steady", "fragile"]), "artifact", "prompt", None)
        .await;

    assert!(report.reviews[0].result.is_success());
    let error = report.reviews[1].result.error().unwrap_or_default();
    assert!(error.starts_with("Review task failed"), "{error}");
    assert_eq!(report.total_tokens, TokenUsage::new(2, 3));
    assert_eq!(report.total_cost_usd, Some(0.5));
}

#[tokio::test]
async fn retry_attempts_come_from_execution_defaults() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(502))
        .expect(2)
        .mount(&server)
        .await;

    let orchestrator = Orchestrator::new(
        catalog(&server.uri()),
        Arc::new(ProviderRegistry::with_client(reqwest::Client::new())),
    )
    .with_defaults(ExecutionDefaults {
        retry_attempts: 1,
        ..Default::default()
    })
    .with_backoff(Duration::ZERO, Duration::ZERO);

    let report = orchestrator
        .review_all(&ids(&["m1"]), "artifact", "prompt", Some(5.0))
        .await;

    assert_eq!(report.reviews[0].result.error(), Some("HTTP 502"));
    assert_eq!(report.reviews[0].result.retries_used(), 1);
}

#[tokio::test]
async fn health_reports_unresolvable_models_as_unhealthy() {
    let yaml = r#"
models:
  ok:
    provider: openai_compat
    endpoint: http://unused.test
    model: ok-model
    api_key: k
  keyless:
    provider: openai_compat
    endpoint: http://unused.test
    model: other
"#;
    let mut registry = ProviderRegistry::empty();
    registry.register(Arc::new(DelayedEcho));
    let orchestrator = Orchestrator::new(
        Arc::new(ModelCatalog::from_yaml_str(yaml, |_| None).unwrap()),
        Arc::new(registry),
    );

    let all = orchestrator.health(None).await;
    let summary: Vec<(&str, bool)> = all.iter().map(|h| (h.model.as_str(), h.healthy)).collect();
    assert_eq!(summary, [("ok", true), ("keyless", false)]);

    let one = orchestrator.health(Some(ids(&["missing"]).as_slice())).await;
    assert_eq!(one.len(), 1);
    assert!(!one[0].healthy);
}

fn echo_orchestrator(yaml: &str) -> Orchestrator {
    let mut registry = ProviderRegistry::empty();
    registry.register(Arc::new(DelayedEcho));
    Orchestrator::new(
        Arc::new(ModelCatalog::from_yaml_str(yaml, |_| None).unwrap()),
        Arc::new(registry),
    )
}

const THREE_SLOW: &str = r#"
models:
  a:
    provider: openai_compat
    endpoint: http://unused.test
    model: slow-a
    api_key: k
  b:
    provider: openai_compat
    endpoint: http://unused.test
    model: slow-b
    api_key: k
  c:
    provider: openai_compat
    endpoint: http://unused.test
    model: slow-c
    api_key: k
"#;

#[tokio::test]
async fn model_calls_run_concurrently() {
    let orchestrator = echo_orchestrator(THREE_SLOW);

    let report = orchestrator
        .review_all(&ids(&["a", "b", "c"]), "artifact", "prompt", None)
        .await;

    assert_eq!(report.succeeded(), 3);
    assert!(report.total_latency_ms >= SLOW_MS, "{}", report.total_latency_ms);
    assert!(
        report.total_latency_ms < 2 * SLOW_MS,
        "calls ran one after another: {} ms",
        report.total_latency_ms
    );
}

#[tokio::test]
async fn unrepresentable_timeout_override_still_yields_a_report() {
    let orchestrator = echo_orchestrator(THREE_SLOW);

    for timeout in [1e20, f64::MAX, f64::INFINITY] {
        let report = orchestrator
            .review_all(&ids(&["a"]), "artifact", "prompt", Some(timeout))
            .await;
        assert_eq!(report.reviews.len(), 1);
        assert!(report.reviews[0].result.is_success(), "{timeout}");
    }
    assert_eq!(
        orchestrator.retry_policy(Some(1e20)).attempt_timeout,
        Duration::from_secs(120)
    );
}
