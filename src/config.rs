//! Configuration: the models catalog and execution defaults.
//!
//! Two YAML files feed the engine:
//! - a models file (`~/.claude/models.yaml`) with one entry per reviewer
//!   model plus optional per-model sampling `settings`
//! - an execution file with `execution: {timeout_seconds, retry_attempts}`
//!
//! The models file is forgiving: a missing or unreadable file yields an empty
//! catalog and entries missing a required field are dropped. The execution
//! file is strict once it exists.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::gateway::{
    ApiKey, Pricing, ProviderError, ProviderKind, ProviderTarget, RetryPolicy, ReviewRequest,
    SamplingParams,
};

pub const DEFAULT_TIMEOUT_SECONDS: f64 = 120.0;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 2;
pub const DEFAULT_RETRY_BUDGET_SECONDS: f64 = 60.0;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", .path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// =============================================================================
// Execution defaults
// =============================================================================

/// Timeout and retry defaults applied to every call in a batch.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ExecutionDefaults {
    /// Per-attempt timeout.
    pub timeout_seconds: f64,
    /// Retries after the first attempt.
    pub retry_attempts: u32,
    /// Wall-clock cap on one call's retry loop.
    pub retry_budget_seconds: f64,
}

impl Default for ExecutionDefaults {
    fn default() -> Self {
        Self {
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_budget_seconds: DEFAULT_RETRY_BUDGET_SECONDS,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ExecutionFile {
    #[serde(default)]
    execution: ExecutionDefaults,
}

impl ExecutionDefaults {
    /// Load from an execution config file; a missing file means defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no execution config, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::FileRead {
                    path: path.to_owned(),
                    source,
                })
            }
        };

        let defaults = Self::from_yaml_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })?;
        defaults.validate()?;
        Ok(defaults)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, serde_yaml::Error> {
        let file: Option<ExecutionFile> = serde_yaml::from_str(yaml)?;
        Ok(file.unwrap_or_default().execution)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if positive_duration(self.timeout_seconds).is_none() {
            return Err(ConfigError::Invalid(format!(
                "execution.timeout_seconds must be > 0 and fit a duration, got {}",
                self.timeout_seconds
            )));
        }
        if self.retry_budget_seconds != 0.0 && positive_duration(self.retry_budget_seconds).is_none()
        {
            return Err(ConfigError::Invalid(format!(
                "execution.retry_budget_seconds must be >= 0 and fit a duration, got {}",
                self.retry_budget_seconds
            )));
        }
        Ok(())
    }

    /// Retry policy for one batch. A positive `timeout_override` replaces the
    /// configured per-attempt timeout; one that is not a usable duration is
    /// ignored. Unusable configured values fall back to the defaults.
    pub fn retry_policy(&self, timeout_override: Option<f64>) -> RetryPolicy {
        let timeout = timeout_override
            .and_then(positive_duration)
            .or_else(|| positive_duration(self.timeout_seconds))
            .unwrap_or(Duration::from_secs_f64(DEFAULT_TIMEOUT_SECONDS));
        let budget = if self.retry_budget_seconds == 0.0 {
            Duration::ZERO
        } else {
            positive_duration(self.retry_budget_seconds)
                .unwrap_or(Duration::from_secs_f64(DEFAULT_RETRY_BUDGET_SECONDS))
        };
        RetryPolicy::new(self.retry_attempts, timeout).budget(budget)
    }
}

/// Seconds as a `Duration`, if finite, positive and representable.
fn positive_duration(seconds: f64) -> Option<Duration> {
    if seconds.is_nan() || seconds <= 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(seconds).ok()
}

// =============================================================================
// Models catalog
// =============================================================================

/// One entry of the models file, as written.
#[derive(Debug, Clone, Deserialize)]
struct ModelEntry {
    provider: String,
    endpoint: String,
    model: String,
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    api_key_env: Option<String>,
    #[serde(default)]
    pricing: Option<Pricing>,
}

/// Per-model sampling settings. Unrecognized keys are forwarded to the
/// provider as extra request parameters.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ModelSettings {
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ModelSettings {
    pub fn sampling(&self) -> SamplingParams {
        SamplingParams {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            top_p: self.top_p,
        }
    }
}

/// A usable model, credentials already resolved.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub id: String,
    /// Provider tag as configured; may name a provider we do not support.
    pub provider: String,
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<ApiKey>,
    pub pricing: Option<Pricing>,
    pub settings: ModelSettings,
}

impl CatalogEntry {
    pub fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    /// The provider target, or the configuration error that prevents a call.
    pub fn target(&self) -> Result<ProviderTarget, ProviderError> {
        let api_key = self
            .api_key
            .clone()
            .ok_or_else(|| ProviderError::config(format!("No API key for model: {}", self.id)))?;
        let kind: ProviderKind = self.provider.parse()?;
        Ok(ProviderTarget::new(kind, &self.endpoint, api_key))
    }
}

/// Read-only table of configured models, in file order.
#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    entries: Vec<CatalogEntry>,
}

impl ModelCatalog {
    /// Load the models file, resolving `api_key_env` from the process environment.
    pub fn load(path: &Path) -> Self {
        Self::load_with(path, |name| std::env::var(name).ok())
    }

    /// Load the models file with a custom environment lookup.
    ///
    /// Never fails: a missing or malformed file yields an empty catalog.
    pub fn load_with<F>(path: &Path, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "models file unavailable");
                return Self::default();
            }
        };

        match Self::from_yaml_str(&content, env) {
            Ok(catalog) => catalog,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "models file is not valid YAML");
                Self::default()
            }
        }
    }

    pub fn from_yaml_str<F>(yaml: &str, env: F) -> Result<Self, serde_yaml::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw: serde_yaml::Value = serde_yaml::from_str(yaml)?;

        let Some(models) = raw.get("models").and_then(|m| m.as_mapping()) else {
            return Ok(Self::default());
        };
        let settings = raw.get("settings").and_then(|s| s.as_mapping());

        let mut entries = Vec::with_capacity(models.len());
        for (key, value) in models {
            let Some(id) = key.as_str() else {
                continue;
            };
            let entry: ModelEntry = match serde_yaml::from_value(value.clone()) {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(model = id, error = %e, "dropping incomplete model entry");
                    continue;
                }
            };

            let model_settings = settings
                .and_then(|s| s.get(id))
                .and_then(|v| match serde_yaml::from_value::<ModelSettings>(v.clone()) {
                    Ok(parsed) => Some(parsed),
                    Err(e) => {
                        warn!(model = id, error = %e, "ignoring malformed model settings");
                        None
                    }
                })
                .unwrap_or_default();

            let api_key = resolve_api_key(&entry, &env);
            entries.push(CatalogEntry {
                id: id.to_string(),
                provider: entry.provider,
                endpoint: entry.endpoint,
                model: entry.model,
                api_key,
                pricing: entry.pricing,
                settings: model_settings,
            });
        }

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn get(&self, id: &str) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build the request for one model, or the configuration error that
    /// prevents the call.
    pub fn resolve(
        &self,
        model_id: &str,
        artifact: Arc<str>,
        prompt: Arc<str>,
        retry: &RetryPolicy,
    ) -> Result<ReviewRequest, ProviderError> {
        let entry = self
            .get(model_id)
            .ok_or_else(|| ProviderError::config(format!("Unknown model: {model_id}")))?;
        let target = entry.target()?;

        Ok(
            ReviewRequest::new(&entry.id, &entry.model, target, artifact, prompt)
                .sampling(entry.settings.sampling())
                .extra_params(entry.settings.extra.clone())
                .retry(retry.clone())
                .pricing(entry.pricing),
        )
    }
}

fn resolve_api_key<F>(entry: &ModelEntry, env: &F) -> Option<ApiKey>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(key) = &entry.api_key {
        return (!key.is_empty()).then(|| ApiKey::new(key.clone()));
    }
    entry
        .api_key_env
        .as_deref()
        .and_then(env)
        .filter(|key| !key.is_empty())
        .map(ApiKey::new)
}

/// `$HOME/.claude/models.yaml`, when `HOME` is set.
pub fn default_models_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|home| PathBuf::from(home).join(".claude").join("models.yaml"))
}
