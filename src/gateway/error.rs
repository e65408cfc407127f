//! Error types for the provider gateway.

use std::time::Duration;
use thiserror::Error;

/// HTTP statuses that indicate a transient provider condition.
pub const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Longest slice of an error body carried into a failure message.
const MAX_ERROR_BODY_CHARS: usize = 200;

/// Additional context from provider errors for debugging.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// HTTP status code from the provider.
    pub http_status: Option<u16>,
    /// Request ID from provider (x-request-id header).
    pub request_id: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }
}

/// Raised by the retry executor when a single attempt outlives its timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("attempt timed out after {0:?}")]
pub struct AttemptTimeout(pub Duration);

/// Errors that can occur when calling providers.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Provider answered with a non-200 status.
    #[error("{}", status_message(.status, .body))]
    Status {
        provider: &'static str,
        status: u16,
        body: String,
        context: ErrorContext,
    },

    /// Attempt exceeded its per-attempt timeout - retryable.
    #[error("Request timed out")]
    Timeout(Duration),

    /// HTTP/network error.
    #[error("{0}")]
    Http(#[from] reqwest::Error),

    /// A 200 response we could not make sense of - permanent error.
    #[error("{provider} returned an invalid response: {message}")]
    InvalidResponse {
        provider: &'static str,
        message: String,
    },

    /// Configuration error (unknown model, missing API key, etc.).
    #[error("{0}")]
    Config(String),
}

fn status_message(status: &u16, body: &str) -> String {
    if body.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {body}")
    }
}

impl From<AttemptTimeout> for ProviderError {
    fn from(timeout: AttemptTimeout) -> Self {
        Self::Timeout(timeout.0)
    }
}

impl ProviderError {
    /// Create a status error.
    ///
    /// Retryable statuses keep only the status line; terminal ones keep the
    /// first 200 characters of the body so the caller can see why.
    pub fn status(
        provider: &'static str,
        status: u16,
        body: &str,
        context: ErrorContext,
    ) -> Self {
        let body = if RETRYABLE_STATUSES.contains(&status) {
            String::new()
        } else {
            body.chars().take(MAX_ERROR_BODY_CHARS).collect()
        };
        Self::Status {
            provider,
            status,
            body,
            context,
        }
    }

    /// Create an invalid response error.
    pub fn invalid_response(provider: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            provider,
            message: message.into(),
        }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Status { status, .. } => RETRYABLE_STATUSES.contains(status),
            Self::Timeout(_) => true,
            // Transport failures (connect, reset, timeout, truncated body) are
            // transient; a request that could not even be built is not.
            Self::Http(e) => !e.is_builder(),
            Self::InvalidResponse { .. } => false,
            Self::Config(_) => false,
        }
    }

    /// Get a short error code for logging.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Status { status: 429, .. } => "rate_limited",
            Self::Status { .. } => "http_status",
            Self::Timeout(_) => "timeout",
            Self::Http(_) => "http_error",
            Self::InvalidResponse { .. } => "invalid_response",
            Self::Config(_) => "config_error",
        }
    }

    /// Get the error context if available.
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Self::Status { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Get the request ID if available.
    pub fn request_id(&self) -> Option<&str> {
        self.context().and_then(|c| c.request_id.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses_drop_the_body() {
        let err =
            ProviderError::status("openai_compat", 503, "upstream overloaded", ErrorContext::new());
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "HTTP 503");
    }

    #[test]
    fn terminal_statuses_keep_a_body_prefix() {
        let body = "x".repeat(500);
        let err = ProviderError::status("google", 401, &body, ErrorContext::new());
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), format!("HTTP 401: {}", "x".repeat(200)));
    }

    #[test]
    fn attempt_timeout_is_retryable() {
        let err = ProviderError::from(AttemptTimeout(Duration::from_secs(3)));
        assert!(err.is_retryable());
        assert_eq!(err.code(), "timeout");
        assert_eq!(err.to_string(), "Request timed out");
    }

    #[test]
    fn invalid_response_is_terminal() {
        let err = ProviderError::invalid_response("openai_compat", "No choices in response");
        assert!(!err.is_retryable());
    }
}
