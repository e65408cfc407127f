#![forbid(unsafe_code)]

//! # external-review
//!
//! Fan one artifact out to several external LLM reviewers at once.
//!
//! A caller names a set of configured models, an artifact on disk and a
//! review prompt. The artifact path is checked against a sandbox of allowed
//! roots, then every model is called concurrently through a provider adapter
//! (OpenAI-compatible chat completions or Google `generateContent`). Each call
//! runs under its own timeout and a bounded retry loop, and the batch comes
//! back as per-model results with aggregated tokens, cost, and latency.
//!
//! One model failing never fails the batch; only a rejected artifact does.

pub mod config;
pub mod gateway;
pub mod orchestrator;
pub mod sandbox;
pub mod service;

pub use config::{ConfigError, ExecutionDefaults, ModelCatalog};
pub use gateway::{
    ProviderError, ProviderKind, ProviderRegistry, ReviewProvider, ReviewRequest, ReviewResult,
    UsageSink,
};
pub use orchestrator::{BatchReport, Orchestrator};
pub use sandbox::{PathSandbox, SandboxError};
pub use service::{ReviewResponse, ReviewService};
