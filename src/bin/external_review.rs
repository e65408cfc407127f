#![forbid(unsafe_code)]

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use external_review::config::{default_models_path, ExecutionDefaults, ModelCatalog};
use external_review::gateway::{ProviderRegistry, StderrUsageSink, TracingUsageSink, UsageSink};
use external_review::{Orchestrator, PathSandbox, ReviewService};

#[derive(Parser)]
#[command(
    name = "external-review",
    version,
    about = "Send an artifact to several LLM reviewers in parallel"
)]
struct Cli {
    /// Models file (defaults to ~/.claude/models.yaml)
    #[arg(long, global = true)]
    models_config: Option<PathBuf>,

    /// Execution config with `execution.timeout_seconds` / `retry_attempts`
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug-level logs on stderr (RUST_LOG takes precedence)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured models and whether a key is available
    ListModels {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Review an artifact with several models at once
    Review {
        /// Comma-separated model ids from the models file
        #[arg(long, value_delimiter = ',', required = true)]
        models: Vec<String>,

        /// Absolute path to the artifact
        #[arg(long)]
        artifact: String,

        /// Inline review prompt
        #[arg(long, group = "prompt_input", required_unless_present = "prompt_file")]
        prompt: Option<String>,

        /// Read the review prompt from a file
        #[arg(long, group = "prompt_input")]
        prompt_file: Option<PathBuf>,

        /// Per-attempt timeout override in seconds
        #[arg(long)]
        timeout: Option<f64>,

        /// Write the JSON response here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,

        /// Emit one JSON usage line per provider call on stderr
        #[arg(long)]
        usage_log: bool,
    },
    /// Probe each provider's model-listing endpoint
    Health {
        /// Comma-separated model ids (default: all configured)
        #[arg(long, value_delimiter = ',')]
        models: Option<Vec<String>>,

        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let models_path = cli
        .models_config
        .clone()
        .or_else(default_models_path)
        .ok_or("HOME is not set; pass --models-config")?;
    let catalog = Arc::new(ModelCatalog::load(&models_path));
    let defaults = match &cli.config {
        Some(path) => ExecutionDefaults::load(path)?,
        None => ExecutionDefaults::default(),
    };

    match cli.command {
        Commands::ListModels { out } => {
            let service = build_service(catalog, defaults, None)?;
            emit(out.as_deref(), &service.list_models())?;
        }
        Commands::Review {
            models,
            artifact,
            prompt,
            prompt_file,
            timeout,
            out,
            usage_log,
        } => {
            let prompt = match (prompt, prompt_file) {
                (Some(text), _) => text,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .map_err(|e| format!("failed to read prompt file {}: {e}", path.display()))?,
                (None, None) => return Err("review requires --prompt or --prompt-file".into()),
            };
            let usage: Arc<dyn UsageSink> = if usage_log {
                Arc::new(StderrUsageSink)
            } else {
                Arc::new(TracingUsageSink)
            };

            let service = build_service(catalog, defaults, Some(usage))?;
            let response = service.review(&models, &artifact, &prompt, timeout).await;
            emit(out.as_deref(), &response)?;
            if let Some(error) = response.error() {
                return Err(error.into());
            }
        }
        Commands::Health { models, out } => {
            let service = build_service(catalog, defaults, None)?;
            let report = service.health(models.as_deref()).await;
            emit(out.as_deref(), &report)?;
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn build_service(
    catalog: Arc<ModelCatalog>,
    defaults: ExecutionDefaults,
    usage: Option<Arc<dyn UsageSink>>,
) -> Result<ReviewService, Box<dyn std::error::Error>> {
    let registry = Arc::new(ProviderRegistry::new()?);
    let mut orchestrator = Orchestrator::new(catalog, registry).with_defaults(defaults);
    if let Some(usage) = usage {
        orchestrator = orchestrator.with_usage_sink(usage);
    }
    Ok(ReviewService::new(PathSandbox::project_and_home()?, orchestrator))
}

fn emit<T: serde::Serialize>(out: Option<&Path>, value: &T) -> Result<(), io::Error> {
    match out {
        Some(path) => {
            write_json(path, value)?;
            eprintln!("[external-review] wrote {}", path.display());
            Ok(())
        }
        None => {
            let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
            println!("{json}");
            Ok(())
        }
    }
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), io::Error> {
    let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
    std::fs::write(path, json)
}
