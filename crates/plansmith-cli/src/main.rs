//! plansmith CLI
//!
//! The `plansmith` command runs the multi-pass plan generation pipeline.
//!
//! ## Commands
//!
//! - `run`: generate, validate, critique and score a plan for a request
//! - `validate`: check a document against the schema contract
//! - `extract`: recover a JSON object from raw model text

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use plansmith_core::{extract, validate, Extraction, GenerationRequest, PipelineStatus, SchemaContract};
use plansmith_runtime::{
    Cancellable, CancellationToken, LlmProvider, PipelineConfig, ProviderRegistry,
    RegenerationController, ScriptedProvider,
};

#[derive(Parser)]
#[command(name = "plansmith")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Schema-enforced, self-reviewed engineering plans from an LLM", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline for one request
    Run {
        /// What to build
        #[arg(long, required_unless_present = "request")]
        goal: Option<String>,

        /// Technology stack
        #[arg(long, required_unless_present = "request")]
        stack: Option<String>,

        /// Experience level of the implementer
        #[arg(long, default_value = "")]
        experience: String,

        /// Free-form constraints
        #[arg(long, default_value = "")]
        constraints: String,

        /// Request file (JSON or YAML) instead of flags
        #[arg(long, conflicts_with_all = ["goal", "stack"])]
        request: Option<PathBuf>,

        /// Pipeline configuration file (YAML or JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Provider type
        #[arg(short, long, default_value = "groq")]
        provider: String,

        /// Provider configuration file (JSON)
        #[arg(long)]
        provider_config: Option<PathBuf>,

        /// Replay canned responses from a script file instead of calling a model
        #[arg(long, conflicts_with = "provider_config")]
        script: Option<PathBuf>,

        /// JSON Schema file to enforce instead of the built-in plan contract
        #[arg(long)]
        schema: Option<PathBuf>,
    },

    /// Check a JSON document against the schema contract
    Validate {
        /// Document to check
        document: PathBuf,

        /// JSON Schema file (default: built-in plan contract)
        #[arg(long)]
        schema: Option<PathBuf>,
    },

    /// Recover a JSON object from raw model output
    Extract {
        /// File holding the raw text
        raw: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            goal,
            stack,
            experience,
            constraints,
            request,
            config,
            provider,
            provider_config,
            script,
            schema,
        } => {
            let request = match request {
                Some(path) => load_request(&path)?,
                None => GenerationRequest::new(
                    goal.unwrap_or_default(),
                    stack.unwrap_or_default(),
                    experience,
                    constraints,
                )
                .context("Invalid request")?,
            };
            let provider = match script {
                Some(path) => load_script(&path)?,
                None => build_provider(&provider, provider_config.as_deref())?,
            };
            cmd_run(
                &request,
                provider,
                config.as_deref(),
                schema.as_deref(),
            )
            .await
        }
        Commands::Validate { document, schema } => cmd_validate(&document, schema.as_deref()),
        Commands::Extract { raw } => cmd_extract(&raw),
    }
}

fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .try_init()
            .ok();
    }
}

async fn cmd_run(
    request: &GenerationRequest,
    provider: Arc<dyn LlmProvider>,
    config: Option<&Path>,
    schema: Option<&Path>,
) -> Result<ExitCode> {
    let config = match config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    let mut builder = RegenerationController::builder()
        .provider(provider)
        .config(config);
    if let Some(path) = schema {
        builder = builder.contract(Arc::new(load_contract(path)?));
    }
    let controller = builder.build().context("Failed to build pipeline")?;

    let token = CancellationToken::new();
    {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, cancelling at next pass boundary");
                token.cancel();
            }
        });
    }

    let result = controller.run_with_cancel(request, &token).await;
    print_json(&result.to_response_json())?;

    Ok(match result.status {
        PipelineStatus::Succeeded => ExitCode::SUCCESS,
        PipelineStatus::FatalError => ExitCode::from(1),
        PipelineStatus::ExhaustedRetries | PipelineStatus::Cancelled => ExitCode::from(2),
    })
}

fn cmd_validate(document: &Path, schema: Option<&Path>) -> Result<ExitCode> {
    let contract = match schema {
        Some(path) => load_contract(path)?,
        None => SchemaContract::engineering_plan()
            .context("Built-in schema failed to load")?
            .clone(),
    };

    let text = read(document)?;
    let value: Value = serde_json::from_str(&text)
        .with_context(|| format!("{} is not valid JSON", document.display()))?;

    let outcome = validate(Some(&value), &contract);
    print_json(&json!({
        "schema": contract.name(),
        "valid": outcome.valid,
        "violations": outcome.violations,
    }))?;

    Ok(if outcome.valid {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn cmd_extract(raw: &Path) -> Result<ExitCode> {
    let text = read(raw)?;
    let extraction = extract(&text);

    let report = match &extraction {
        Extraction::Failed(failure) => json!({"tier": null, "failure": failure, "document": null}),
        other => json!({"tier": other.tier(), "failure": null, "document": other.document()}),
    };
    print_json(&report)?;

    Ok(if extraction.is_failed() {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    })
}

fn build_provider(provider_type: &str, config: Option<&Path>) -> Result<Arc<dyn LlmProvider>> {
    let registry = ProviderRegistry::with_defaults();
    let config = match config {
        Some(path) => serde_json::from_str(&read(path)?)
            .with_context(|| format!("{} is not valid JSON", path.display()))?,
        None => registry.default_config(provider_type).unwrap_or_else(|| json!({})),
    };

    registry
        .create(provider_type, &config)
        .with_context(|| format!("Failed to create provider '{}'", provider_type))
}

fn load_script(path: &Path) -> Result<Arc<dyn LlmProvider>> {
    let script: Value = serde_json::from_str(&read(path)?)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    let provider = ScriptedProvider::from_json(&script)
        .with_context(|| format!("Invalid script {}", path.display()))?;
    Ok(Arc::new(provider))
}

fn load_request(path: &Path) -> Result<GenerationRequest> {
    let text = read(path)?;
    let request = if is_json(path) {
        GenerationRequest::from_json(&text)?
    } else {
        let request: GenerationRequest = serde_yaml::from_str(&text)
            .with_context(|| format!("{} is not a valid request", path.display()))?;
        request.validate()?;
        request
    };
    Ok(request)
}

fn load_contract(path: &Path) -> Result<SchemaContract> {
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("custom")
        .trim_end_matches(".schema");
    SchemaContract::from_json_str(name, &read(path)?)
        .with_context(|| format!("Invalid schema {}", path.display()))
}

fn read(path: &Path) -> Result<String> {
    if !path.exists() {
        bail!("File not found: {}", path.display());
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn is_json(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("json")
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
