//! Analyst CLI
//!
//! Operational front end for the analysis pipeline.
//!
//! # Commands
//!
//! - `analyze`: run one narrative through the model and print the `{"data": ...}` envelope
//! - `audit`: list recent audit records, or show one in full
//! - `health`: report provider and audit store readiness
//!
//! Logs go to stderr (`RUST_LOG`, default `info`); results go to stdout.

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use analyst_core::{AnalysisRequest, OutputFormat};
use analyst_runtime::{
    AnalysisPipeline, AuditStore, PipelineError, RuntimeConfig, SqliteAuditStore,
};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "analyst")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "LLM-assisted analysis of security narratives with an audit trail")]
#[command(after_help = r#"
EXIT CODES
  0  Success
  1  Model, parsing or storage failure
  2  Invalid input or usage

ENVIRONMENT
  OPENAI_API_KEY    API key for the openai provider
  OPENAI_MODEL      Overrides the configured model
  ANALYST_AUDIT_DB  Overrides the audit database path
  RUST_LOG          Log filter (default: info)
"#)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Audit database path (overrides config and environment)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyze a security narrative
    ///
    /// The narrative is taken from TEXT, --file, or stdin, in that order.
    Analyze {
        /// Narrative text
        text: Option<String>,

        /// Read the narrative from a file
        #[arg(short, long, conflicts_with = "text")]
        file: Option<PathBuf>,

        /// Result shape: risk_assessment, summary or policy_alignment
        #[arg(short = 'F', long, default_value = "risk_assessment")]
        format: OutputFormat,

        /// Model override (must be in allowed_models when that list is set)
        #[arg(short, long)]
        model: Option<String>,

        /// Time window the narrative covers
        #[arg(long)]
        time_window: Option<String>,

        /// Kind of input in the narrative (repeatable)
        #[arg(long = "input")]
        inputs: Vec<String>,
    },

    /// Show the audit trail, newest first
    Audit {
        /// Number of records to list
        #[arg(short, long, default_value_t = 20)]
        limit: usize,

        /// Show one record in full, including raw model output
        #[arg(long)]
        id: Option<i64>,
    },

    /// Report provider and audit store readiness
    Health,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(exit_code_for(&e))
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// 2 for caller mistakes, 1 for everything else.
fn exit_code_for(error: &anyhow::Error) -> u8 {
    match error.downcast_ref::<PipelineError>() {
        Some(e) if e.is_caller_error() => 2,
        Some(_) => 1,
        None if error.downcast_ref::<InputError>().is_some() => 2,
        None => 1,
    }
}

/// Problems with what the user supplied on the command line.
#[derive(Error, Debug)]
#[error("{0}")]
struct InputError(String);

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Analyze {
            text,
            file,
            format,
            model,
            time_window,
            inputs,
        } => {
            let narrative = read_narrative(text, file)?;
            let mut request = AnalysisRequest::new(narrative, format).with_inputs(inputs);
            if let Some(model) = model {
                request = request.with_model(model);
            }
            if let Some(window) = time_window {
                request = request.with_time_window(window);
            }

            let pipeline = AnalysisPipeline::from_config(config)?;
            let outcome = pipeline.analyze(&request).await?;
            tracing::debug!(audit_id = ?outcome.audit_id, model = %outcome.model, "Analysis stored");
            print_json(&outcome.into_envelope())
        }

        Commands::Audit { limit, id } => {
            let store = SqliteAuditStore::open(&config.audit.path).with_context(|| {
                format!("failed to open audit database {}", config.audit.path.display())
            })?;

            match id {
                Some(id) => match store.get(id).await? {
                    Some(record) => print_json(&record),
                    None => bail!(InputError(format!("no audit record with id {}", id))),
                },
                None => print_json(&store.recent(limit).await?),
            }
        }

        Commands::Health => {
            let pipeline = AnalysisPipeline::from_config(config)?;
            let report = pipeline.health().await;
            print_json(&report)?;
            if report.status != "ok" {
                bail!("pipeline is {}", report.status);
            }
            Ok(())
        }
    }
}

fn load_config(cli: &Cli) -> Result<RuntimeConfig> {
    let config = match &cli.config {
        Some(path) => RuntimeConfig::from_yaml_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => RuntimeConfig::default(),
    };

    let mut config = config.apply_env();
    if let Some(db) = &cli.db {
        config.audit.path = db.clone();
    }
    config.validate()?;
    Ok(config)
}

fn read_narrative(text: Option<String>, file: Option<PathBuf>) -> Result<String> {
    if let Some(text) = text {
        return Ok(text);
    }
    if let Some(path) = file {
        return std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()));
    }

    let mut buffer = String::new();
    std::io::stdin()
        .read_to_string(&mut buffer)
        .context("failed to read narrative from stdin")?;
    Ok(buffer)
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
