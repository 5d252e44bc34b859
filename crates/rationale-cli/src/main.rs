//! Rationale CLI - extract decisions and context from collaboration activity

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use rationale_core::config::Config;
use rationale_core::connectors::{ConnectorRegistry, JsonlConnector};
use rationale_core::domain::events::NormalizedEvent;
use rationale_core::domain::ingestion::{
    DataSource, Integration, IntegrationHealthStatus, SyncCheckpoint, SyncOutcome,
};
use rationale_core::domain::knowledge::ProcessingResult;
use rationale_core::orchestration::IngestionOrchestrator;
use rationale_core::processing::ContextProcessor;
use rationale_core::storage::{IngestionStore, MemoryKnowledgeSink, MemoryStore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "rationale")]
#[command(author, version, about = "Turn collaboration activity into a knowledge graph", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract knowledge from a file of normalized events (JSON Lines)
    Process {
        /// Path to the events file
        file: PathBuf,
        /// Events per batch (defaults to the configured value)
        #[arg(short, long)]
        batch_size: Option<usize>,
        /// Pretty-print the JSON result
        #[arg(long)]
        pretty: bool,
    },

    /// Run one ingestion cycle over a raw event export (JSON Lines)
    Ingest {
        /// Path to the raw events file
        file: PathBuf,
        /// Platform the export comes from
        #[arg(short, long)]
        platform: String,
        /// Project the integration belongs to
        #[arg(long, default_value = "default")]
        project: String,
        /// Data source identifier; events with another `source` are skipped
        #[arg(long)]
        source: Option<String>,
        /// Checkpoint file to resume from and update
        #[arg(long)]
        checkpoint: Option<PathBuf>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration values
    List,
    /// Reset configuration to defaults
    Reset,
    /// Show config file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rationale=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Process {
            file,
            batch_size,
            pretty,
        } => cmd_process(&file, batch_size, pretty).await,

        Commands::Ingest {
            file,
            platform,
            project,
            source,
            checkpoint,
        } => {
            let args = IngestArgs {
                file,
                platform,
                project,
                source,
                checkpoint,
            };
            cmd_ingest(args, cli.format, cli.quiet).await
        }

        Commands::Config { action } => cmd_config(action, cli.quiet),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

fn read_normalized_events(path: &Path) -> anyhow::Result<Vec<NormalizedEvent>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read events file: {}", path.display()))?;

    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("Invalid event on line {} of {}", n + 1, path.display()))
        })
        .collect()
}

async fn cmd_process(file: &Path, batch_size: Option<usize>, pretty: bool) -> anyhow::Result<()> {
    let config = Config::load()?;
    let mut processor_config = config.processor_config();
    if let Some(size) = batch_size {
        if size == 0 {
            return Err(anyhow!("--batch-size must be positive"));
        }
        processor_config.batch_size = size;
    }

    let events = read_normalized_events(file)?;
    debug!(events = events.len(), file = %file.display(), "Loaded events");

    let processor = ContextProcessor::new(processor_config);
    let result = processor
        .process_events(&events, &CancellationToken::new())
        .await?;

    let output = if pretty {
        serde_json::to_string_pretty(&result)?
    } else {
        serde_json::to_string(&result)?
    };
    println!("{}", output);
    Ok(())
}

struct IngestArgs {
    file: PathBuf,
    platform: String,
    project: String,
    source: Option<String>,
    checkpoint: Option<PathBuf>,
}

const CLI_INTEGRATION_ID: &str = "cli";

fn load_checkpoint(path: Option<&Path>) -> anyhow::Result<SyncCheckpoint> {
    match path {
        Some(path) if path.exists() => {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read checkpoint: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse checkpoint: {}", path.display()))
        }
        // A fresh export is read in full
        _ => Ok(SyncCheckpoint {
            last_sync_time: Some(DateTime::<Utc>::UNIX_EPOCH),
            ..Default::default()
        }),
    }
}

async fn cmd_ingest(args: IngestArgs, format: OutputFormat, quiet: bool) -> anyhow::Result<()> {
    let config = Config::load()?;

    let store = Arc::new(MemoryStore::new());
    let checkpoint = load_checkpoint(args.checkpoint.as_deref())?;
    store
        .insert_integration(
            Integration::new(CLI_INTEGRATION_ID, &args.project, &args.platform)
                .with_checkpoint(checkpoint),
        )
        .await;
    let external_id = args.source.clone().unwrap_or_else(|| args.platform.clone());
    let source = DataSource::new("cli-source", CLI_INTEGRATION_ID, "export", external_id);
    store.insert_data_source(source).await;

    let mut connectors = ConnectorRegistry::new();
    connectors.register(Arc::new(JsonlConnector::new(&args.platform, args.file.clone())));

    let sink = Arc::new(MemoryKnowledgeSink::new());
    let orchestrator = IngestionOrchestrator::new(
        config.orchestrator_config(),
        ContextProcessor::new(config.processor_config()),
        store.clone(),
        Arc::new(connectors),
        sink.clone(),
    );

    info!(file = %args.file.display(), platform = %args.platform, "Starting ingestion");
    orchestrator
        .start_integration_ingestion(CLI_INTEGRATION_ID)
        .await?;
    orchestrator.wait_for_idle(CLI_INTEGRATION_ID).await;

    let integration = store
        .get_integration(CLI_INTEGRATION_ID)
        .await?
        .ok_or_else(|| anyhow!("integration disappeared from the store"))?;
    let health = orchestrator
        .get_integration_health(CLI_INTEGRATION_ID)
        .await?;

    // Cancels the retry a failed run schedules
    orchestrator.stop_orchestrator().await?;

    if integration.last_sync_status == Some(SyncOutcome::Failed) {
        return Err(anyhow!(
            "Ingestion failed: {}",
            integration.error_message.unwrap_or_default()
        ));
    }

    if let Some(path) = &args.checkpoint {
        let contents = serde_json::to_string_pretty(&integration.sync_checkpoint)?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write checkpoint: {}", path.display()))?;
    }

    let mut extracted = ProcessingResult::default();
    for (_, result) in sink.results().await {
        extracted.merge(result);
    }

    print_ingest_report(&integration.sync_checkpoint, &health, &extracted, format, quiet)
}

fn print_ingest_report(
    checkpoint: &SyncCheckpoint,
    health: &IntegrationHealthStatus,
    extracted: &ProcessingResult,
    format: OutputFormat,
    quiet: bool,
) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        let report = serde_json::json!({
            "checkpoint": checkpoint,
            "health": health,
            "extracted": {
                "processed_events": extracted.processed_events,
                "decisions": extracted.decisions.len(),
                "discussions": extracted.discussions.len(),
                "features": extracted.features.len(),
                "file_contexts": extracted.file_contexts.len(),
                "relationships": extracted.relationships.len(),
                "errors": extracted.errors.len(),
            },
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if quiet {
        println!("{}", extracted.processed_events);
        return Ok(());
    }

    println!("Ingestion complete ({})", health.state);
    println!("  Events processed: {}", checkpoint.last_batch_size);
    println!("  Total processed:  {}", checkpoint.total_events_processed);
    println!("  Unextracted:      {}", checkpoint.unextracted_events);
    println!();
    println!("Extracted:");
    println!("  Decisions:     {}", extracted.decisions.len());
    println!("  Discussions:   {}", extracted.discussions.len());
    println!("  Features:      {}", extracted.features.len());
    println!("  Files:         {}", extracted.file_contexts.len());
    println!("  Relationships: {}", extracted.relationships.len());
    if !extracted.errors.is_empty() {
        println!("  Errors:        {}", extracted.errors.len());
    }
    Ok(())
}

fn cmd_config(action: ConfigAction, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            for (key, value) in config.list()? {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !quiet {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}
