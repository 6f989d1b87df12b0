//! `toolstore` command-line interface.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use mcp_toolstore::config::{AppConfig, SearchSettings};
use mcp_toolstore::toolstore::{SqliteToolStore, ToolDefinition};

#[derive(Parser)]
#[command(name = "toolstore")]
#[command(author, version, about = "Hybrid search over MCP tool definitions", long_about = None)]
struct Cli {
    /// Path to configuration file (defaults to the platform config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index tools from a JSON file and search them
    Search {
        /// JSON array of `{name, description, inputSchema?}` objects
        #[arg(long)]
        tools: PathBuf,

        /// Restrict results to these tool names (repeatable; default: all)
        #[arg(long = "allow", value_name = "NAME")]
        allow: Vec<String>,

        /// Natural-language query
        query: String,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Validate the configuration and print effective settings
    Validate,
    /// Print the configuration JSON schema
    Schema,
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Search {
            tools,
            allow,
            query,
        } => {
            let app = AppConfig::load(cli.config.as_deref())?;
            run_search(&app, &tools, allow, &query).await
        }
        Commands::Config {
            command: ConfigCommands::Validate,
        } => {
            let app = AppConfig::load(cli.config.as_deref())?;
            let validated = app.optimizer.validate()?;
            let settings = SearchSettings::from(&validated);
            let db_path = app.store.resolved_db_path()?;
            let summary = serde_json::json!({
                "embeddingService": validated.embedding_service,
                "embeddingTimeoutSeconds": validated.embedding_timeout.map(|d| d.as_secs()),
                "maxToolsToReturn": settings.max_tools_to_return,
                "hybridSearchSemanticRatio": settings.hybrid_semantic_ratio,
                "semanticDistanceThreshold": settings.semantic_distance_threshold,
                "dbPath": db_path,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Commands::Config {
            command: ConfigCommands::Schema,
        } => {
            let schema = schemars::schema_for!(AppConfig);
            println!("{}", serde_json::to_string_pretty(&schema)?);
            Ok(())
        }
    }
}

async fn run_search(
    app: &AppConfig,
    tools_path: &std::path::Path,
    allow: Vec<String>,
    query: &str,
) -> Result<()> {
    let validated = app.optimizer.validate()?;
    let db_path = app.store.resolved_db_path()?;

    let raw = tokio::fs::read_to_string(tools_path)
        .await
        .with_context(|| format!("reading tools file: {}", tools_path.display()))?;
    let tools: Vec<ToolDefinition> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing tools file: {}", tools_path.display()))?;

    let store = SqliteToolStore::from_config(&validated, db_path.as_deref())
        .context("opening tool store")?;
    tracing::info!(
        tools = tools.len(),
        semantic = store.semantic_enabled(),
        "indexing tools"
    );
    store
        .upsert_tools(&tools)
        .await
        .context("indexing tools")?;

    let allowed = if allow.is_empty() {
        tools.iter().map(|t| t.name.clone()).collect()
    } else {
        allow
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let result = store
        .search_with_cancellation(query, &allowed, &cancel)
        .await
        .context("search failed");
    store.shutdown().await.context("closing tool store")?;

    let matches = result?;
    println!("{}", serde_json::to_string_pretty(&matches)?);
    Ok(())
}
