//! WolfChat - Replicated Chat Server Node
//!
//! Runs one chat node of a replica group.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wolfchat::config::WolfChatConfig;
use wolfchat::node::ChatNode;
use wolfchat::error::Result;

/// WolfChat - Replicated Chat Server Node
#[derive(Parser)]
#[command(name = "wolfchat")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "wolfchat.toml")]
    config: PathBuf,

    /// Log level (overrides the configuration file)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the node
    Start,

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "wolfchat.toml")]
        output: PathBuf,

        /// Node name (random server_xxxxxxxxx when omitted)
        #[arg(long)]
        name: Option<String>,
    },

    /// Validate configuration file
    Validate,

    /// Show node information
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start => run_start(cli.config, cli.log_level).await,
        Commands::Init { output, name } => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"), "pretty");
            run_init(output, name)
        }
        Commands::Validate => run_validate(cli.config),
        Commands::Info => run_info(cli.config),
    }
}

/// Initialize logging
fn init_logging(level: &str, format: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Start the node
async fn run_start(config_path: PathBuf, log_level: Option<String>) -> Result<()> {
    let config = if config_path.exists() {
        WolfChatConfig::from_file(&config_path)
    } else {
        Ok(WolfChatConfig::default())
    };
    let config = match config {
        Ok(c) => c,
        Err(e) => {
            init_logging(log_level.as_deref().unwrap_or("info"), "pretty");
            tracing::error!("Failed to load configuration from {:?}: {}", config_path, e);
            return Err(e);
        }
    };

    init_logging(
        log_level.as_deref().unwrap_or(&config.logging.level),
        &config.logging.format,
    );
    if !config_path.exists() {
        tracing::warn!("No configuration at {:?}, using defaults", config_path);
    }
    tracing::info!("Starting WolfChat node '{}'", config.node.name);

    let node = match ChatNode::build(&config).await {
        Ok(n) => n,
        Err(e) => {
            tracing::error!("Failed to initialize node: {}", e);
            return Err(e);
        }
    };

    let result = node
        .run(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::info!("Received Ctrl-C"),
                Err(e) => tracing::error!("Failed to listen for Ctrl-C: {}", e),
            }
        })
        .await;

    if let Err(e) = &result {
        tracing::error!("Node failed: {}", e);
    }
    result
}

/// Write a default configuration file
fn run_init(output: PathBuf, name: Option<String>) -> Result<()> {
    let mut config = WolfChatConfig::default();
    if let Some(name) = name {
        config.node.name = name;
    }
    config.validate()?;

    let content = format!("# WolfChat Configuration\n# Generated configuration file\n\n{}", config.to_toml()?);
    std::fs::write(&output, content)?;

    tracing::info!("Configuration written to {:?}", output);
    println!("Created configuration file: {}", output.display());
    println!("Node name: {}", config.node.name);
    Ok(())
}

/// Validate configuration file
fn run_validate(config_path: PathBuf) -> Result<()> {
    match WolfChatConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Node: {}", config.node.name);
            println!("  Bind Address: {}", config.node.bind_address);
            println!("  Replication: {}", config.replication_bind_address());
            println!("  Rank Authority: {}", config.authority.address);
            println!("  Replication Mode: {}", config.replication.mode);
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}

/// Show node information
fn run_info(config_path: PathBuf) -> Result<()> {
    let config = WolfChatConfig::from_file(&config_path)?;

    println!("WolfChat Node Information");
    println!("=========================");
    println!();
    println!("Node Name:        {}", config.node.name);
    println!("Bind Address:     {}", config.node.bind_address);
    println!("Replication:      {}", config.replication_bind_address());
    println!("Publish/Sub:      {}", config.pubsub.bind_address);
    println!("Data Directory:   {}", config.data_dir().display());
    println!();
    println!("Rank Authority:");
    println!("  Address:        {}", config.authority.address);
    println!("  Heartbeat:      {} ms", config.authority.heartbeat_interval_ms);
    println!();
    println!("Replication:");
    println!("  Mode:           {}", config.replication.mode);
    println!("  Min Acks:       {}", config.replication.min_acks);
    println!("  Timeout:        {} ms", config.replication.timeout_ms);
    println!();
    println!("Clock Sync:");
    println!("  Enabled:        {}", config.clock_sync.enabled);
    println!("  Interval:       {} ms", config.clock_sync.interval_ms);
    println!("  Every Requests: {}", config.clock_sync.every_requests);
    println!();
    println!("Persistence:");
    println!("  Enabled:        {}", config.persistence.enabled);
    println!("  Autosave:       {} ms", config.persistence.autosave_interval_ms);

    Ok(())
}
