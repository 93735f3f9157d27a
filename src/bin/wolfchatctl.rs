//! WolfChatCtl - Command line client for WolfChat nodes
//!
//! Usage:
//!   wolfchatctl login alice            - Log a user in
//!   wolfchatctl publish alice general hi - Publish to a channel
//!   wolfchatctl listen general alice   - Stream broadcasts for topics
//!   wolfchatctl status                 - Show node status (HTTP API)

use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use wolfchat::api::StatusResponse;
use wolfchat::clock::now_millis;
use wolfchat::network::{RpcClient, Subscription};
use wolfchat::replication::{Envelope, Payload};

/// WolfChat Control Tool
#[derive(Parser)]
#[command(name = "wolfchatctl")]
#[command(about = "Talk to and monitor WolfChat nodes", long_about = None)]
struct Cli {
    /// Request endpoint of the node
    #[arg(short, long, default_value = "127.0.0.1:5555")]
    server: String,

    /// HTTP API endpoint of the node
    #[arg(short, long, default_value = "http://127.0.0.1:8080")]
    endpoint: String,

    /// Request timeout in milliseconds
    #[arg(short, long, default_value_t = 5000)]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log a user in
    Login { user: String },
    /// List known users
    Users,
    /// Create a channel
    Channel { channel: String },
    /// List channels
    Channels,
    /// Publish a message to a channel
    Publish {
        user: String,
        channel: String,
        message: String,
    },
    /// Send a private message
    Message {
        src: String,
        dst: String,
        message: String,
    },
    /// Read the node's physical clock
    Clock,
    /// Show node status
    Status,
    /// Print broadcasts for the given topics (channels or user names)
    Listen {
        /// Publish-subscribe endpoint of the node
        #[arg(short, long, default_value = "127.0.0.1:5557")]
        address: String,
        topics: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let timeout = Duration::from_millis(cli.timeout_ms);

    let (service, mut data) = match cli.command {
        Commands::Status => return show_status(&cli.endpoint).await,
        Commands::Listen { address, topics } => return listen(&address, topics, timeout).await,
        Commands::Login { user } => (
            "login",
            Payload {
                user: Some(user),
                ..Default::default()
            },
        ),
        Commands::Users => ("users", Payload::default()),
        Commands::Channel { channel } => (
            "channel",
            Payload {
                channel: Some(channel),
                ..Default::default()
            },
        ),
        Commands::Channels => ("channels", Payload::default()),
        Commands::Publish { user, channel, message } => (
            "publish",
            Payload {
                user: Some(user),
                channel: Some(channel),
                message: Some(message),
                ..Default::default()
            },
        ),
        Commands::Message { src, dst, message } => (
            "message",
            Payload {
                src: Some(src),
                dst: Some(dst),
                message: Some(message),
                ..Default::default()
            },
        ),
        Commands::Clock => ("clock", Payload::default()),
    };
    data.timestamp = now_millis();

    let client = RpcClient::new(timeout);
    let reply = client
        .send(&cli.server, Envelope::new(service, data), timeout)
        .await
        .with_context(|| format!("{} request to {} failed", service, cli.server))?;

    print_reply(&reply)
}

fn print_reply(reply: &Envelope) -> anyhow::Result<()> {
    let data = &reply.data;
    if reply.is_error() {
        bail!(
            "{} rejected: {}",
            reply.service,
            data.description.as_deref().unwrap_or("no description")
        );
    }

    if let Some(users) = &data.users {
        println!("Users ({}):", users.len());
        for user in users {
            println!("  {}", user);
        }
    } else if let Some(channels) = &data.channels {
        println!("Channels ({}):", channels.len());
        for channel in channels {
            println!("  #{}", channel);
        }
    } else if let Some(time) = data.time {
        let formatted = chrono::DateTime::from_timestamp_millis(time)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| time.to_string());
        println!("Server time: {} (logical clock {})", formatted, data.clock);
    } else {
        println!("✓ {} OK (logical clock {})", reply.service, data.clock);
    }

    Ok(())
}

async fn show_status(endpoint: &str) -> anyhow::Result<()> {
    let url = format!("{}/status", endpoint);
    let response = reqwest::get(&url)
        .await
        .with_context(|| format!("cannot reach {}", url))?;

    if !response.status().is_success() {
        bail!("API error: {}", response.status());
    }
    let status: StatusResponse = response.json().await?;

    println!();
    println!("WolfChat Node Status (wolfchatctl v{})", env!("CARGO_PKG_VERSION"));
    println!("========================================");
    println!();
    println!("Node:           {}", status.name);
    println!(
        "Rank:           {}",
        status.rank.map(|r| r.to_string()).unwrap_or_else(|| "unregistered".into())
    );
    println!("Role:           {}", if status.is_primary { "Primary" } else { "Backup" });
    println!("Coordinator:    {}", status.coordinator.as_deref().unwrap_or("NONE"));
    println!("Known Nodes:    {}", status.known_nodes);
    if status.is_primary {
        println!("Backups:        {}", status.backups.join(", "));
    }
    println!("Replication:    {:?}", status.replication_mode);
    println!();
    println!("Logical Clock:  {}", status.logical_clock);
    println!("Clock Offset:   {} ms", status.physical_offset_ms);
    println!("Requests:       {}", status.requests_processed);
    println!("State:          {}", status.counts);
    println!();

    Ok(())
}

async fn listen(address: &str, topics: Vec<String>, timeout: Duration) -> anyhow::Result<()> {
    if topics.is_empty() {
        bail!("at least one topic is required");
    }

    let mut subscription = Subscription::connect(address, topics.clone(), timeout)
        .await
        .with_context(|| format!("cannot subscribe at {}", address))?;
    println!("Listening on {} for: {}", address, topics.join(", "));

    loop {
        let published = subscription.next().await.context("subscription closed")?;
        let data = &published.envelope.data;
        match published.envelope.service.as_str() {
            "publication" => println!(
                "[#{}] {}: {}",
                published.topic,
                data.user.as_deref().unwrap_or("?"),
                data.message.as_deref().unwrap_or("")
            ),
            "private_message" => println!(
                "[{} -> {}] {}",
                data.src.as_deref().unwrap_or("?"),
                data.dst.as_deref().unwrap_or("?"),
                data.message.as_deref().unwrap_or("")
            ),
            other => println!("[{}] {}", published.topic, other),
        }
    }
}
