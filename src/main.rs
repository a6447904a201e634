//! RelayWarden - LAN Relay Failover Manager
//!
//! Keeps exactly one relay server alive on a local network through
//! decentralized leader election and automatic failover.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relaywarden::api::HttpServer;
use relaywarden::config::{RelayWardenConfig, DEFAULT_CONFIG_TEMPLATE};
use relaywarden::discovery::{listen_for_announcement, SubnetProbe};
use relaywarden::error::Result;
use relaywarden::identity::{local_ipv4, NodeIdentity};
use relaywarden::orchestrator::FailoverOrchestrator;
use relaywarden::relay::LocalRelay;

/// RelayWarden - LAN Relay Failover Manager
#[derive(Parser)]
#[command(name = "relaywarden")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "relaywarden.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the RelayWarden node
    Start,

    /// Find the active relay without joining the election
    Discover,

    /// Query a running node's status
    Status {
        /// Control API address to query
        #[arg(short, long, default_value = "127.0.0.1:3080")]
        address: String,
    },

    /// Ask a running node to tear down and re-discover
    Rediscover {
        /// Control API address to signal
        #[arg(short, long, default_value = "127.0.0.1:3080")]
        address: String,
    },

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "relaywarden.toml")]
        output: PathBuf,
    },

    /// Validate configuration file
    Validate,

    /// Show node information
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(&cli.log_level);

    match cli.command {
        Commands::Start => run_start(cli.config).await,
        Commands::Discover => run_discover(cli.config).await,
        Commands::Status { address } => run_status(address).await,
        Commands::Rediscover { address } => run_rediscover(address).await,
        Commands::Init { output } => run_init(output),
        Commands::Validate => run_validate(cli.config),
        Commands::Info => run_info(cli.config),
    }
}

/// Initialize logging
fn init_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Load configuration; a missing file yields the zero-config defaults
fn load_config(path: &PathBuf) -> Result<RelayWardenConfig> {
    if path.exists() {
        RelayWardenConfig::from_file(path)
    } else {
        tracing::info!("no config at {}, using defaults", path.display());
        Ok(RelayWardenConfig::default())
    }
}

/// Local identity per the configuration, autodetecting the address when
/// none is pinned
fn local_identity(config: &RelayWardenConfig) -> NodeIdentity {
    let address = config.node.address.unwrap_or_else(local_ipv4);
    NodeIdentity::new(address, config.node.class)
}

/// Start the RelayWarden node
async fn run_start(config_path: PathBuf) -> Result<()> {
    tracing::info!("Starting RelayWarden node...");

    let config = match load_config(&config_path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load configuration from {:?}: {}", config_path, e);
            return Err(e);
        }
    };

    let identity = local_identity(&config);
    tracing::info!("Node identity: {}", identity);

    let relay = Arc::new(LocalRelay::new(config.relay.port, identity.class.into()));
    let api_config = config.api.clone();

    let orchestrator = Arc::new(FailoverOrchestrator::new(config, identity, relay)?);
    orchestrator.start().await?;

    // The control API runs for the lifetime of the process
    if api_config.enabled {
        let server = HttpServer::new(api_config, Arc::clone(&orchestrator));
        tokio::spawn(async move {
            if let Err(e) = server.start().await {
                tracing::error!("control API exited: {e}");
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");
    orchestrator.shutdown().await;

    Ok(())
}

/// Find the active relay as a pure consumer: passive listen window first,
/// then the subnet probe fallback
async fn run_discover(config_path: PathBuf) -> Result<()> {
    let config = load_config(&config_path)?;
    let own_address = config.node.address.unwrap_or_else(local_ipv4);

    tracing::info!("listening for a relay announcement...");
    let announcement =
        match listen_for_announcement(&config.discovery, own_address, config.discovery.listen_window())
            .await?
        {
            Some(announcement) => announcement,
            None => {
                tracing::info!("no announcement heard, probing the subnet");
                let probe = SubnetProbe::new(&config.probe)?;
                probe.scan(own_address, config.relay.port).await?
            }
        };

    println!("{}", serde_json::to_string_pretty(&announcement).unwrap());
    Ok(())
}

/// Query a running node's status
async fn run_status(address: String) -> Result<()> {
    let url = format!("http://{}/status", address);

    match reqwest::get(&url).await {
        Ok(response) => {
            let status: serde_json::Value = response.json().await?;
            println!("{}", serde_json::to_string_pretty(&status).unwrap());
            Ok(())
        }
        Err(e) => {
            eprintln!("Failed to get status: {}", e);
            Err(e.into())
        }
    }
}

/// Trigger a re-discovery cycle on a running node
async fn run_rediscover(address: String) -> Result<()> {
    let url = format!("http://{}/rediscover", address);
    let client = reqwest::Client::new();

    match client.post(&url).send().await {
        Ok(response) => {
            let body: serde_json::Value = response.json().await?;
            println!("{}", serde_json::to_string_pretty(&body).unwrap());
            Ok(())
        }
        Err(e) => {
            eprintln!("Failed to trigger re-discovery: {}", e);
            Err(e.into())
        }
    }
}

/// Initialize configuration file
fn run_init(output: PathBuf) -> Result<()> {
    std::fs::write(&output, DEFAULT_CONFIG_TEMPLATE)?;
    println!("Configuration file created: {}", output.display());
    println!("\nEdit the file to pin the node class or address if needed.");
    println!("Then start with: relaywarden start --config {}", output.display());

    Ok(())
}

/// Validate configuration
fn run_validate(config_path: PathBuf) -> Result<()> {
    match RelayWardenConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Node Class:  {}", config.node.class);
            println!(
                "  Address:     {}",
                config
                    .node
                    .address
                    .map(|a| a.to_string())
                    .unwrap_or_else(|| "(autodetected)".to_string())
            );
            println!("  Election:    {}:{}", config.election.multicast_group, config.election.port);
            println!("  Discovery:   {}:{}", config.discovery.multicast_group, config.discovery.port);
            println!("  Relay Port:  {}", config.relay.port);
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
    let config = load_config(&config_path)?;
    let identity = local_identity(&config);

    println!("RelayWarden Node Information");
    println!("============================");
    println!();
    println!("Address:          {}", identity.address);
    println!("Device Class:     {}", identity.class);
    println!("Priority:         {}", identity.priority);
    println!();
    println!("Election Configuration:");
    println!("  Group:          {}:{}", config.election.multicast_group, config.election.port);
    println!("  Heartbeat:      {} ms", config.election.heartbeat_interval_ms);
    println!("  Leader Timeout: {} ms", config.election.leader_timeout_ms);
    println!("  Election Wait:  {} ms", config.election.election_wait_ms);
    println!();
    println!("Discovery Configuration:");
    println!("  Group:          {}:{}", config.discovery.multicast_group, config.discovery.port);
    println!("  Announce Every: {} ms", config.discovery.announce_interval_ms);
    println!("  Listen Window:  {} ms", config.discovery.listen_window_ms);
    println!();
    println!("Relay Port:       {}", config.relay.port);
    println!("Control API:      {} (enabled: {})", config.api.bind_address, config.api.enabled);

    Ok(())
}
