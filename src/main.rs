//! FileMesh - Peer-to-peer file replication
//!
//! Runs either a file-service node or the discovery service.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use filemesh::config::FileMeshConfig;
use filemesh::error::Result;
use filemesh::node::{DiscoveryNode, FileNode};

/// FileMesh - Peer-to-peer file replication
#[derive(Parser)]
#[command(name = "filemesh")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "filemesh.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); defaults to [logging] level
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a file-service node
    Node {
        /// Discovery service address (host:port), overrides the config file
        #[arg(short, long)]
        discovery: Option<String>,
    },

    /// Start the discovery service
    Discovery {
        /// Address to listen on, overrides the config file
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "filemesh.toml")]
        output: PathBuf,

        /// Host other nodes use to reach this node
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Discovery service address
        #[arg(long, default_value = "127.0.0.1:6500")]
        discovery: String,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = cli
        .log_level
        .clone()
        .or_else(|| {
            FileMeshConfig::from_file(&cli.config)
                .ok()
                .map(|c| c.logging.level)
        })
        .unwrap_or_else(|| "info".to_string());
    init_logging(&level);

    match cli.command {
        Commands::Node { discovery } => run_node(cli.config, discovery).await,
        Commands::Discovery { bind } => run_discovery(cli.config, bind).await,
        Commands::Init {
            output,
            host,
            discovery,
        } => run_init(output, host, discovery),
        Commands::Validate => run_validate(cli.config),
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

fn load_config(config_path: &Path) -> Result<FileMeshConfig> {
    match FileMeshConfig::from_file(config_path) {
        Ok(c) => Ok(c),
        Err(e) => {
            tracing::error!("Failed to load configuration from {:?}: {}", config_path, e);
            tracing::error!("Please check that the config file exists and is valid TOML");
            Err(e)
        }
    }
}

/// Start a file-service node
async fn run_node(config_path: PathBuf, discovery: Option<String>) -> Result<()> {
    let mut config = load_config(&config_path)?;
    if let Some(address) = discovery {
        config.discovery.address = address;
    }

    let node = match FileNode::new(config) {
        Ok(node) => node,
        Err(e) => {
            tracing::error!("Failed to initialize node: {}", e);
            return Err(e);
        }
    };

    if let Err(e) = node.run().await {
        tracing::error!("Node stopped with error: {}", e);
        return Err(e);
    }
    Ok(())
}

/// Start the discovery service
async fn run_discovery(config_path: PathBuf, bind: Option<String>) -> Result<()> {
    let mut config = load_config(&config_path)?;
    if let Some(address) = bind {
        config.discovery.bind_address = address;
    }

    if let Err(e) = DiscoveryNode::new(config).run().await {
        tracing::error!("Discovery service stopped with error: {}", e);
        return Err(e);
    }
    Ok(())
}

/// Write a sample configuration file
fn run_init(output: PathBuf, host: String, discovery: String) -> Result<()> {
    let config_content = format!(
        r#"# FileMesh Configuration
# Generated configuration file

[node]
host = "{host}"
client_port = 8080
peer_port = 7070
listen_host = "0.0.0.0"
data_dir = "/var/lib/filemesh"

[discovery]
address = "{discovery}"
bind_address = "0.0.0.0:6500"
push_interval_ms = 10000
ack_timeout_ms = 1000
max_missed = 3

[sync]
freshness_timeout_ms = 5000
fetch_timeout_ms = 30000
join_timeout_ms = 1000
rejoin_min_ms = 1000
rejoin_max_ms = 30000
stale_factor = 3
max_frame_mb = 256
max_peer_connections = 64

[api]
enabled = true
# bind_address = "0.0.0.0:8080"

[logging]
level = "info"
"#
    );

    // Reject a template that would not load back
    FileMeshConfig::from_str(&config_content)?;

    std::fs::write(&output, config_content)?;
    println!("Configuration written to {:?}", output);
    Ok(())
}

/// Validate configuration file
fn run_validate(config_path: PathBuf) -> Result<()> {
    match FileMeshConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Node:           {}", config.node_address());
            println!("  Peer Listener:  {}", config.peer_bind_address());
            println!("  HTTP API:       {}", config.api_bind_address());
            println!("  Data Directory: {}", config.data_dir().display());
            println!("  Discovery:      {}", config.discovery.address);
            println!("  Push Interval:  {} ms", config.discovery.push_interval_ms);
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}
