//! MeshCtl - Command line tool for FileMesh nodes
//!
//! Usage:
//!   meshctl get <name>       - Download a file through a node
//!   meshctl put <name>       - Upload a file to a node
//!   meshctl list             - List files across the cluster
//!   meshctl status           - Show node membership status

use std::io::{Read, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;

use filemesh::config::FileMeshConfig;

/// FileMesh Control Tool
#[derive(Parser)]
#[command(name = "meshctl")]
#[command(about = "Read, write and inspect files on a FileMesh cluster", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "filemesh.toml")]
    config: PathBuf,

    /// API endpoint to connect to (overrides config)
    #[arg(short, long)]
    endpoint: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a file
    Get {
        /// File name
        name: String,
        /// Write to this path instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Upload a file
    Put {
        /// File name on the cluster
        name: String,
        /// Local file to upload (reads stdin when omitted)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// List files held anywhere in the cluster
    List,
    /// Show status of the node
    Status,
}

// ============ API Response Types ============

#[derive(Debug, Deserialize)]
struct FilesResponse {
    #[serde(default)]
    files: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    node: String,
    #[serde(default)]
    membership: String,
    #[serde(default)]
    peer_count: usize,
    #[serde(default)]
    peers: Vec<PeerStatus>,
}

#[derive(Debug, Deserialize)]
struct PeerStatus {
    address: String,
    #[serde(default)]
    last_contact: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
    code: String,
}

// ============ Main ============

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let endpoint = resolve_endpoint(&cli);

    let result = match &cli.command {
        Commands::Get { name, output } => get_file(&endpoint, name, output.as_ref()).await,
        Commands::Put { name, file } => put_file(&endpoint, name, file.as_ref()).await,
        Commands::List => list_files(&endpoint).await,
        Commands::Status => show_status(&endpoint).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// API endpoint from the flag, else the config file, else localhost
fn resolve_endpoint(cli: &Cli) -> String {
    if let Some(endpoint) = &cli.endpoint {
        return normalize_endpoint(endpoint);
    }

    match FileMeshConfig::from_file(&cli.config) {
        Ok(config) => normalize_endpoint(&config.api_bind_address()),
        Err(_) => "http://127.0.0.1:8080".to_string(),
    }
}

fn normalize_endpoint(address: &str) -> String {
    if address.starts_with("http://") || address.starts_with("https://") {
        return address.trim_end_matches('/').to_string();
    }
    // A wildcard bind address is reachable on loopback
    match address.strip_prefix("0.0.0.0:") {
        Some(port) => format!("http://127.0.0.1:{}", port),
        None => format!("http://{}", address),
    }
}

/// Turn a non-success response into an error carrying the API message
async fn api_error(response: reqwest::Response) -> anyhow::Error {
    let status = response.status();
    match response.json::<ErrorResponse>().await {
        Ok(body) => anyhow::anyhow!("{} ({}): {}", status, body.code, body.error),
        Err(_) => anyhow::anyhow!("API error: {}", status),
    }
}

// ============ Commands ============

async fn get_file(endpoint: &str, name: &str, output: Option<&PathBuf>) -> Result<()> {
    let url = format!("{}/file/{}", endpoint, name);
    let response = reqwest::get(&url)
        .await
        .with_context(|| format!("failed to reach {}", endpoint))?;

    if !response.status().is_success() {
        return Err(api_error(response).await);
    }

    let data = response.bytes().await?;
    match output {
        Some(path) => {
            std::fs::write(path, &data).with_context(|| format!("failed to write {:?}", path))?;
            eprintln!("Wrote {} bytes to {:?}", data.len(), path);
        }
        None => std::io::stdout().write_all(&data)?,
    }
    Ok(())
}

async fn put_file(endpoint: &str, name: &str, file: Option<&PathBuf>) -> Result<()> {
    let data = match file {
        Some(path) => std::fs::read(path).with_context(|| format!("failed to read {:?}", path))?,
        None => {
            let mut buf = Vec::new();
            std::io::stdin().read_to_end(&mut buf)?;
            buf
        }
    };

    let url = format!("{}/file/{}", endpoint, name);
    let size = data.len();
    let response = reqwest::Client::new()
        .put(&url)
        .body(data)
        .send()
        .await
        .with_context(|| format!("failed to reach {}", endpoint))?;

    if !response.status().is_success() {
        return Err(api_error(response).await);
    }

    println!("Uploaded {} ({} bytes)", name, size);
    Ok(())
}

async fn list_files(endpoint: &str) -> Result<()> {
    let url = format!("{}/files", endpoint);
    let response = reqwest::get(&url)
        .await
        .with_context(|| format!("failed to reach {}", endpoint))?;

    if !response.status().is_success() {
        return Err(api_error(response).await);
    }

    let listing: FilesResponse = response.json().await?;
    if listing.files.is_empty() {
        println!("No files");
        return Ok(());
    }
    for name in &listing.files {
        println!("{}", name);
    }
    Ok(())
}

async fn show_status(endpoint: &str) -> Result<()> {
    let url = format!("{}/status", endpoint);
    let response = reqwest::get(&url)
        .await
        .with_context(|| format!("failed to reach {}", endpoint))?;

    if !response.status().is_success() {
        bail!("API error: {}", response.status());
    }

    let status: StatusResponse = response.json().await?;

    println!();
    println!("FileMesh Node Status (meshctl v{})", env!("CARGO_PKG_VERSION"));
    println!("=====================================");
    println!();
    println!("Node:       {}", status.node);

    let state_colored = match status.membership.as_str() {
        "JOINED" => format!("\x1b[32m{}\x1b[0m", status.membership),
        "STALE" => format!("\x1b[33m{}\x1b[0m", status.membership),
        _ => format!("\x1b[31m{}\x1b[0m", status.membership),
    };
    println!("Membership: {}", state_colored);
    println!("Peers:      {}", status.peer_count);
    for peer in &status.peers {
        println!("  - {} (last seen {})", peer.address, peer.last_contact);
    }
    println!();

    Ok(())
}
