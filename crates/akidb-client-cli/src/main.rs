use std::path::PathBuf;

use akidb_client::{Client, Credentials};
use akidb_client_core::ClientConfig;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

mod commands;
mod logging;

#[derive(Parser, Debug)]
#[command(name = "akidb-client")]
#[command(about = "AkiDB data-plane client: batch ingest and queries", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file; defaults and `AKIDB_CLIENT__*` variables apply otherwise
    #[arg(long, env = "AKIDB_CLIENT_CONFIG")]
    config: Option<PathBuf>,

    /// gRPC endpoint, overrides `connection.grpc_endpoint`
    #[arg(long, env = "AKIDB_ENDPOINT")]
    endpoint: Option<String>,

    /// API key sent as a bearer token
    #[arg(long, env = "AKIDB_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the negotiated schema generation and channel statistics
    Info,
    /// Write objects from a JSON Lines file
    Ingest(commands::ingest::IngestArgs),
    /// Run a fetch, near-vector, near-image or hybrid query and print records as JSON Lines
    Query(commands::query::QueryArgs),
}

fn load_config(cli: &Cli) -> Result<ClientConfig> {
    let mut config = match &cli.config {
        Some(path) => ClientConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => ClientConfig::load().context("failed to load config")?,
    };
    if let Some(endpoint) = &cli.endpoint {
        config.connection.grpc_endpoint = endpoint.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    logging::init_logging(&config.logging)?;

    let credentials = cli
        .api_key
        .as_deref()
        .map_or_else(Credentials::none, Credentials::bearer);

    info!(endpoint = %config.connection.grpc_endpoint, "connecting");
    let client = Client::connect(config, credentials)
        .await
        .context("failed to connect")?;

    let result = match cli.command {
        Command::Info => commands::info::run(&client),
        Command::Ingest(args) => commands::ingest::run(&client, args).await,
        Command::Query(args) => commands::query::run(&client, args).await,
    };
    client.close().await?;
    result
}
