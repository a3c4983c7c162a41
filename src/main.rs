//! JobMesh Node CLI
//!
//! Command-line interface for running a JobMesh agent node.

use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use jobmesh_node::config::TransportKind;
use jobmesh_node::{AgentNode, AgentRole, ApiServer, AppState, Error, NodeConfig, Result};

/// Health response from the API.
#[derive(Debug, serde::Deserialize)]
struct HealthResponse {
    status: String,
    version: String,
    agent: String,
    uptime: u64,
}

#[derive(Parser)]
#[command(name = "jobmesh")]
#[command(author, version, about = "JobMesh matching agent node", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new node configuration
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config.toml")]
        output: String,
    },

    /// Start the agent node
    Start {
        /// HTTP API listen address
        #[arg(long)]
        api_addr: Option<String>,

        /// Agent role (job-finder or candidate-finder)
        #[arg(long)]
        role: Option<AgentRole>,

        /// Message bus (memory or nats)
        #[arg(long)]
        transport: Option<TransportKind>,

        /// NATS server URL
        #[arg(long)]
        nats_url: Option<String>,

        /// Also host the peer agent in this process
        #[arg(long, default_value = "false")]
        colocate_peer: bool,
    },

    /// Check node health
    Health {
        /// API endpoint to check
        #[arg(long, default_value = "http://localhost:8080")]
        endpoint: String,
    },
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Init { output } => {
            info!("Initializing new node configuration at: {}", output);
            let config = NodeConfig::default();
            config.save(&output)?;
            info!("Configuration saved successfully");
        }

        Commands::Start {
            api_addr,
            role,
            transport,
            nats_url,
            colocate_peer,
        } => {
            info!("Starting JobMesh node...");

            // 1. Load configuration, then environment and CLI overrides
            let mut config = if Path::new(&cli.config).exists() {
                info!("Loading configuration from: {}", cli.config);
                NodeConfig::load(&cli.config)?
            } else {
                info!("Using default configuration");
                NodeConfig::default()
            };
            config.apply_env_overrides()?;

            if let Some(role) = role {
                if config.agent.role != role {
                    config.agent.role = role;
                    config.agent.id = role.default_agent_id().to_string();
                    config.agent.peer = Some(role.default_peer_id().to_string());
                }
            }
            if let Some(kind) = transport {
                config.transport.kind = kind;
            }
            if let Some(url) = nats_url {
                config.transport.nats_url = url;
            }
            if let Some(addr) = api_addr {
                config.api.listen_address = addr;
            }
            config.validate()?;

            info!("Agent: {} ({:?})", config.agent.id, config.agent.role);
            info!("Transport: {:?}", config.transport.kind);
            info!("API address: {}", config.api.listen_address);

            // 2. Metrics recorder
            let prometheus = match PrometheusBuilder::new().install_recorder() {
                Ok(handle) => Some(handle),
                Err(e) => {
                    warn!("Failed to install metrics recorder: {}", e);
                    None
                }
            };

            // 3. Build and start the node
            let node = Arc::new(
                AgentNode::builder(config.clone())
                    .colocate_peer(colocate_peer)
                    .build()
                    .await?,
            );
            node.start().await?;

            // 4. Start HTTP API server in background
            let api_server =
                ApiServer::with_state(config.api.clone(), AppState::new(node.clone(), prometheus));
            let api_addr = config.api.listen_address.clone();
            let api_task = tokio::spawn(async move {
                if let Err(e) = api_server.run(&api_addr).await {
                    error!("API server error: {}", e);
                }
            });

            info!("JobMesh node started successfully");
            info!("Press Ctrl+C to stop");

            // 5. Wait for shutdown
            tokio::select! {
                _ = signal::ctrl_c() => {
                    info!("Received shutdown signal");
                }
                _ = api_task => {
                    warn!("API server exited");
                }
            }
            node.shutdown().await;
            info!("Node stopped");
        }

        Commands::Health { endpoint } => {
            info!("Checking node health at: {}", endpoint);

            let health_url = format!("{}/health", endpoint.trim_end_matches('/'));

            match tokio::time::timeout(std::time::Duration::from_secs(5), check_health(&health_url))
                .await
            {
                Ok(Ok(response)) => {
                    info!("Node status: {}", response.status);
                    info!("Version: {}", response.version);
                    info!("Agent: {}", response.agent);
                    info!("Uptime: {} seconds", response.uptime);
                }
                Ok(Err(e)) => {
                    error!("Health check failed: {}", e);
                    std::process::exit(1);
                }
                Err(_) => {
                    error!("Health check timed out");
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}

/// Perform a health check against the API endpoint.
async fn check_health(url: &str) -> Result<HealthResponse> {
    let url = if url.contains("://") {
        url.to_string()
    } else {
        format!("http://{}", url)
    };

    let response = reqwest::Client::new()
        .get(&url)
        .send()
        .await
        .map_err(|e| Error::Api(format!("Request failed: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::Api(format!("Health endpoint returned {}", status)));
    }

    response
        .json::<HealthResponse>()
        .await
        .map_err(|e| Error::Api(format!("JSON parse error: {}", e)))
}
