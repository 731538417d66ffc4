//! Pipeline controller server binary
//!
//! Run with: cargo run -p pipeline-controller --bin pipeline-controller-server

use clap::Parser;
use pipeline_controller::{config::PipelineConfig, server::PipelineServer, types::Stage};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "pipeline-controller-server")]
#[command(about = "Drive source files through ASR, validation and embedding", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, env = "PIPELINE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the bind host
    #[arg(long)]
    host: Option<String>,

    /// Override the bind port
    #[arg(short, long)]
    port: Option<u16>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pipeline_controller=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // Load configuration
    let mut config = PipelineConfig::load(cli.config.as_deref())?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    if cli.print_config {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    tracing::info!("Configuration loaded");
    tracing::info!("  - Storage: {:?} at {}", config.storage.backend, config.storage.path.display());
    for stage in Stage::ALL {
        let cfg = config.stages.get(stage);
        tracing::info!(
            "  - {}: {} (concurrency {}, timeout {}s)",
            stage,
            cfg.service_url,
            cfg.concurrency,
            cfg.timeout_secs
        );
    }
    if let Some(root) = &config.corpus.root {
        tracing::info!("  - Corpus root: {}", root.display());
    }

    // Create and start server
    let server = PipelineServer::new(config)?;

    println!("\nServer starting...");
    println!("  Status: http://{}/status/all", server.address());
    println!("  Health: http://{}/health", server.address());
    println!("  Info:   http://{}/info", server.address());
    println!("\nPress Ctrl+C to stop\n");

    server.start().await?;

    Ok(())
}
