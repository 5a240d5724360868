//! Signal router - main entry point
//!
//! Routes signals from the command line or runs the long-lived service
//! with the health endpoint and automatic DLQ replay.

use clap::{Parser, Subcommand};
use sigroute::agents::HttpAgentClient;
use sigroute::config::RouterConfig;
use sigroute::dlq::auto_replay_loop;
use sigroute::health::HealthServer;
use sigroute::observability::init_default_logging;
use sigroute::signal::Signal;
use sigroute::store::MemoryStore;
use sigroute::SignalRouter;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

/// Deterministic signal routing service
#[derive(Parser)]
#[command(name = "sigroute")]
#[command(about = "Deterministic signal routing with circuit breaking and DLQ replay")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Route a single signal read from a JSON file (or stdin with "-")
    Route {
        /// Path to the signal JSON
        file: PathBuf,
    },
    /// Replay dead-lettered signals, oldest first
    Replay {
        /// Maximum number of entries to process
        #[arg(long, default_value_t = 50)]
        limit: usize,
        /// Report what would happen without dispatching or mutating anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Run the routing service with health endpoint and automatic replay
    Serve,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Route { file } => route_one(config, file).await,
        Commands::Replay { limit, dry_run } => replay(config, limit, dry_run).await,
        Commands::Serve => serve(config).await,
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<RouterConfig, Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(RouterConfig::load_from_file(path)?)
        }
        None => {
            let default_paths = ["sigroute.toml", "config/sigroute.toml"];
            for path_str in default_paths {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok(RouterConfig::load_from_file(&path)?);
                }
            }
            info!("No configuration file found, using defaults");
            Ok(RouterConfig::default())
        }
    }
}

fn build_router(config: &RouterConfig) -> SignalRouter {
    let store = Arc::new(MemoryStore::new());
    let client = Arc::new(HttpAgentClient::from_config(&config.agents));
    SignalRouter::new(config, store, client)
}

async fn route_one(config: RouterConfig, file: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let raw = if file.as_os_str() == "-" {
        use std::io::Read;
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(&file)?
    };
    let input: Signal = serde_json::from_str(&raw)?;

    let router = build_router(&config);
    let outcome = router.route(input).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn replay(
    config: RouterConfig,
    limit: usize,
    dry_run: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let router = build_router(&config);
    let report = router.replay_dlq(limit, dry_run).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn serve(config: RouterConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting signal router v{}", env!("CARGO_PKG_VERSION"));

    let router = Arc::new(build_router(&config));

    let health_port = std::env::var("HEALTH_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(config.health.port);
    let health_server = Arc::new(HealthServer::new(
        health_port,
        router.store(),
        router.breakers(),
    ));
    tokio::spawn(async move {
        if let Err(e) = health_server.start().await {
            error!("Health server error: {}", e);
        }
    });

    let replay_router = router.clone();
    let replay_config = config.replay.clone();
    let replay_task = tokio::spawn(auto_replay_loop(replay_router, replay_config));

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    info!("Router is running");

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }

    replay_task.abort();
    info!("Shutdown complete");
    Ok(())
}

fn handle_config_command(
    config: RouterConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;
    if show {
        println!("{}", toml::to_string_pretty(&config)?);
    }
    info!("Configuration validation complete");
    Ok(())
}
