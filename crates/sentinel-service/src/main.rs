//! Sentinel - edge sync agent and cloud ingestion service.
//!
//! Run with: `cargo run -p sentinel-service -- <edge|cloud|enqueue|buffer|config>`

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::Context;
use axum::Router;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use sentinel_service::config::default_config_path;
use sentinel_service::{AppState, Config, Edge, api};
use sentinel_store::{Buffer, Store};
use sentinel_types::Reading;

/// Sentinel - store-and-forward pipeline for greenhouse sensors.
#[derive(Parser, Debug)]
#[command(name = "sentinel")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Edge buffer path (overrides config).
    #[arg(long, global = true)]
    buffer: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Drain the local buffer to the ingestion service.
    Edge {
        /// Ingestion service URL (overrides config).
        #[arg(short, long)]
        endpoint: Option<String>,

        /// Run a single sync cycle and print its outcome.
        #[arg(long)]
        once: bool,
    },

    /// Serve the ingestion API.
    Cloud {
        /// Bind address (overrides config).
        #[arg(short, long)]
        bind: Option<String>,

        /// Database path (overrides config).
        #[arg(short, long)]
        database: Option<PathBuf>,
    },

    /// Durably buffer readings from a file or stdin.
    ///
    /// Accepts one JSON reading or JSON lines. Every line is validated
    /// before anything is written.
    Enqueue {
        /// Input file; `-` or nothing reads stdin.
        file: Option<PathBuf>,
    },

    /// Show the pending buffer.
    Buffer {
        /// Number of oldest records to list.
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },

    /// Print the effective configuration.
    Config {
        /// Write it to the configuration file.
        #[arg(long)]
        write: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sentinel_service=info".parse()?)
                .add_directive("sentinel_core=info".parse()?),
        )
        .init();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default().unwrap_or_else(|e| {
            warn!("Ignoring unreadable default config: {}", e);
            Config::default()
        }),
    };
    if let Some(buffer) = &args.buffer {
        config.edge.buffer_path = buffer.clone();
    }

    match args.command {
        Command::Edge { endpoint, once } => {
            if let Some(endpoint) = endpoint {
                config.sync.endpoint = endpoint;
            }
            run_edge(config, once).await
        }
        Command::Cloud { bind, database } => {
            if let Some(bind) = bind {
                config.cloud.bind = bind;
            }
            if let Some(database) = database {
                config.cloud.database_path = database;
            }
            run_cloud(config).await
        }
        Command::Enqueue { file } => enqueue(&config, file.as_deref()),
        Command::Buffer { limit } => show_buffer(&config, limit),
        Command::Config { write } => {
            config.validate()?;
            if write {
                let path = args.config.unwrap_or_else(default_config_path);
                config.save(&path)?;
                println!("Wrote {}", path.display());
            } else {
                print!("{}", config.to_toml()?);
            }
            Ok(())
        }
    }
}

async fn run_edge(config: Config, once: bool) -> anyhow::Result<()> {
    config.validate()?;
    let edge = Edge::from_config(&config)?;

    if once {
        let outcome = edge.sync_once().await?;
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_ctrl_c(shutdown.clone()));

    let stats = edge.run(shutdown).await;
    info!(
        "Final stats: {} delivered, {} failed tick(s), {} pending",
        stats.delivered,
        stats.failures,
        edge.buffer().count()?
    );
    Ok(())
}

async fn run_cloud(config: Config) -> anyhow::Result<()> {
    config.validate()?;

    info!("Opening database at {:?}", config.cloud.database_path);
    let store = Store::open(&config.cloud.database_path)?;
    let state = AppState::from_config(store, &config);

    let app = Router::new()
        .merge(api::router())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(config.cloud.bind.as_str())
        .await
        .with_context(|| format!("Failed to bind {}", config.cloud.bind))?;
    info!("Starting server on {}", listener.local_addr()?);

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_ctrl_c(shutdown.clone()));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    Ok(())
}

async fn cancel_on_ctrl_c(shutdown: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown requested");
    }
    shutdown.cancel();
}

fn enqueue(config: &Config, file: Option<&Path>) -> anyhow::Result<()> {
    let input = match file {
        Some(path) if path != Path::new("-") => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        _ => {
            let mut input = String::new();
            std::io::stdin()
                .read_to_string(&mut input)
                .context("Failed to read stdin")?;
            input
        }
    };

    let readings = parse_readings(&input)?;
    if readings.is_empty() {
        anyhow::bail!("No readings in input");
    }

    let buffer = Buffer::open(&config.edge.buffer_path)?;
    for reading in &readings {
        let id = buffer.enqueue(reading)?;
        println!("{}", id);
    }
    info!(
        "Buffered {} reading(s), {} pending",
        readings.len(),
        buffer.count()?
    );
    Ok(())
}

/// A single JSON document, or one reading per non-empty line.
fn parse_readings(input: &str) -> anyhow::Result<Vec<Reading>> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if let Ok(reading) = Reading::from_json(trimmed.as_bytes()) {
        return Ok(vec![reading]);
    }

    trimmed
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            Reading::from_json(line.trim().as_bytes())
                .with_context(|| format!("Invalid reading on line {}", n + 1))
        })
        .collect()
}

fn show_buffer(config: &Config, limit: usize) -> anyhow::Result<()> {
    let buffer = Buffer::open(&config.edge.buffer_path)?;
    let count = buffer.count()?;
    println!("{} pending record(s) in {}", count, config.edge.buffer_path.display());

    for record in buffer.peek_batch(limit)? {
        println!("{:>8}  {}  {}", record.id, record.enqueued_at, record.payload);
    }
    Ok(())
}
