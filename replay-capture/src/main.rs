//! replay-capture: push recorded events to a replay server
//!
//! # Subcommands
//! - `forward <file.ndjson>`: read one event per line, batch and deliver them
//! - `status`               : show server health

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use replay_capture::{Batcher, BatcherOptions, FlushOutcome, SessionContext, Transport};
use replay_core::config::CaptureConfig;
use replay_core::{Event, ReplayConfig, SessionMetadata};
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_SERVER: &str = "http://127.0.0.1:8766";

#[derive(Debug, Parser)]
#[command(name = "replay-capture", version, about = "Forward recorded events to a replay server")]
struct Cli {
    /// Replay HTTP server URL
    #[arg(long, env = "REPLAY_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    /// Optional config file; its [capture] section sets batch size and interval
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Forward newline-delimited events from a file
    Forward {
        file: PathBuf,

        /// Page URL reported in session metadata
        #[arg(long)]
        page_url: Option<String>,

        /// User agent reported in session metadata
        #[arg(long)]
        user_agent: Option<String>,
    },

    /// Show replay server status
    Status,
}

async fn do_forward(
    server: &str,
    capture: CaptureConfig,
    file: PathBuf,
    metadata: SessionMetadata,
) -> anyhow::Result<()> {
    let body = tokio::fs::read_to_string(&file).await?;

    let mut events = Vec::new();
    let mut skipped = 0usize;
    for line in body.lines().filter(|l| !l.trim().is_empty()) {
        match serde_json::from_str(line).ok().and_then(Event::from_value) {
            Some(event) => events.push(event),
            None => skipped += 1,
        }
    }

    let capture = CaptureConfig {
        endpoint: format!("{}/ingest", server),
        ..capture
    };
    let transport = Transport::from_config(&capture)?;
    let context = Arc::new(SessionContext::new(metadata));
    let batcher = Arc::new(Batcher::new(
        transport,
        context,
        BatcherOptions::from(&capture),
    ));

    let (lifecycle, _) = broadcast::channel(4);
    let session_id = batcher.init(&lifecycle);

    let total = events.len();
    for event in events {
        batcher.record(event).await;
    }

    match batcher.teardown().await {
        FlushOutcome::Requeued(n) | FlushOutcome::Held(n) => {
            anyhow::bail!("{} events could not be delivered to {}", n, capture.endpoint);
        }
        _ => {}
    }

    println!("Session:   {}", session_id);
    println!("Forwarded: {}", total);
    if skipped > 0 {
        println!("Skipped:   {} malformed lines", skipped);
    }
    Ok(())
}

async fn do_status(server: &str) -> anyhow::Result<()> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()?;

    let url = format!("{}/health", server);
    let resp = client.get(&url).send().await;

    match resp {
        Ok(r) if r.status().is_success() => {
            let body: serde_json::Value = r.json().await.unwrap_or_default();
            println!("Replay server: {}", body["status"].as_str().unwrap_or("unknown"));
            println!("Version:       {}", body["version"].as_str().unwrap_or("?"));
            println!("Store:         {}", body["store"].as_str().unwrap_or("?"));
            println!("Backend:       {}", body["backend"].as_str().unwrap_or("?"));
            println!("Remote:        {}", body["remote"].as_bool().unwrap_or(false));
        }
        Ok(r) => {
            anyhow::bail!("server unhealthy (HTTP {})", r.status());
        }
        Err(e) => {
            anyhow::bail!("cannot reach {}: {}", url, e);
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();

    let capture = match cli.config.as_deref().map(ReplayConfig::load) {
        Some(Ok(config)) => config.capture,
        Some(Err(e)) => {
            eprintln!("replay-capture: failed to load config: {}", e);
            std::process::exit(1);
        }
        None => CaptureConfig::default(),
    };

    let result = match cli.command {
        Commands::Forward {
            file,
            page_url,
            user_agent,
        } => {
            let metadata = SessionMetadata {
                page_url,
                user_agent: Some(
                    user_agent.unwrap_or_else(|| format!("replay-capture/{}", env!("CARGO_PKG_VERSION"))),
                ),
                ..Default::default()
            };
            do_forward(&server, capture, file, metadata).await
        }
        Commands::Status => do_status(&server).await,
    };

    if let Err(e) = result {
        eprintln!("replay-capture: {}", e);
        std::process::exit(1);
    }
}
