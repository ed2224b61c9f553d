use std::sync::Arc;

use clap::Parser;
use replay_core::ReplayConfig;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use replay_server::{server, AppState};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "replay.toml")]
    config: String,

    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let config = match ReplayConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level)),
        )
        .init();

    let state = match AppState::from_config(config).await {
        Ok(s) => Arc::new(s),
        Err(e) => {
            eprintln!("Failed to initialise session store: {}", e);
            std::process::exit(1);
        }
    };

    if args.health {
        match state.store.health().await {
            Ok(v) => println!("✅ {} store reachable: {}", state.store.name(), v),
            Err(e) => {
                println!("❌ {} store check failed: {}", state.store.name(), e);
                std::process::exit(1);
            }
        }
        println!("✅ Replay health check passed");
        return Ok(());
    }

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    let http_task = if state.config.http.enabled {
        let http_state = state.clone();
        let http_shutdown = tx.subscribe();
        Some(tokio::spawn(async move {
            if let Err(e) = replay_server::http::start_http_server(http_state, http_shutdown).await {
                tracing::error!("HTTP server error: {}", e);
            }
        }))
    } else {
        None
    };

    let socket_path = state.config.service.socket_path.clone();
    if socket_path.is_empty() {
        let mut shutdown = tx.subscribe();
        let _ = shutdown.recv().await;
    } else {
        server::run_unix_server(&socket_path, state, tx.subscribe()).await?;
    }

    if let Some(task) = http_task {
        let _ = task.await;
    }

    Ok(())
}
