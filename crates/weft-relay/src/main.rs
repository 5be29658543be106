//! weft relay daemon entry point

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use weft_relay::bridges::{BridgeManager, BridgeSettings};
use weft_relay::registry::{RegistrySettings, RoomRegistry};
use weft_relay::server::{self, AppState};
use weft_relay::RelayConfig;
use weft_store::{KeyRing, SnapshotStore};

#[derive(Parser)]
#[command(name = "weft-relay")]
#[command(about = "Encrypted collaborative-document relay", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay daemon
    Serve {
        /// Configuration file (TOML, kebab-case keys)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the listen address
        #[arg(short, long)]
        listen: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { config, listen } => serve(config, listen).await,
    }
}

async fn serve(config_path: Option<PathBuf>, listen: Option<String>) -> anyhow::Result<()> {
    let mut cfg = match &config_path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            toml::from_str::<RelayConfig>(&raw)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => RelayConfig::default(),
    };
    if let Some(listen) = listen {
        cfg.listen_address = listen;
    }
    cfg.validate();

    let keys = Arc::new(KeyRing::new());
    if let Some(path) = &cfg.key_file {
        let loaded = keys
            .load_key_file(path)
            .with_context(|| format!("loading key file {}", path.display()))?;
        info!(keys = loaded, "loaded startup key file");
    }

    let store = match &cfg.persistence_dir {
        Some(dir) => Some(Arc::new(
            SnapshotStore::open(dir)
                .with_context(|| format!("opening persistence dir {}", dir.display()))?,
        )),
        None => None,
    };

    let registry = Arc::new(RoomRegistry::new(
        RegistrySettings {
            max_rooms: cfg.max_rooms,
            max_update_bytes: cfg.max_update_bytes,
            debounce: cfg.debounce(),
            ceiling: cfg.ceiling(),
            idle_timeout: cfg.idle_timeout(),
        },
        store,
        Arc::clone(&keys),
    ));
    registry.restore_all().await;

    let bridge_settings = cfg.relay_base_url.clone().map(|relay_base| BridgeSettings {
        relay_base,
        proxy: cfg.outbound_proxy,
        max_update_bytes: cfg.max_update_bytes,
    });
    let bridges = Arc::new(BridgeManager::new(bridge_settings));

    let shutdown = CancellationToken::new();
    let sweeper = registry.spawn_sweeper(cfg.sweep_interval(), shutdown.clone());

    #[cfg(unix)]
    if let Some(socket) = cfg.sidecar_socket.clone() {
        tokio::spawn(weft_relay::keychannel::run(
            socket,
            Arc::clone(&registry),
            Arc::clone(&bridges),
            shutdown.clone(),
        ));
    }
    #[cfg(not(unix))]
    if cfg.sidecar_socket.is_some() {
        tracing::warn!("sidecar-socket is only supported on unix; ignoring");
    }

    let listener = tokio::net::TcpListener::bind(&cfg.listen_address)
        .await
        .with_context(|| format!("binding {}", cfg.listen_address))?;
    info!(addr = %cfg.listen_address, "relay listening");

    let state = AppState {
        registry: Arc::clone(&registry),
        bridges: Arc::clone(&bridges),
        max_update_bytes: cfg.max_update_bytes,
        max_rooms: cfg.max_rooms,
    };
    let server = tokio::spawn(server::serve(listener, state, shutdown.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutting down");

    shutdown.cancel();
    bridges.shutdown();
    registry.shutdown().await;
    let _ = server.await;
    let _ = sweeper.await;
    Ok(())
}
