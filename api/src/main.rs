//! app-control-api - Entry Point
//!
//! Central control-plane API for deploys, status reads and secrets.

use std::env;
use std::sync::Arc;

use appctl::queue::HttpQueue;
use appctl::server::auth::read_psk;
use appctl::store::FsSecretStore;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use appctl_api::config::{Config, CONFIG_PATH_DEFAULT};
use appctl_api::discovery::{self, DiscoveryCache, HttpInstanceSource};
use appctl_api::registry::RestImageRegistry;
use appctl_api::server::{self, ApiState};

#[tokio::main]
async fn main() {
    appctl::server::init_crypto();

    let config_path = config_path_from_args(env::args().skip(1).collect());
    let cfg = Arc::new(Config::load(&config_path));
    init_logging(&cfg.log_level);
    info!("Using configPath={config_path}");

    let queue = match HttpQueue::new(cfg.queue.clone()) {
        Ok(queue) => Arc::new(queue),
        Err(e) => {
            error!("could not get a queue client: {e}");
            return;
        }
    };
    let secrets = Arc::new(FsSecretStore::new(&cfg.secret_store_root));
    let registry = match RestImageRegistry::new() {
        Ok(registry) => Arc::new(registry),
        Err(e) => {
            error!("could not get a registry client: {e}");
            return;
        }
    };

    let discovery_cache = Arc::new(DiscoveryCache::new());
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    match HttpInstanceSource::new(&cfg.inventory_url) {
        Ok(source) => {
            tokio::spawn(discovery::run(
                cfg.topology.clone(),
                source,
                discovery_cache.clone(),
                shutdown_tx.subscribe(),
            ));
        }
        Err(e) => {
            warn!("discovery disabled, could not build instance source: {e}");
        }
    }

    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        await_shutdown_signal().await;
        let _ = signal_tx.send(());
    });

    let state = Arc::new(ApiState {
        cfg: cfg.clone(),
        queue,
        secrets,
        discovery: discovery_cache,
        registry,
        agent_psk: read_psk(&cfg.agent_psk_path),
    });

    let mut server_shutdown = shutdown_tx.subscribe();
    let result = server::serve(&cfg, state, async move {
        let _ = server_shutdown.recv().await;
    })
    .await;
    if let Err(e) = result {
        error!("Error seen when starting listener: {e}");
    }
    info!("Finishing up");
}

fn config_path_from_args(args: Vec<String>) -> String {
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        if let Some(value) = arg.strip_prefix("--config=") {
            return value.to_string();
        }
        if arg == "--config" {
            match iter.next() {
                Some(value) => return value,
                None => {
                    warn!("--config given without a path, using default");
                    return CONFIG_PATH_DEFAULT.to_string();
                }
            }
        }
    }
    CONFIG_PATH_DEFAULT.to_string()
}

fn init_logging(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));
    if tracing_subscriber::fmt().with_env_filter(filter).try_init().is_err() {
        eprintln!("Failed to initialize logging");
    }
}

async fn await_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => {
            info!("SIGTERM received, shutting down...");
        }
        _ = sigint.recv() => {
            info!("SIGINT received, shutting down...");
        }
    }
}
