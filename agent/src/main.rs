//! app-controld - Entry Point
//!
//! Node-local deploy and status agent. One instance runs per VM host.

use std::env;
use std::sync::Arc;

use appctl::server::auth::read_psk;
use appctl::store::{FsObjectStore, FsSecretStore};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use appctl_agent::cache::{DeployCache, StatusCache};
use appctl_agent::config::{Config, CONFIG_PATH_DEFAULT};
use appctl_agent::deploy::runner as deploy_runner;
use appctl_agent::exec::SystemExecutor;
use appctl_agent::server::{self, ServerState};
use appctl_agent::status;

#[tokio::main]
async fn main() {
    appctl::server::init_crypto();

    let config_path = config_path_from_args(env::args().skip(1).collect());
    let cfg = Arc::new(Config::load(&config_path));
    init_logging(&cfg.log_level);
    info!("Using configPath={config_path}");

    // thread-safe status and deploy maps
    let status_cache = Arc::new(StatusCache::new());
    let deploy_cache = Arc::new(DeployCache::new());

    let executor = Arc::new(SystemExecutor);
    let object_store = Arc::new(FsObjectStore::new(&cfg.object_store_root));
    let secret_store = Arc::new(FsSecretStore::new(&cfg.secret_store_root));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // start background runners
    tokio::spawn(status::run(
        cfg.clone(),
        status_cache.clone(),
        executor.clone(),
        shutdown_tx.subscribe(),
    ));
    tokio::spawn(deploy_runner::run(
        cfg.clone(),
        deploy_cache.clone(),
        executor.clone(),
        object_store,
        secret_store,
        shutdown_tx.subscribe(),
    ));

    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        await_shutdown_signal().await;
        let _ = signal_tx.send(());
    });

    let state = Arc::new(ServerState {
        cfg: cfg.clone(),
        status_cache,
        deploy_cache,
        psk: read_psk(&cfg.psk_path),
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

/// Parse the single `--config <path>` flag; anything unparseable warns and
/// falls back to the default path.
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
