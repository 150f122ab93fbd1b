//! app-control-worker - Entry Point
//!
//! Pulls deploy jobs off the queue and executes them against host agents or
//! the cluster API.

use std::env;
use std::sync::Arc;

use appctl::queue::HttpQueue;
use appctl::server::auth::read_psk;
use appctl::store::FsObjectStore;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use appctl_worker::config::{Config, CONFIG_PATH_DEFAULT};
use appctl_worker::worker::Worker;

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
    let object_store = Arc::new(FsObjectStore::new(&cfg.object_store_root));
    let psk = read_psk(&cfg.agent_psk_path);

    let worker = Arc::new(Worker::new(cfg.clone(), queue, object_store, psk));
    info!(
        "starting worker pool with {} threads for env={}",
        cfg.max_job_threads, cfg.env
    );

    tokio::select! {
        _ = worker.start() => {
            error!("worker pool exited unexpectedly");
        }
        _ = await_shutdown_signal() => {}
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
