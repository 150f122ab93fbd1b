//! Status poller
//!
//! Periodically derives the full per-app status snapshot (installed version
//! from the package database, running version from /varz, health from port
//! probes OR'd with the out-of-rotation sentinel) and publishes it atomically
//! into the status cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use appctl::errors::Error;
use appctl::model::{HealthResult, Status, Version, Versions};
use regex::Regex;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::cache::StatusCache;
use crate::config::{AppDef, Config};
use crate::deploy::oor::is_oor;
use crate::exec::Executor;
use crate::probe::{healthz, varz};

pub async fn run(
    cfg: Arc<Config>,
    cache: Arc<StatusCache>,
    executor: Arc<dyn Executor>,
    mut shutdown: broadcast::Receiver<()>,
) {
    info!("status runner starting");
    loop {
        match get_statuses(&cfg, executor.as_ref()).await {
            Ok(statuses) => {
                debug!("updating the status cache");
                cache.set_statuses(statuses);
            }
            Err(e) => {
                error!("error getting statuses: {e}");
            }
        }

        tokio::select! {
            _ = shutdown.recv() => {
                info!("status runner shutting down");
                return;
            }
            _ = tokio::time::sleep(Duration::from_secs(cfg.poll_interval_s)) => {}
        }
    }
}

pub async fn get_statuses(
    cfg: &Config,
    executor: &dyn Executor,
) -> Result<HashMap<String, Status>, Error> {
    let mut statuses = HashMap::new();

    let versions_by_app = get_installed_versions(cfg, executor).await?;
    if versions_by_app.is_empty() {
        warn!("no installed apps found on this host");
    }

    for (app, installed) in versions_by_app {
        let Some(app_def) = cfg.app_defs.get(&app) else {
            continue;
        };
        let health = run_health_checks(app_def).await;
        let running = get_running_version(app_def).await;
        statuses.insert(
            app,
            Status {
                versions: Versions {
                    config: 0,
                    installed: Some(installed),
                    running: Some(running),
                },
                health,
            },
        );
    }
    Ok(statuses)
}

async fn run_health_checks(app_def: &AppDef) -> Vec<HealthResult> {
    let mut results = Vec::new();

    // only online apps serve a health port
    if app_def.kind != appctl::model::Kind::Online {
        return results;
    }

    let oor = is_oor(&app_def.app_root);
    for spec in &app_def.healthz {
        let mut result = healthz::check(spec).await;
        // the sentinel file forces the port unhealthy so the LB drains it
        if oor {
            result.oor = true;
            result.healthy = false;
        }
        results.push(result);
    }
    results
}

/// Scrape the package database for installed versions of known apps.
/// Lines look like `arryved-api/unknown,now 2.14.2 amd64 [installed]`.
pub async fn get_installed_versions(
    cfg: &Config,
    executor: &dyn Executor,
) -> Result<HashMap<String, Version>, Error> {
    let mut versions = HashMap::new();

    let output = executor
        .run(
            &cfg.apt_path,
            vec!["list".to_string(), "--installed".to_string()],
            HashMap::new(),
        )
        .await
        .map_err(|e| Error::Package(format!("apt list failed: {e}")))?;

    let installed_line = Regex::new(r"\[.*installed.*\]").expect("static regex");
    for line in String::from_utf8_lossy(&output.stdout).lines() {
        if !installed_line.is_match(line) {
            debug!("skipped line={line}");
            continue;
        }

        let Some((name, rest)) = line.split_once('/') else {
            continue;
        };
        if !cfg.app_defs.contains_key(name) {
            continue;
        }

        let mut fields = rest.split(' ');
        let _channel = fields.next();
        let Some(version_field) = fields.next() else {
            continue;
        };
        let version = Version::parse(version_field).map_err(|e| {
            debug!("version {version_field} could not be parsed: {e}");
            e
        })?;
        versions.insert(name.to_string(), version);
    }
    Ok(versions)
}

async fn get_running_version(app_def: &AppDef) -> Version {
    let Some(varz_spec) = &app_def.varz else {
        return Version::default();
    };
    let result = varz::check(varz_spec).await;
    match Version::parse(&result.server_info.version) {
        Ok(version) => version,
        Err(_) => {
            debug!(
                "could not parse version string {}",
                result.server_info.version
            );
            Version::default()
        }
    }
}
