//! Deploy runner loop
//!
//! Picks up pending deploy records, batches them into one install/restart
//! pass, and marks every record in the batch complete with the shared
//! outcome.

use std::sync::Arc;
use std::time::Duration;

use appctl::errors::Error;
use appctl::store::{ObjectStore, SecretStore};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::cache::DeployCache;
use crate::config::Config;
use crate::deploy::configball::{expand_configball, fetch_configball, fixup_permissions};
use crate::deploy::files::{materialize_files, write_compiled_config};
use crate::deploy::oor::{set_oor, unset_oor};
use crate::exec::{apt_install, apt_update, systemd_reload, systemd_restart, Executor};

pub async fn run(
    cfg: Arc<Config>,
    cache: Arc<DeployCache>,
    executor: Arc<dyn Executor>,
    object_store: Arc<dyn ObjectStore>,
    secret_store: Arc<dyn SecretStore>,
    mut shutdown: broadcast::Receiver<()>,
) {
    info!("deploy runner starting");
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                info!("deploy runner shutting down");
                return;
            }
            _ = tokio::time::sleep(Duration::from_secs(cfg.deploy_interval_s)) => {}
        }

        run_once(
            &cfg,
            &cache,
            executor.as_ref(),
            object_store.as_ref(),
            secret_store.as_ref(),
        )
        .await;
    }
}

/// One runner iteration: reap, batch, drain.
pub async fn run_once(
    cfg: &Config,
    cache: &DeployCache,
    executor: &dyn Executor,
    object_store: &dyn ObjectStore,
    secret_store: &dyn SecretStore,
) {
    debug!("clean stale deploys");
    cache.clean_deploys();

    // everything not yet completed forms this iteration's batch
    let mut targets: Vec<(String, String)> = Vec::new();
    for (app, deploy) in cache.get_deploys() {
        if deploy.completed_at == 0 {
            cache.mark_deploy_start(&app);
            targets.push((app, deploy.version));
        }
    }
    if targets.is_empty() {
        debug!("no deploy targets, so nothing to do");
        return;
    }
    info!("deploy runner targets={targets:?}");

    // drain traffic before mutating anything
    for (app, _) in &targets {
        if let Some(app_def) = cfg.app_defs.get(app) {
            if let Err(e) = set_oor(executor, &cfg.service_user, &app_def.app_root).await {
                warn!("could not set OOR for app={app}: {e}");
            }
        }
    }

    // NOTE: targets are batched into one install and one restart, so a
    // failure in any stage fails the whole batch. That is acceptable on a
    // single machine; multiple apps per host only happens off prod.
    let result = install_and_restart(cfg, executor, object_store, secret_store, &targets).await;
    info!("deploy finished; err={:?}", result.as_ref().err().map(|e| e.to_string()));

    // re-admission is safe even after a failed install: the load balancer
    // will not add the host back while its health probe still fails
    for (app, _) in &targets {
        if let Some(app_def) = cfg.app_defs.get(app) {
            if let Err(e) = unset_oor(executor, &cfg.service_user, &app_def.app_root).await {
                warn!("could not unset OOR for app={app}: {e}");
            }
        }
    }

    let err_text = result.err().map(|e| e.to_string());
    for (app, _) in &targets {
        if !cache.mark_deploy_complete(app, err_text.clone()) {
            warn!("unexpected failure to mark deploy as completed app={app}");
        }
    }
}

async fn install_and_restart(
    cfg: &Config,
    executor: &dyn Executor,
    object_store: &dyn ObjectStore,
    secret_store: &dyn SecretStore,
    targets: &[(String, String)],
) -> Result<(), Error> {
    let apt_targets: Vec<String> = targets
        .iter()
        .map(|(app, version)| format!("{app}={version}"))
        .collect();
    info!("installing and restarting for targets={apt_targets:?}");

    apt_update(executor).await?;
    apt_install(executor, &apt_targets).await?;
    pull_and_merge_configs(cfg, executor, object_store, secret_store, targets).await?;
    systemd_reload(executor).await?;

    let services: Vec<String> = targets
        .iter()
        .map(|(app, _)| {
            cfg.app_defs
                .get(app)
                .map(|def| def.service_unit(app))
                .unwrap_or_else(|| app.clone())
        })
        .collect();
    systemd_restart(executor, &services).await?;
    Ok(())
}

async fn pull_and_merge_configs(
    cfg: &Config,
    executor: &dyn Executor,
    object_store: &dyn ObjectStore,
    secret_store: &dyn SecretStore,
    targets: &[(String, String)],
) -> Result<(), Error> {
    for (app, version) in targets {
        let app_def = cfg
            .app_defs
            .get(app)
            .ok_or_else(|| Error::Config(format!("no app definition for {app}")))?;
        let cluster_id = &app_def.cluster;
        let target_path = &app_def.app_root;

        let configball =
            fetch_configball(object_store, &cfg.config_bucket, cluster_id, version).await?;
        expand_configball(executor, &cfg.service_user, &configball, app, target_path).await?;
        fixup_permissions(executor, &cfg.service_user, &cfg.service_group, target_path).await?;
        write_compiled_config(executor, &cfg.service_user, &cfg.env, cluster_id, target_path)
            .await?;
        materialize_files(executor, secret_store, &cfg.service_user, target_path).await?;
    }
    Ok(())
}
