//! Configball fetch and expansion
//!
//! A configball is a per-(app, version) tarball in object storage holding
//! layered configuration and the control script. The newest object matching
//! the app/version pattern wins.

use std::path::Path;

use appctl::errors::Error;
use appctl::model::ClusterId;
use appctl::store::{configball_pattern, fetch_latest_matching, ObjectStore};
use tracing::{info, warn};

use crate::exec::{
    expand_config_tar_as_user, fixup_control_permissions, fixup_directory_permissions,
    fixup_file_permissions, fixup_legacy_script_permissions, fixup_ownership, Executor,
};

pub async fn fetch_configball(
    store: &dyn ObjectStore,
    bucket: &str,
    cluster_id: &ClusterId,
    version: &str,
) -> Result<Vec<u8>, Error> {
    let pattern = configball_pattern(&cluster_id.app, version);
    info!("looking for object with pattern={pattern}");
    fetch_latest_matching(store, bucket, &pattern).await
}

/// Drop the configball into a scratch dir and extract it into the app root
/// as the service user; stale archives from earlier deploys are cleaned up
/// afterwards.
pub async fn expand_configball(
    executor: &dyn Executor,
    service_user: &str,
    configball: &[u8],
    app: &str,
    target_path: &Path,
) -> Result<(), Error> {
    let scratch = tempfile::tempdir().map_err(|e| {
        Error::FileSystem(format!("failed to create temp directory: {e}"))
    })?;

    let tgz_path = scratch.path().join(format!("{app}-configball.tar.gz"));
    tokio::fs::write(&tgz_path, configball)
        .await
        .map_err(|e| Error::FileSystem(format!("failed to write temp tarball: {e}")))?;

    // the service user has to be able to traverse into the scratch dir
    set_mode(scratch.path(), 0o755)?;
    set_mode(&tgz_path, 0o644)?;

    // collect archives from previous deploys before extracting the new one
    let stale = stale_archives(target_path).await;

    expand_config_tar_as_user(executor, service_user, &tgz_path, target_path).await?;

    for name in stale {
        let path = target_path.join(&name);
        if let Err(e) = crate::exec::remove_file_as(executor, service_user, &path).await {
            warn!("could not remove stale archive {name}: {e}");
        }
    }
    Ok(())
}

async fn stale_archives(target_path: &Path) -> Vec<String> {
    let mut names = Vec::new();
    let Ok(mut dir) = tokio::fs::read_dir(target_path).await else {
        warn!("could not list files in targetPath={}", target_path.display());
        return names;
    };
    while let Ok(Some(entry)) = dir.next_entry().await {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.contains("config-app=") && name.ends_with(".tar.gz") {
            names.push(name);
        }
    }
    names
}

/// Normalize permissions after an extract: directories 0750, files 0640,
/// the control script (and legacy `*.sh` scripts) 0750, everything owned by
/// the service account.
pub async fn fixup_permissions(
    executor: &dyn Executor,
    user: &str,
    group: &str,
    target_path: &Path,
) -> Result<(), Error> {
    fixup_directory_permissions(executor, user, target_path).await?;
    fixup_file_permissions(executor, user, target_path).await?;
    fixup_control_permissions(executor, user, target_path).await?;
    fixup_legacy_script_permissions(executor, user, target_path).await?;
    fixup_ownership(executor, user, group, target_path).await?;
    Ok(())
}

pub(crate) fn set_mode(path: &Path, mode: u32) -> Result<(), Error> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(|e| Error::FileSystem(format!("failed to set permissions: {e}")))
}
