//! Config compile and file materialization
//!
//! After an extract, the layered configuration under `.arryved/config/` is
//! compiled into `<app-root>/config.yaml`, and entries under the compiled
//! `files` subtree are written out (inline content, or a secret payload for
//! `${urn:secret:ID}` templates).

use std::path::Path;

use appctl::appconfig::{multi_merge, parse_yaml, to_yaml_string, ConfigValue};
use appctl::errors::Error;
use appctl::model::ClusterId;
use appctl::store::SecretStore;
use regex::Regex;
use tracing::{info, warn};

use crate::deploy::configball::set_mode;
use crate::exec::{copy_dir_recurse, copy_file_as, Executor};

fn read_layer(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            info!("no config layer at {}: {e}", path.display());
            String::new()
        }
    }
}

/// Compile the four layers for this host's (env, cluster) and install the
/// result as `<app-root>/config.yaml` (0640, service group).
pub async fn write_compiled_config(
    executor: &dyn Executor,
    service_user: &str,
    env: &str,
    cluster_id: &ClusterId,
    target_path: &Path,
) -> Result<(), Error> {
    let config_dir = target_path.join(".arryved/config");
    let default_yaml = read_layer(&config_dir.join("defaults.yaml"));
    let env_yaml = read_layer(&config_dir.join("env").join(format!("{env}.yaml")));
    let region_yaml = read_layer(
        &config_dir
            .join("region")
            .join(format!("{}.yaml", cluster_id.region)),
    );
    let variant_yaml = read_layer(
        &config_dir
            .join("variant")
            .join(format!("{}.yaml", cluster_id.variant)),
    );

    let compiled = multi_merge(&default_yaml, &env_yaml, &region_yaml, &variant_yaml)?;
    let compiled_yaml = to_yaml_string(&compiled)?;

    let scratch = tempfile::tempdir()
        .map_err(|e| Error::FileSystem(format!("failed to create temp directory: {e}")))?;
    let tmp_config = scratch.path().join("config.yaml");
    tokio::fs::write(&tmp_config, compiled_yaml.as_bytes())
        .await
        .map_err(|e| Error::FileSystem(format!("failed to write compiled config: {e}")))?;
    set_mode(scratch.path(), 0o755)?;
    set_mode(&tmp_config, 0o644)?;

    copy_file_as(executor, service_user, &tmp_config, &target_path.join("config.yaml")).await
}

/// Materialize the `files` subtree of the compiled config. Each entry's
/// value is either inline content or a single `${urn:secret:ID}` template;
/// secret fetch/write failures leave the extract incomplete but do not fail
/// the deploy step.
pub async fn materialize_files(
    executor: &dyn Executor,
    secrets: &dyn SecretStore,
    service_user: &str,
    target_path: &Path,
) -> Result<(), Error> {
    let config_path = target_path.join("config.yaml");
    let yaml = std::fs::read_to_string(&config_path)
        .map_err(|e| Error::FileSystem(format!("cannot read {}: {e}", config_path.display())))?;
    let app_config = parse_yaml(&yaml)?;

    let files = match app_config.other.get("files").and_then(ConfigValue::as_map) {
        Some(files) => files.clone(),
        None => return Ok(()),
    };

    let scratch = tempfile::tempdir()
        .map_err(|e| Error::FileSystem(format!("failed to create temp directory: {e}")))?;
    set_mode(scratch.path(), 0o750)?;

    let secret_matcher = Regex::new(r"\$\{urn:secret:([A-Za-z0-9_-]+)\}").expect("static regex");
    for (relative_path, value) in files {
        let Some(content) = value.as_str() else {
            warn!("files entry {relative_path} is not a string, skipping");
            continue;
        };
        let out_path = scratch.path().join(&relative_path);

        let bytes = match secret_matcher.captures(content) {
            Some(captures) => {
                let secret_id = &captures[1];
                match secrets.read(secret_id).await {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!("failed to fetch secretId={secret_id}, files extract is incomplete: {e}");
                        continue;
                    }
                }
            }
            None => content.as_bytes().to_vec(),
        };

        if let Err(e) = write_file(&out_path, &bytes) {
            warn!(
                "failed to write file={}, files extract is incomplete: {e}",
                out_path.display()
            );
            continue;
        }
        info!("materialized path={relative_path}");
    }

    // the service user copies everything into the app root, dotfiles included
    copy_dir_recurse(executor, service_user, scratch.path(), target_path).await
}

fn write_file(path: &Path, data: &[u8]) -> Result<(), Error> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::FileSystem(format!("failed to create directories: {e}")))?;
    }
    std::fs::write(path, data)
        .map_err(|e| Error::FileSystem(format!("failed to write to file: {e}")))?;
    set_mode(path, 0o640)
}
