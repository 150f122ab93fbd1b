//! Compile a config tree from an expanded configball
//!
//! The tree layout is `config/defaults.yaml` plus optional
//! `config/env/<env>.yaml`, `config/region/<region>.yaml` and
//! `config/variant/<variant>.yaml`; the compiled document lands at
//! `<dir>/config.yaml`.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::appconfig::merge::multi_merge;
use crate::appconfig::schema::to_yaml_string;
use crate::errors::Error;
use crate::model::cluster::ClusterId;

fn read_layer(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(_) => {
            warn!("could not open file={}", path.display());
            String::new()
        }
    }
}

/// Compile the layered config for a cluster; returns the compiled file's
/// path. Only the defaults layer is mandatory.
pub fn compile(dir: &Path, env: &str, id: &ClusterId) -> Result<PathBuf, Error> {
    info!(
        "compiling config; config dir={} cluster=({},{env},{},{})",
        dir.display(),
        id.app,
        id.region,
        id.variant
    );

    let config_dir = dir.join("config");
    let default_yaml = read_layer(&config_dir.join("defaults.yaml"));
    let env_yaml = read_layer(&config_dir.join("env").join(format!("{env}.yaml")));
    let region_yaml = read_layer(&config_dir.join("region").join(format!("{}.yaml", id.region)));
    let variant_yaml =
        read_layer(&config_dir.join("variant").join(format!("{}.yaml", id.variant)));

    let compiled = multi_merge(&default_yaml, &env_yaml, &region_yaml, &variant_yaml)
        .map_err(|e| Error::Parse(format!("error during compiling config: {e}")))?;
    let compiled_yaml = to_yaml_string(&compiled)?;

    let output_path = dir.join("config.yaml");
    std::fs::write(&output_path, compiled_yaml.as_bytes())
        .map_err(|e| Error::FileSystem(format!("error writing config file: {e}")))?;
    debug!("wrote config file path={}", output_path.display());
    Ok(output_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster_id() -> ClusterId {
        ClusterId {
            app: "pay".to_string(),
            region: "central".to_string(),
            variant: "default".to_string(),
        }
    }

    fn write_tree(dir: &Path, defaults: Option<&str>, env: Option<&str>) {
        std::fs::create_dir_all(dir.join("config/env")).unwrap();
        std::fs::create_dir_all(dir.join("config/region")).unwrap();
        std::fs::create_dir_all(dir.join("config/variant")).unwrap();
        if let Some(defaults) = defaults {
            std::fs::write(dir.join("config/defaults.yaml"), defaults).unwrap();
        }
        if let Some(env) = env {
            std::fs::write(dir.join("config/env/dev.yaml"), env).unwrap();
        }
        std::fs::write(dir.join("config/region/central.yaml"), "region: config").unwrap();
        std::fs::write(dir.join("config/variant/default.yaml"), "variant: config").unwrap();
    }

    #[test]
    fn test_compile_successful() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path(), Some("default: config"), Some("env: config"));

        let path = compile(dir.path(), "dev", &cluster_id()).unwrap();
        assert_eq!(path, dir.path().join("config.yaml"));
        let compiled = std::fs::read_to_string(path).unwrap();
        assert!(compiled.contains("default: config"));
        assert!(compiled.contains("region: config"));
        assert!(compiled.contains("variant: config"));
    }

    #[test]
    fn test_compile_missing_defaults_fails() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path(), None, Some("env: config"));
        assert!(compile(dir.path(), "dev", &cluster_id()).is_err());
    }

    #[test]
    fn test_compile_missing_env_layer_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path(), Some("default: config"), None);
        assert!(compile(dir.path(), "dev", &cluster_id()).is_ok());
    }

    #[test]
    fn test_compile_empty_defaults_fails() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path(), Some(""), Some(""));
        assert!(compile(dir.path(), "dev", &cluster_id()).is_err());
    }

    #[test]
    fn test_compile_bad_defaults_fails() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path(), Some(": bad: yaml: ["), Some("env: config"));
        assert!(compile(dir.path(), "dev", &cluster_id()).is_err());
    }

    #[test]
    fn test_compile_conflicting_keys_take_highest_layer() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("config/env")).unwrap();
        std::fs::create_dir_all(dir.path().join("config/region")).unwrap();
        std::fs::create_dir_all(dir.path().join("config/variant")).unwrap();
        std::fs::write(dir.path().join("config/defaults.yaml"), "key: value1").unwrap();
        std::fs::write(dir.path().join("config/env/dev.yaml"), "key: value2").unwrap();
        std::fs::write(dir.path().join("config/region/central.yaml"), "key: value3").unwrap();
        std::fs::write(dir.path().join("config/variant/default.yaml"), "key: value4").unwrap();

        let path = compile(dir.path(), "dev", &cluster_id()).unwrap();
        let compiled = std::fs::read_to_string(path).unwrap();
        assert!(compiled.contains("key: value4"));
    }
}
