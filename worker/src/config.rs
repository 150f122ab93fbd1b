//! Worker configuration

use std::path::PathBuf;

use appctl::queue::QueueConfig;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const CONFIG_PATH_DEFAULT: &str = "/usr/local/etc/app-control-worker.yml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Number of long-lived worker loops
    pub max_job_threads: usize,

    /// Environment this worker deploys into
    pub env: String,

    /// How to reach app-controld on hosts
    pub agent_port: u16,
    pub agent_scheme: String,
    pub agent_psk_path: PathBuf,

    /// Per-host deploy deadline
    pub host_deploy_timeout_s: u64,

    /// Work queue being consumed
    pub queue: QueueConfig,

    /// Object store location holding configballs
    pub config_bucket: String,
    pub object_store_root: PathBuf,

    /// Kubeconfig for cluster-api deploys
    pub kube_config_path: PathBuf,

    /// Keep scratch dirs around for debugging
    pub keep_temp_dir: bool,

    /// Min log level
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_job_threads: 2,
            env: "dev".to_string(),
            agent_port: 1024,
            agent_scheme: "https".to_string(),
            agent_psk_path: PathBuf::from("./var/app-controld-psk"),
            host_deploy_timeout_s: 600,
            queue: QueueConfig::default(),
            config_bucket: "arryved-app-control-config".to_string(),
            object_store_root: PathBuf::from("/var/lib/app-control/objects"),
            kube_config_path: PathBuf::from("/root/.kube/config"),
            keep_temp_dir: false,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load the config from the provided path. A missing or malformed file
    /// warns and falls back to defaults.
    pub fn load(path: &str) -> Config {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                warn!("Could not load config file at path='{path}': {e}");
                return Config::default();
            }
        };
        match serde_yaml::from_str(&contents) {
            Ok(config) => config,
            Err(e) => {
                warn!("Could not parse config file at path='{path}': {e}");
                Config::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::load("/definitely/not/here.yml");
        assert_eq!(config.max_job_threads, 2);
        assert_eq!(config.host_deploy_timeout_s, 600);
        assert_eq!(config.agent_scheme, "https");
    }
}
