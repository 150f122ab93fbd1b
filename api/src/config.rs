//! Control API configuration

use std::collections::HashMap;
use std::path::PathBuf;

use appctl::model::Topology;
use appctl::queue::QueueConfig;
use appctl::server::TlsSettings;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::rbac::{GroupUrn, Permission, PrincipalUrn, Role};

pub const CONFIG_PATH_DEFAULT: &str = "/usr/local/etc/app-control-api.yml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Port, scheme and PSK used to reach app-controld on hosts
    pub agent_port: u16,
    pub agent_scheme: String,
    pub agent_psk_path: PathBuf,

    /// Port for the HTTPS API listener
    pub port: u16,

    /// HTTPS timeouts
    pub read_timeout_s: u64,
    pub write_timeout_s: u64,

    /// TLS material locations
    pub key_path: PathBuf,
    pub crt_path: PathBuf,
    pub tls: TlsSettings,

    /// Min log level
    pub log_level: String,

    /// Authentication / authorization switches
    pub authn_enabled: bool,
    pub rbac_enabled: bool,

    /// Layout of the app clusters
    pub topology: Topology,

    /// Host fqdn domain per env
    pub domains: HashMap<String, String>,

    /// Static permission table
    pub access_entries: Vec<AccessEntry>,
    pub role_memberships: HashMap<Role, Vec<GroupUrn>>,
    pub users_by_groups: HashMap<GroupUrn, Vec<PrincipalUrn>>,

    /// Work queue used to hand jobs to the worker pool
    pub queue: QueueConfig,

    /// Instance inventory endpoint feeding the discovery cache
    pub inventory_url: String,

    /// Secret store location
    pub secret_store_root: PathBuf,

    /// Kubeconfig used for cluster-api status reads
    pub kube_config_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessEntry {
    pub permission: Permission,
    pub target: String,
    pub role: Role,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            agent_port: 1024,
            agent_scheme: "https".to_string(),
            agent_psk_path: PathBuf::from("./var/app-controld-psk"),
            port: 1026,
            read_timeout_s: 10,
            write_timeout_s: 10,
            key_path: PathBuf::from("./var/service.key"),
            crt_path: PathBuf::from("./var/service.crt"),
            tls: TlsSettings::default(),
            log_level: "info".to_string(),
            authn_enabled: true,
            rbac_enabled: true,
            topology: Topology::default(),
            domains: HashMap::new(),
            access_entries: Vec::new(),
            role_memberships: HashMap::new(),
            users_by_groups: HashMap::new(),
            queue: QueueConfig::default(),
            inventory_url: String::new(),
            secret_store_root: PathBuf::from("/var/lib/app-control/secrets"),
            kube_config_path: PathBuf::from("/root/.kube/config"),
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

    /// Envs this instance serves, straight from the topology.
    pub fn envs(&self) -> Vec<String> {
        self.topology.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use appctl::model::RuntimeKind;

    #[test]
    fn test_topology_parses() {
        let yaml = r#"
topology:
  dev:
    clusters:
      - id:
          app: arryved-api
          region: central
        runtime: host-package
        kind: online
        hosts:
          h1.dev.arryved.com: {}
          h2.dev.arryved.com:
            canary: true
accessEntries:
  - permission: deploy
    target: "urn:app:arryved-api"
    role: engineering
roleMemberships:
  engineering:
    - eng@arryved.com
usersByGroups:
  eng@arryved.com:
    - urn:user:dev@arryved.com
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let clusters = &config.topology["dev"].clusters;
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].runtime, RuntimeKind::HostPackage);
        assert_eq!(clusters[0].id.variant, "default");
        assert!(clusters[0].hosts["h2.dev.arryved.com"].canary);
        assert_eq!(config.access_entries[0].permission, Permission::Deploy);
        assert_eq!(config.envs(), vec!["dev".to_string()]);
    }
}
