//! Agent configuration

use std::collections::HashMap;
use std::path::PathBuf;

use appctl::model::cluster::{default_variant, ClusterId, Kind};
use appctl::server::TlsSettings;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const CONFIG_PATH_DEFAULT: &str = "/usr/local/etc/app-controld.yml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Port for the HTTPS API listener
    pub port: u16,

    /// HTTPS timeouts
    pub read_timeout_s: u64,
    pub write_timeout_s: u64,

    /// TLS material locations
    pub key_path: PathBuf,
    pub crt_path: PathBuf,
    pub tls: TlsSettings,

    /// Pre-shared key accepted from the control plane
    pub psk_path: PathBuf,

    /// APT binary path
    pub apt_path: String,

    /// Environment this host belongs to (selects the env config layer)
    pub env: String,

    /// Service account that owns app roots
    pub service_user: String,
    pub service_group: String,

    /// Object store location holding configballs
    pub config_bucket: String,
    pub object_store_root: PathBuf,

    /// Secret store location for file materialization
    pub secret_store_root: PathBuf,

    /// Known apps
    pub app_defs: HashMap<String, AppDef>,

    /// Min log level
    pub log_level: String,

    /// Status polling pause interval
    pub poll_interval_s: u64,

    /// Deploy runner pause interval
    pub deploy_interval_s: u64,

    /// How long /deploy waits for installed/running to match the request
    pub converge_timeout_s: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 1024,
            read_timeout_s: 10,
            write_timeout_s: 10,
            key_path: PathBuf::from("./var/service.key"),
            crt_path: PathBuf::from("./var/service.crt"),
            tls: TlsSettings::default(),
            psk_path: PathBuf::from("./var/app-controld-psk"),
            apt_path: "/usr/bin/apt".to_string(),
            env: "dev".to_string(),
            service_user: "arryved".to_string(),
            service_group: "arryved".to_string(),
            config_bucket: "arryved-app-control-config".to_string(),
            object_store_root: PathBuf::from("/var/lib/app-control/objects"),
            secret_store_root: PathBuf::from("/var/lib/app-control/secrets"),
            app_defs: HashMap::new(),
            log_level: "info".to_string(),
            poll_interval_s: 5,
            deploy_interval_s: 5,
            converge_timeout_s: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppDef {
    /// Kind of app; health probes only run for online apps
    pub kind: Kind,

    /// Install root for the app
    pub app_root: PathBuf,

    /// Systemd unit name; defaults to the app/package name
    #[serde(default)]
    pub service: Option<String>,

    /// Healthz checks for the app
    #[serde(default)]
    pub healthz: Vec<ProbeSpec>,

    /// Varz check; used to get the running version
    #[serde(default)]
    pub varz: Option<ProbeSpec>,

    /// Cluster this host serves the app for
    #[serde(default = "unknown_cluster")]
    pub cluster: ClusterId,
}

fn unknown_cluster() -> ClusterId {
    ClusterId {
        app: String::new(),
        region: String::new(),
        variant: default_variant(),
    }
}

impl AppDef {
    pub fn service_unit(&self, app: &str) -> String {
        self.service.clone().unwrap_or_else(|| app.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeSpec {
    /// Port number to check
    pub port: u16,

    /// Whether or not to negotiate TLS
    #[serde(default)]
    pub tls: bool,
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
    fn test_defaults_applied() {
        let config = Config::load("/definitely/not/here.yml");
        assert_eq!(config.port, 1024);
        assert_eq!(config.apt_path, "/usr/bin/apt");
        assert_eq!(config.poll_interval_s, 5);
    }

    #[test]
    fn test_parse_app_defs() {
        let yaml = r#"
port: 2048
appDefs:
  arryved-api:
    kind: online
    appRoot: /opt/arryved-api
    healthz:
      - port: 8080
    varz:
      port: 8081
      tls: true
    cluster:
      app: arryved-api
      region: central
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.port, 2048);
        let def = &config.app_defs["arryved-api"];
        assert_eq!(def.kind, Kind::Online);
        assert_eq!(def.healthz.len(), 1);
        assert!(def.varz.as_ref().unwrap().tls);
        assert_eq!(def.cluster.variant, "default");
        assert_eq!(def.service_unit("arryved-api"), "arryved-api");
    }
}
