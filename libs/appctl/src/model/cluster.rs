//! Cluster identity and topology

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies a deployable unit. Variant defaults to the literal token
/// `default` when absent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterId {
    pub app: String,
    pub region: String,
    #[serde(default = "default_variant")]
    pub variant: String,
}

pub fn default_variant() -> String {
    "default".to_string()
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.app, self.region, self.variant)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub id: ClusterId,
    pub runtime: RuntimeKind,
    #[serde(default)]
    pub kind: String,
    /// Empty for cluster-api clusters; populated from the discovery cache
    /// for host-package clusters.
    #[serde(default)]
    pub hosts: HashMap<String, Host>,
    #[serde(default)]
    pub repo: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Host {
    #[serde(default)]
    pub canary: bool,
}

/// Mapping env -> clusters
pub type Topology = HashMap<String, Environment>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Environment {
    #[serde(default)]
    pub clusters: Vec<Cluster>,
}

/// App kind, a closed enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Online,
    Internal,
    Batch,
    Cron,
    App,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = match self {
            Kind::Online => "online",
            Kind::Internal => "internal",
            Kind::Batch => "batch",
            Kind::Cron => "cron",
            Kind::App => "app",
        };
        write!(f, "{token}")
    }
}

/// Where a cluster's workload runs. Only the first two drive the deploy
/// pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuntimeKind {
    HostPackage,
    ClusterApi,
    Function,
    Mobile,
    Lib,
    Desktop,
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = match self {
            RuntimeKind::HostPackage => "host-package",
            RuntimeKind::ClusterApi => "cluster-api",
            RuntimeKind::Function => "function",
            RuntimeKind::Mobile => "mobile",
            RuntimeKind::Lib => "lib",
            RuntimeKind::Desktop => "desktop",
        };
        write!(f, "{token}")
    }
}

/// Artifact repository type. `gce` and `gke` are legacy synonyms kept for
/// configs that predate the rename.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoType {
    #[serde(alias = "gce")]
    Apt,
    #[serde(alias = "gke")]
    Container,
    Mvn,
    Pypi,
}
