//! Deploy record and the host agent's /deploy response body

use serde::{Deserialize, Serialize};

/// A single requested deploy on a host, keyed by app. Timestamps are unix
/// seconds; zero means the transition has not happened yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deploy {
    pub app: String,
    pub version: String,
    #[serde(rename = "requestedAt")]
    pub requested_at: i64,
    #[serde(rename = "startedAt", default)]
    pub started_at: i64,
    #[serde(rename = "completedAt", default)]
    pub completed_at: i64,
    #[serde(default)]
    pub err: Option<String>,
}

/// Response body for the host agent's /deploy endpoint; also parsed by the
/// worker when it fans out.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployResult {
    pub code: u16,
    #[serde(default)]
    pub err: String,
    #[serde(default)]
    pub state: Option<Deploy>,
}
