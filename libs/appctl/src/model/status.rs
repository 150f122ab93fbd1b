//! Per-app status as reported by host agents

use serde::{Deserialize, Serialize};

use crate::model::version::Version;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Status {
    pub versions: Versions,
    pub health: Vec<HealthResult>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Versions {
    #[serde(default)]
    pub config: i64,
    #[serde(default)]
    pub installed: Option<Version>,
    #[serde(default)]
    pub running: Option<Version>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResult {
    pub port: u16,
    pub healthy: bool,
    pub oor: bool,

    // service status is not known in this case;
    // the value of `healthy` doesn't mean anything
    // when this is true
    pub unknown: bool,
}
