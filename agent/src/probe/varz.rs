//! Varz probe client
//!
//! Apps report their own running version at /varz; the poller parses it the
//! same way as installed versions.

use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::config::ProbeSpec;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VarzResult {
    #[serde(rename = "server.info", default)]
    pub server_info: ServerInfo,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub githash: String,

    /// type is basically an app variant
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// Check a varz port; failures yield an empty result.
pub async fn check(spec: &ProbeSpec) -> VarzResult {
    let scheme = if spec.tls { "https" } else { "http" };
    let client = match reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .timeout(Duration::from_secs(2))
        .build()
    {
        Ok(client) => client,
        Err(_) => return VarzResult::default(),
    };

    let url = format!("{scheme}://localhost:{}/varz", spec.port);
    let response = match client.get(&url).send().await {
        Ok(response) => response,
        Err(e) => {
            warn!("Could not retrieve varz from url={url}, error={e}");
            return VarzResult::default();
        }
    };
    match response.json().await {
        Ok(result) => result,
        Err(e) => {
            warn!("Could not parse varz body from url={url}, error={e}");
            VarzResult::default()
        }
    }
}
