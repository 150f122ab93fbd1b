//! Instance discovery cache
//!
//! Host-package clusters usually leave their host lists out of the
//! topology; a background task refreshes a ClusterId -> instances mapping
//! from the instance inventory instead. Each instance advertises the
//! clusters it serves in an `app-control` metadata attribute.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::time::Duration;

use appctl::errors::Error;
use appctl::model::{ClusterId, Host, Topology};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{info, warn};

const REFRESH_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Deserialize)]
pub struct Instance {
    pub name: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

/// The `app-control` metadata attribute carried by each instance.
#[derive(Debug, Deserialize)]
pub struct AppControlMeta {
    pub clusters: Vec<ClusterId>,
}

#[async_trait]
pub trait InstanceSource: Send + Sync {
    async fn list_instances(&self, env: &str, region: &str) -> Result<Vec<Instance>, Error>;
}

/// Inventory service reached over HTTP.
pub struct HttpInstanceSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpInstanceSource {
    pub fn new(base_url: &str) -> Result<HttpInstanceSource, Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(HttpInstanceSource {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl InstanceSource for HttpInstanceSource {
    async fn list_instances(&self, env: &str, region: &str) -> Result<Vec<Instance>, Error> {
        let url = format!(
            "{}/instances?env={env}&region={region}",
            self.base_url
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Topology(format!("inventory fetch failed: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::Topology(format!(
                "inventory fetch failed with status {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| Error::Topology(format!("inventory response invalid: {e}")))
    }
}

/// ClusterId -> instances, refreshed in the background. Writers overlay new
/// entries without purging, so a partial refresh cannot empty the view.
#[derive(Default)]
pub struct DiscoveryCache {
    data: RwLock<HashMap<ClusterId, Vec<Instance>>>,
}

impl DiscoveryCache {
    pub fn new() -> DiscoveryCache {
        DiscoveryCache::default()
    }

    pub fn get(&self) -> HashMap<ClusterId, Vec<Instance>> {
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        data.clone()
    }

    pub fn set(&self, new_data: HashMap<ClusterId, Vec<Instance>>) {
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        for (key, value) in new_data {
            data.insert(key, value);
        }
    }
}

/// Refresh loop: scan every (env, region) pair referenced in the topology.
/// One failing pair leaves the other entries alone.
pub async fn run(
    topology: Topology,
    source: impl InstanceSource,
    cache: std::sync::Arc<DiscoveryCache>,
    mut shutdown: broadcast::Receiver<()>,
) {
    info!("discovery cache runner starting");
    let env_regions = env_regions(&topology);
    info!("envRegions covered in config={env_regions:?}");
    loop {
        for (env, region) in &env_regions {
            match source.list_instances(env, region).await {
                Ok(instances) => cache.set(index_instances(instances)),
                Err(e) => {
                    warn!("could not get app-control instances env={env} region={region}: {e}");
                }
            }
        }
        tokio::select! {
            _ = shutdown.recv() => {
                info!("discovery cache runner shutting down");
                return;
            }
            _ = tokio::time::sleep(REFRESH_INTERVAL) => {}
        }
    }
}

fn env_regions(topology: &Topology) -> HashSet<(String, String)> {
    let mut pairs = HashSet::new();
    for (env, environment) in topology {
        for cluster in &environment.clusters {
            pairs.insert((env.clone(), cluster.id.region.clone()));
        }
    }
    pairs
}

/// Index instances under every ClusterId listed in their app-control
/// attribute.
pub fn index_instances(instances: Vec<Instance>) -> HashMap<ClusterId, Vec<Instance>> {
    let mut indexed: HashMap<ClusterId, Vec<Instance>> = HashMap::new();
    for instance in instances {
        let Some(raw) = instance.attributes.get("app-control") else {
            continue;
        };
        let meta: AppControlMeta = match serde_json::from_str(raw) {
            Ok(meta) => meta,
            Err(e) => {
                warn!("metadata unmarshal failed on value={raw}: {e}");
                continue;
            }
        };
        for cluster_id in meta.clusters {
            indexed.entry(cluster_id).or_default().push(instance.clone());
        }
    }
    indexed
}

/// Instances become the cluster's host map; fqdn is the instance name under
/// the env's configured domain, canary comes from the instance label.
pub fn instances_to_host_list(instances: &[Instance], domain: &str) -> HashMap<String, Host> {
    let mut hosts = HashMap::new();
    for instance in instances {
        let canary = instance
            .labels
            .get("canary")
            .map(|value| value == "true")
            .unwrap_or(false);
        let fqdn = format!("{}.{domain}", instance.name);
        hosts.insert(fqdn, Host { canary });
    }
    hosts
}
