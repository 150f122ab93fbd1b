//! Cluster status endpoint
//!
//! GET /status/{env}/{app|any}/{region|any}/{variant|any}. Host-package
//! clusters are probed agent-by-agent, concurrently; cluster-api clusters
//! are synthesized from pod state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use appctl::errors::Error;
use appctl::model::{
    Cluster, ClusterId, HealthResult, RuntimeKind, Status, Version, Versions,
};
use appctl::server::HttpError;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::future::join_all;
use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;
use kube::Api;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::authn::authenticate;
use crate::registry::ImageRegistry;
use crate::server::{find_cluster_by_id, ApiState};

#[derive(Debug, Serialize, Deserialize)]
pub struct ClusterAttributes {
    pub canaries: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClusterStatus {
    pub id: ClusterId,
    #[serde(rename = "hostStatuses")]
    pub host_statuses: HashMap<String, Option<Status>>,
    pub attributes: ClusterAttributes,
}

pub async fn status_handler(
    State(state): State<Arc<ApiState>>,
    Path((env, app, region, variant)): Path<(String, String, String, String)>,
    method: Method,
    headers: HeaderMap,
) -> Result<Response, HttpError> {
    if method != Method::GET {
        return Err(HttpError::method_not_allowed(format!(
            "{method} not allowed for this endpoint"
        )));
    }
    authenticate(&state.cfg, &headers)
        .map_err(|_| HttpError::unauthorized("user not authenticated"))?;

    // wildcards expand against the topology
    if app == "any" || region == "any" || variant == "any" {
        let mut cluster_statuses = Vec::new();
        let clusters = state
            .cfg
            .topology
            .get(&env)
            .map(|environment| environment.clusters.clone())
            .unwrap_or_default();
        for cluster in clusters {
            let id = &cluster.id;
            let matches = (app == id.app || app == "any")
                && (region == id.region || region == "any")
                && (variant == id.variant || variant == "any");
            if !matches {
                continue;
            }
            let status = get_cluster_status(&state, &env, id.clone()).await?;
            cluster_statuses.push(status);
        }
        return Ok(Json(cluster_statuses).into_response());
    }

    let cluster_status = get_cluster_status(
        &state,
        &env,
        ClusterId {
            app,
            region,
            variant,
        },
    )
    .await?;
    Ok(Json(cluster_status).into_response())
}

pub async fn get_cluster_status(
    state: &ApiState,
    env: &str,
    cluster_id: ClusterId,
) -> Result<ClusterStatus, Error> {
    let cluster = find_cluster_by_id(&state.cfg, &state.discovery, env, &cluster_id)
        .ok_or_else(|| {
            Error::Topology(format!(
                "no cluster found for id={cluster_id} in env={env}"
            ))
        })?;

    match cluster.runtime {
        RuntimeKind::HostPackage => get_cluster_status_hosts(state, &cluster).await,
        RuntimeKind::ClusterApi => get_cluster_status_pods(state, &cluster).await,
        other => Err(Error::Unsupported(format!(
            "unsupported cluster runtime {other}"
        ))),
    }
}

/// One concurrent /status probe per host; hosts that fail to answer map to
/// null in the response.
async fn get_cluster_status_hosts(
    state: &ApiState,
    cluster: &Cluster,
) -> Result<ClusterStatus, Error> {
    let app = &cluster.id.app;
    debug!("{} hosts found for app={app}", cluster.hosts.len());

    let probes = cluster.hosts.keys().map(|host| {
        let host = host.clone();
        let app = app.clone();
        let scheme = state.cfg.agent_scheme.clone();
        let port = state.cfg.agent_port;
        let psk = state.agent_psk.clone();
        let timeout_s = state.cfg.read_timeout_s;
        async move {
            let status = get_host_status(&scheme, &host, port, &psk, timeout_s, &app).await;
            (host, status)
        }
    });

    let mut host_statuses = HashMap::new();
    let mut canaries = Vec::new();
    for (host, status) in join_all(probes).await {
        if cluster.hosts.get(&host).map(|h| h.canary).unwrap_or(false) {
            canaries.push(host.clone());
        }
        host_statuses.insert(host, status);
    }

    Ok(ClusterStatus {
        id: cluster.id.clone(),
        host_statuses,
        attributes: ClusterAttributes { canaries },
    })
}

/// Probe a single agent for one app's status. Failures are logged and
/// yield None.
async fn get_host_status(
    scheme: &str,
    host: &str,
    port: u16,
    psk: &str,
    timeout_s: u64,
    app: &str,
) -> Option<Status> {
    // agents present fleet-internal certificates, so verification is off;
    // the PSK carries the trust
    let client = reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .timeout(Duration::from_secs(timeout_s.max(2)))
        .build()
        .ok()?;

    let url = format!("{scheme}://{host}:{port}/status");
    let response = client
        .get(&url)
        .bearer_auth(psk)
        .send()
        .await
        .map_err(|e| warn!("no status retrieved for host={host}: {e}"))
        .ok()?;
    let statuses: HashMap<String, Status> = response
        .json()
        .await
        .map_err(|e| warn!("bad status body from host={host}: {e}"))
        .ok()?;
    statuses.get(app).cloned()
}

/// Synthesize host statuses from pod container state; `latest` image tags
/// resolve through the registry boundary.
async fn get_cluster_status_pods(
    state: &ApiState,
    cluster: &Cluster,
) -> Result<ClusterStatus, Error> {
    let client = create_kube_client(&state.cfg.kube_config_path).await?;
    let pods: Api<Pod> = Api::all(client);
    let params = ListParams::default().labels(&format!("app={}", cluster.id.app));
    let pod_list = pods
        .list(&params)
        .await
        .map_err(|e| Error::ClusterApi(format!("pod list failed: {e}")))?;
    debug!("{} pods found", pod_list.items.len());

    let mut cluster_status = ClusterStatus {
        id: cluster.id.clone(),
        host_statuses: HashMap::new(),
        attributes: ClusterAttributes {
            canaries: Vec::new(),
        },
    };

    for pod in pod_list.items {
        let pod_name = pod.metadata.name.clone().unwrap_or_default();
        let pod_status = pod.status.unwrap_or_default();

        // convention is one container per pod for deployables
        let container = pod_status
            .container_statuses
            .as_ref()
            .and_then(|statuses| statuses.first());
        let (image, ready) = match container {
            Some(container) => (container.image.clone(), container.ready),
            None => (String::new(), false),
        };
        let ports: Vec<i32> = pod
            .spec
            .as_ref()
            .and_then(|spec| spec.containers.first())
            .and_then(|container| container.ports.clone())
            .unwrap_or_default()
            .iter()
            .map(|port| port.container_port)
            .collect();

        let version_text = image_version(&image, state.registry.as_ref()).await;
        let version = Version::parse(&version_text).unwrap_or_else(|e| {
            warn!("could not parse version string {version_text}: {e}");
            Version::default()
        });

        let health = ports
            .iter()
            .map(|&port| HealthResult {
                port: port as u16,
                healthy: ready,
                // rotation is handled by the service object on this runtime
                oor: false,
                unknown: false,
            })
            .collect();

        info!(
            "app={} pod={pod_name} version={version_text} ready={ready} ports={ports:?}",
            cluster.id.app
        );
        cluster_status.host_statuses.insert(
            pod_name,
            Some(Status {
                versions: Versions {
                    config: 0,
                    installed: Some(version),
                    running: Some(version),
                },
                health,
            }),
        );
    }
    Ok(cluster_status)
}

/// Tag from an image uri; `latest` resolves through the registry.
pub async fn image_version(image: &str, registry: &dyn ImageRegistry) -> String {
    let last = image.rsplit('/').next().unwrap_or(image);
    let version = match last.split_once(':') {
        Some((_, tag)) => tag.to_string(),
        None => "latest".to_string(),
    };
    if version != "latest" {
        return version;
    }
    match registry.resolve_latest(image).await {
        Ok(resolved) => resolved,
        Err(e) => {
            warn!("could not resolve :latest for image={image}: {e}");
            "latest".to_string()
        }
    }
}

pub async fn create_kube_client(path: &std::path::Path) -> Result<kube::Client, Error> {
    let kubeconfig = kube::config::Kubeconfig::read_from(path)
        .map_err(|e| Error::ClusterApi(format!("kubeconfig read failed: {e}")))?;
    let config = kube::Config::from_custom_kubeconfig(
        kubeconfig,
        &kube::config::KubeConfigOptions::default(),
    )
    .await
    .map_err(|e| Error::ClusterApi(format!("kubeconfig build failed: {e}")))?;
    kube::Client::try_from(config).map_err(|e| Error::ClusterApi(format!("kube client: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedRegistry(&'static str);

    #[async_trait::async_trait]
    impl ImageRegistry for FixedRegistry {
        async fn resolve_latest(&self, _image: &str) -> Result<String, Error> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn test_pinned_tag_passes_through() {
        let registry = FixedRegistry("9.9.9");
        let version = image_version("reg.example.com/project/repo/app:1.2.3", &registry).await;
        assert_eq!(version, "1.2.3");
    }

    #[tokio::test]
    async fn test_latest_resolves_through_registry() {
        let registry = FixedRegistry("1.4.0");
        let version = image_version("reg.example.com/project/repo/app:latest", &registry).await;
        assert_eq!(version, "1.4.0");
        let version = image_version("reg.example.com/project/repo/app", &registry).await;
        assert_eq!(version, "1.4.0");
    }
}
