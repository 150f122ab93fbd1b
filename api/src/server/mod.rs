//! Control API HTTP surface

pub mod deploy;
pub mod secrets;
pub mod status;
pub mod validate;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use appctl::errors::Error;
use appctl::model::{Cluster, ClusterId, RuntimeKind};
use appctl::queue::JobQueue;
use appctl::server::tls::{serve_tls, server_config};
use appctl::server::HttpError;
use appctl::store::SecretStore;
use axum::http::Uri;
use axum::routing::any;
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::discovery::{instances_to_host_list, DiscoveryCache};
use crate::registry::ImageRegistry;

/// State shared across handlers
pub struct ApiState {
    pub cfg: Arc<Config>,
    pub queue: Arc<dyn JobQueue>,
    pub secrets: Arc<dyn SecretStore>,
    pub discovery: Arc<DiscoveryCache>,
    pub registry: Arc<dyn ImageRegistry>,
    pub agent_psk: String,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route(
            "/status/:env/:app/:region/:variant",
            any(status::status_handler),
        )
        .route(
            "/deploy/:env/:app/:region/:variant",
            any(deploy::deploy_handler),
        )
        .route("/secrets/:env", any(secrets::secrets_env_handler))
        .route("/secrets/:env/:id", any(secrets::secrets_id_handler))
        .fallback(fallback_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Wrong-arity paths: deploy and secrets are explicit about malformed
/// requests, everything else is simply not found.
async fn fallback_handler(uri: Uri) -> HttpError {
    let path = uri.path();
    if path.starts_with("/deploy") || path.starts_with("/secrets") {
        HttpError::bad_request(format!("invalid request path: {path}"))
    } else {
        HttpError::not_found(format!("invalid request path: {path}"))
    }
}

/// Find a cluster in the topology; host-package clusters with empty host
/// lists get their hosts overlaid from the discovery cache.
pub fn find_cluster_by_id(
    cfg: &Config,
    discovery: &DiscoveryCache,
    env: &str,
    id: &ClusterId,
) -> Option<Cluster> {
    let environment = cfg.topology.get(env)?;
    for cluster in &environment.clusters {
        if &cluster.id != id {
            continue;
        }
        info!("found target ID {id}");
        let mut cluster = cluster.clone();
        if cluster.runtime == RuntimeKind::HostPackage && cluster.hosts.is_empty() {
            let instances = discovery.get().remove(id).unwrap_or_default();
            let domain = cfg.domains.get(env).cloned().unwrap_or_default();
            cluster.hosts = instances_to_host_list(&instances, &domain);
        }
        return Some(cluster);
    }
    None
}

/// Serve the control API over HTTPS until the shutdown future resolves.
pub async fn serve(
    cfg: &Config,
    state: Arc<ApiState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), Error> {
    let tls = server_config(&cfg.crt_path, &cfg.key_path, &cfg.tls)?;
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    serve_tls(addr, router(state), tls, shutdown).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::Instance;
    use appctl::model::{Environment, Host};
    use std::collections::HashMap;

    fn cluster(app: &str, runtime: RuntimeKind) -> Cluster {
        Cluster {
            id: ClusterId {
                app: app.to_string(),
                region: "central".to_string(),
                variant: "default".to_string(),
            },
            runtime,
            kind: "online".to_string(),
            hosts: HashMap::new(),
            repo: String::new(),
        }
    }

    #[test]
    fn test_find_cluster_overlays_discovered_hosts() {
        let mut cfg = Config::default();
        cfg.domains
            .insert("dev".to_string(), "dev.arryved.com".to_string());
        cfg.topology.insert(
            "dev".to_string(),
            Environment {
                clusters: vec![cluster("arryved-api", RuntimeKind::HostPackage)],
            },
        );

        let discovery = DiscoveryCache::new();
        let id = ClusterId {
            app: "arryved-api".to_string(),
            region: "central".to_string(),
            variant: "default".to_string(),
        };
        discovery.set(HashMap::from([(
            id.clone(),
            vec![Instance {
                name: "api-1".to_string(),
                labels: HashMap::new(),
                attributes: HashMap::new(),
            }],
        )]));

        let found = find_cluster_by_id(&cfg, &discovery, "dev", &id).unwrap();
        assert!(found.hosts.contains_key("api-1.dev.arryved.com"));
    }

    #[test]
    fn test_find_cluster_keeps_configured_hosts() {
        let mut cfg = Config::default();
        let mut configured = cluster("arryved-api", RuntimeKind::HostPackage);
        configured
            .hosts
            .insert("static.dev.arryved.com".to_string(), Host::default());
        cfg.topology.insert(
            "dev".to_string(),
            Environment {
                clusters: vec![configured],
            },
        );

        let discovery = DiscoveryCache::new();
        let id = ClusterId {
            app: "arryved-api".to_string(),
            region: "central".to_string(),
            variant: "default".to_string(),
        };
        let found = find_cluster_by_id(&cfg, &discovery, "dev", &id).unwrap();
        assert!(found.hosts.contains_key("static.dev.arryved.com"));
    }

    #[test]
    fn test_find_cluster_misses() {
        let cfg = Config::default();
        let discovery = DiscoveryCache::new();
        let id = ClusterId {
            app: "ghost".to_string(),
            region: "central".to_string(),
            variant: "default".to_string(),
        };
        assert!(find_cluster_by_id(&cfg, &discovery, "dev", &id).is_none());
    }
}
