//! Control API endpoint tests

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use appctl::errors::Error;
use appctl::jobs::{Job, JobRequest};
use appctl::model::{Cluster, ClusterId, Environment, RuntimeKind};
use appctl::queue::JobQueue;
use appctl::store::{FsSecretStore, SecretStore};
use appctl_api::config::{AccessEntry, Config};
use appctl_api::discovery::DiscoveryCache;
use appctl_api::rbac::Permission;
use appctl_api::registry::ImageRegistry;
use appctl_api::server::{router, ApiState};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use base64::Engine;
use tower::ServiceExt;

struct MockQueue {
    jobs: Mutex<Vec<Job>>,
    fail: bool,
}

#[async_trait]
impl JobQueue for MockQueue {
    async fn enqueue(&self, job: &Job) -> Result<String, Error> {
        if self.fail {
            return Err(Error::Queue("publish failed: broker unavailable".into()));
        }
        self.jobs.lock().unwrap().push(job.clone());
        Ok("pub-1".to_string())
    }

    async fn dequeue(&self) -> Result<Option<Job>, Error> {
        Ok(self.jobs.lock().unwrap().pop())
    }
}

struct NoRegistry;

#[async_trait]
impl ImageRegistry for NoRegistry {
    async fn resolve_latest(&self, _image: &str) -> Result<String, Error> {
        Ok("unknown".to_string())
    }
}

fn jwt_for(email: &str) -> String {
    let b64 = |s: &str| base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(s);
    format!(
        "{}.{}.{}",
        b64(r#"{"alg":"HS256","typ":"JWT"}"#),
        b64(&format!(r#"{{"email":"{email}"}}"#)),
        b64("sig")
    )
}

fn cluster(app: &str, region: &str, variant: &str) -> Cluster {
    Cluster {
        id: ClusterId {
            app: app.to_string(),
            region: region.to_string(),
            variant: variant.to_string(),
        },
        runtime: RuntimeKind::HostPackage,
        kind: "online".to_string(),
        hosts: HashMap::new(),
        repo: "apt".to_string(),
    }
}

fn test_config() -> Config {
    let mut cfg = Config::default();
    cfg.topology.insert(
        "dev".to_string(),
        Environment {
            clusters: vec![cluster("arryved-api", "central", "default")],
        },
    );
    cfg.topology.insert(
        "prod".to_string(),
        Environment {
            clusters: vec![
                cluster("a", "east", "x"),
                cluster("a", "east", "y"),
                cluster("b", "east", "x"),
                cluster("a", "central", "x"),
            ],
        },
    );
    cfg.access_entries = vec![AccessEntry {
        permission: Permission::Deploy,
        target: "urn:app:arryved-api".to_string(),
        role: "engineering".to_string(),
    }];
    cfg.role_memberships.insert(
        "engineering".to_string(),
        vec!["eng@arryved.com".to_string()],
    );
    cfg.users_by_groups.insert(
        "eng@arryved.com".to_string(),
        vec!["urn:user:dev@arryved.com".to_string()],
    );
    cfg
}

fn state_with(cfg: Config, fail_queue: bool, secrets_dir: &std::path::Path) -> Arc<ApiState> {
    Arc::new(ApiState {
        cfg: Arc::new(cfg),
        queue: Arc::new(MockQueue {
            jobs: Mutex::new(Vec::new()),
            fail: fail_queue,
        }),
        secrets: Arc::new(FsSecretStore::new(secrets_dir)),
        discovery: Arc::new(DiscoveryCache::new()),
        registry: Arc::new(NoRegistry),
        agent_psk: "psk".to_string(),
    })
}

fn request(method: &str, uri: &str, token: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

const DEPLOY_BODY: &str = r#"{"concurrency":"1","version":"1.2.3","principal":"p"}"#;

#[tokio::test]
async fn test_deploy_requires_post() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(state_with(test_config(), false, dir.path()));
    let response = app
        .oneshot(request(
            "GET",
            "/deploy/dev/arryved-api/central/default",
            Some(&jwt_for("dev@arryved.com")),
            "",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_deploy_unauthenticated() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(state_with(test_config(), false, dir.path()));
    let response = app
        .oneshot(request(
            "POST",
            "/deploy/dev/arryved-api/central/default",
            None,
            DEPLOY_BODY,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_deploy_forbidden_for_strangers() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(state_with(test_config(), false, dir.path()));
    let response = app
        .oneshot(request(
            "POST",
            "/deploy/dev/arryved-api/central/default",
            Some(&jwt_for("stranger@arryved.com")),
            DEPLOY_BODY,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_deploy_unknown_cluster_is_404() {
    let mut cfg = test_config();
    cfg.access_entries[0].target = "*".to_string();
    let dir = tempfile::tempdir().unwrap();
    let app = router(state_with(cfg, false, dir.path()));
    let response = app
        .oneshot(request(
            "POST",
            "/deploy/dev/ghost-app/central/default",
            Some(&jwt_for("dev@arryved.com")),
            DEPLOY_BODY,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_deploy_wrong_arity_is_400() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(state_with(test_config(), false, dir.path()));
    let response = app
        .oneshot(request(
            "POST",
            "/deploy/dev/arryved-api",
            Some(&jwt_for("dev@arryved.com")),
            DEPLOY_BODY,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_deploy_enqueues_job() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_with(test_config(), false, dir.path());
    let app = router(state.clone());
    let response = app
        .oneshot(request(
            "POST",
            "/deploy/dev/arryved-api/central/default",
            Some(&jwt_for("dev@arryved.com")),
            DEPLOY_BODY,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["message"], "deploy job enqueued");
    let deploy_id = body["deployId"].as_str().unwrap();
    assert_eq!(uuid::Uuid::parse_str(deploy_id).unwrap().get_version_num(), 4);

    let job = state.queue.dequeue().await.unwrap().unwrap();
    match job.request {
        JobRequest::Deploy(request) => {
            assert_eq!(request.version, "1.2.3");
            assert_eq!(request.cluster.id.app, "arryved-api");
        }
        _ => panic!("wrong job variant"),
    }
}

#[tokio::test]
async fn test_deploy_queue_failure_is_500() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(state_with(test_config(), true, dir.path()));
    let response = app
        .oneshot(request(
            "POST",
            "/deploy/dev/arryved-api/central/default",
            Some(&jwt_for("dev@arryved.com")),
            DEPLOY_BODY,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_status_wildcard_selects_matching_clusters() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(state_with(test_config(), false, dir.path()));
    let response = app
        .oneshot(request(
            "GET",
            "/status/prod/any/east/any",
            Some(&jwt_for("dev@arryved.com")),
            "",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let list = body.as_array().unwrap();
    assert_eq!(list.len(), 3);
    for entry in list {
        assert_eq!(entry["id"]["region"], "east");
    }
}

#[tokio::test]
async fn test_status_unknown_cluster_is_404() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(state_with(test_config(), false, dir.path()));
    let response = app
        .oneshot(request(
            "GET",
            "/status/prod/ghost/east/x",
            Some(&jwt_for("dev@arryved.com")),
            "",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

fn secret_create_body(id: &str) -> String {
    let value = base64::engine::general_purpose::STANDARD.encode(b"hunter2");
    format!(r#"{{"id":"{id}","ownerGroup":"eng@arryved.com","value":"{value}"}}"#)
}

#[tokio::test]
async fn test_secret_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_with(test_config(), false, dir.path());
    let owner = jwt_for("dev@arryved.com");

    // create
    let response = router(state.clone())
        .oneshot(request(
            "POST",
            "/secrets/dev",
            Some(&owner),
            &secret_create_body("api-token"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["urn"], "urn:secret:api-token");
    assert_eq!(body["ownerUser"], "dev@arryved.com");

    // duplicate create conflicts
    let response = router(state.clone())
        .oneshot(request(
            "POST",
            "/secrets/dev",
            Some(&owner),
            &secret_create_body("api-token"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // read returns the b64 payload
    let response = router(state.clone())
        .oneshot(request("GET", "/secrets/dev/api-token", Some(&owner), ""))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(body.as_str().unwrap())
        .unwrap();
    assert_eq!(decoded, b"hunter2");

    // list shows the entry
    let response = router(state.clone())
        .oneshot(request("GET", "/secrets/dev", Some(&owner), ""))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body.as_array().unwrap().len(), 1);

    // a stranger may not mutate
    let value = base64::engine::general_purpose::STANDARD.encode(b"newval");
    let response = router(state.clone())
        .oneshot(request(
            "PATCH",
            "/secrets/dev/api-token",
            Some(&jwt_for("stranger@arryved.com")),
            &format!(r#"{{"value":"{value}"}}"#),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // the owner may
    let response = router(state.clone())
        .oneshot(request(
            "PATCH",
            "/secrets/dev/api-token",
            Some(&owner),
            &format!(r#"{{"value":"{value}"}}"#),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // and may delete
    let response = router(state.clone())
        .oneshot(request("DELETE", "/secrets/dev/api-token", Some(&owner), ""))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // further mutation 404s
    let response = router(state.clone())
        .oneshot(request("DELETE", "/secrets/dev/api-token", Some(&owner), ""))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_secret_env_must_exist() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(state_with(test_config(), false, dir.path()));
    let response = app
        .oneshot(request(
            "GET",
            "/secrets/staging",
            Some(&jwt_for("dev@arryved.com")),
            "",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_secret_put_is_method_not_allowed() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(state_with(test_config(), false, dir.path()));
    let response = app
        .oneshot(request(
            "PUT",
            "/secrets/dev/api-token",
            Some(&jwt_for("dev@arryved.com")),
            "",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}
