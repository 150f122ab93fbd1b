//! HTTP request handlers

use std::collections::HashMap;
use std::sync::Arc;

use appctl::model::Status;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::server::{deploy, ServerState};

/// Handler for /status: the full map app -> Status.
pub async fn status_handler(
    State(state): State<Arc<ServerState>>,
) -> Json<HashMap<String, Status>> {
    Json(state.status_cache.get_statuses())
}

#[derive(Debug, Deserialize)]
pub struct HealthzQuery {
    pub app: Option<String>,
}

/// Handler for /healthz?app=X: literal `OK` iff the app has probes and all
/// of them are healthy.
pub async fn healthz_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<HealthzQuery>,
) -> Response {
    let Some(app) = query.app else {
        let body = json!({"error": "No app query param provided"});
        warn!("healthz called without app param");
        return (StatusCode::NOT_FOUND, Json(body)).into_response();
    };

    let statuses = state.status_cache.get_statuses();
    let health = statuses
        .get(&app)
        .map(|status| status.health.clone())
        .unwrap_or_default();

    let up = !health.is_empty() && health.iter().all(|result| result.healthy);
    if up {
        (StatusCode::OK, "OK").into_response()
    } else {
        (StatusCode::BAD_REQUEST, "").into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct DeployQuery {
    pub app: Option<String>,
    pub version: Option<String>,
    /// sent by the worker; informational only on the agent side
    pub variant: Option<String>,
}

/// Handler for /deploy?app=X&version=V.
pub async fn deploy_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<DeployQuery>,
) -> Response {
    let (Some(app), Some(version)) = (query.app, query.version) else {
        return deploy::render(appctl::model::DeployResult {
            code: StatusCode::BAD_REQUEST.as_u16(),
            err: "Required query param missing, provide both app and version".to_string(),
            state: None,
        });
    };
    info!("call to /deploy app={app} version={version}");
    deploy::handle(state, app, version).await
}
