//! Deploy endpoint
//!
//! POST /deploy/{env}/{app}/{region}/{variant} validates the caller and the
//! target cluster, then enqueues a DEPLOY job for the worker pool.

use std::sync::Arc;

use appctl::jobs::{DeployJobRequest, Job, JobRequest};
use appctl::server::HttpError;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::authn::{authenticate, principal_urn};
use crate::rbac::{authorized, Permission};
use crate::server::{find_cluster_by_id, ApiState};

#[derive(Debug, Deserialize)]
pub struct DeployRequest {
    pub concurrency: String,
    pub principal: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct DeployResponse {
    /// deployId (blank if not available)
    #[serde(rename = "deployId")]
    pub deploy_id: String,
    /// message is either of success or failure
    pub message: String,
}

pub async fn deploy_handler(
    State(state): State<Arc<ApiState>>,
    Path((env, app, region, variant)): Path<(String, String, String, String)>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, HttpError> {
    if method != Method::POST {
        return Err(HttpError::method_not_allowed(format!(
            "{method} not allowed for this endpoint"
        )));
    }

    // user authenticated?
    let claims = authenticate(&state.cfg, &headers)
        .map_err(|_| HttpError::unauthorized("user not authenticated"))?;
    debug!("claims={claims:?}");

    let request_body: DeployRequest = serde_json::from_slice(&body)
        .map_err(|_| HttpError::bad_request("invalid request body"))?;

    // user authorized for the action on this target?
    let principal = principal_urn(&claims.principal_email());
    let app_urn = format!("urn:app:{app}");
    authorized(
        &state.cfg,
        state.secrets.as_ref(),
        &principal,
        Permission::Deploy,
        &app_urn,
    )
    .await
    .map_err(|_| HttpError::forbidden("user not authorized for deploy action"))?;
    debug!("authorization granted for principal={principal} action=deploy app={app_urn}");

    // if no such cluster, 404
    let cluster_id = appctl::model::ClusterId {
        app,
        region,
        variant,
    };
    let cluster = find_cluster_by_id(&state.cfg, &state.discovery, &env, &cluster_id)
        .ok_or_else(|| {
            HttpError::not_found(format!("no such cluster matching id={cluster_id}"))
        })?;

    // enqueue the job for worker pickup
    let job = Job::new(
        &request_body.principal,
        JobRequest::Deploy(DeployJobRequest {
            cluster,
            concurrency: request_body.concurrency,
            version: request_body.version,
        }),
    );
    let publish_id = state.queue.enqueue(&job).await.map_err(|e| {
        error!("error enqueueing deploy job: {e}");
        HttpError::internal(format!("error enqueueing deploy job: {e}"))
    })?;
    info!("enqueued job jobid={} pubid={publish_id}", job.id);

    let response = DeployResponse {
        deploy_id: job.id,
        message: "deploy job enqueued".to_string(),
    };
    Ok(Json(response).into_response())
}
