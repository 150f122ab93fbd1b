//! Secrets endpoints
//!
//! List/read/create/update/delete against the secret store. The permission
//! is selected from (method, path arity); mutations are owner-gated by the
//! secret authorizer.

use std::sync::Arc;

use appctl::errors::Error;
use appctl::server::HttpError;
use appctl::store::{secret_urn, SecretEntry};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::Engine;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::authn::{authenticate, principal_urn, Claims};
use crate::rbac::{authorized, Permission};
use crate::server::ApiState;

/// Body format for a secret request
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SecretRequest {
    /// a secret name matching `^[a-zA-Z0-9-_]+$`; 254 byte max length
    pub id: String,
    /// just the plain email address
    pub owner_group: String,
    /// just the plain email address
    pub owner_user: String,
    /// b64-encoded bytes in a json string; decoded size limit is 64k
    pub value: String,
}

pub async fn secrets_env_handler(
    State(state): State<Arc<ApiState>>,
    Path(env): Path<String>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, HttpError> {
    let action = if method == Method::GET {
        Permission::SecretsList
    } else if method == Method::POST {
        Permission::SecretsCreate
    } else {
        return Err(HttpError::method_not_allowed(format!(
            "{method} and/or uri not valid for this endpoint"
        )));
    };
    let claims = begin(&state, &env, &headers, action, "").await?;

    if action == Permission::SecretsList {
        list(&state).await
    } else {
        create(&state, &claims, &body).await
    }
}

pub async fn secrets_id_handler(
    State(state): State<Arc<ApiState>>,
    Path((env, id)): Path<(String, String)>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, HttpError> {
    let action = if method == Method::GET {
        Permission::SecretsRead
    } else if method == Method::PATCH {
        Permission::SecretsUpdate
    } else if method == Method::DELETE {
        Permission::SecretsDelete
    } else {
        return Err(HttpError::method_not_allowed(format!(
            "{method} and/or uri not valid for this endpoint"
        )));
    };
    let _claims = begin(&state, &env, &headers, action, &id).await?;

    if action == Permission::SecretsRead {
        read(&state, &id).await
    } else if action == Permission::SecretsUpdate {
        update(&state, &id, &body).await
    } else {
        delete(&state, &id).await
    }
}

/// Common front half: env check, authentication, authorization.
async fn begin(
    state: &ApiState,
    env: &str,
    headers: &HeaderMap,
    action: Permission,
    secret_id: &str,
) -> Result<Claims, HttpError> {
    if !state.cfg.topology.contains_key(env) {
        return Err(HttpError::bad_request(format!(
            "requested env={env} not supported by this instance"
        )));
    }

    let claims = authenticate(&state.cfg, headers)
        .map_err(|_| HttpError::unauthorized("user not authenticated"))?;

    let principal = principal_urn(&claims.principal_email());
    let target = secret_urn(secret_id);
    authorized(
        &state.cfg,
        state.secrets.as_ref(),
        &principal,
        action,
        &target,
    )
    .await
    .map_err(|e| match &e {
        Error::SecretStore(message) if message.contains("not found") => {
            info!("when acting on secret: {message}");
            HttpError::not_found("error acting on secret; could not find it")
        }
        _ => {
            info!("user not authorized for secrets action: {e}");
            HttpError::forbidden("user not authorized for secrets action")
        }
    })?;
    Ok(claims)
}

async fn list(state: &ApiState) -> Result<Response, HttpError> {
    let entries = state.secrets.list().await.map_err(|e| {
        error!("error listing secrets: {e}");
        HttpError::internal("error listing secrets; have the app administrator check the logs")
    })?;
    Ok(Json(entries).into_response())
}

async fn read(state: &ApiState, id: &str) -> Result<Response, HttpError> {
    let value = state.secrets.read(id).await.map_err(|e| match &e {
        Error::SecretStore(message) if message.contains("not found") => {
            HttpError::not_found("error getting secret; could not find it")
        }
        _ => {
            error!("error getting secretId={id}: {e}");
            HttpError::internal("error getting secret; have the app administrator check the logs")
        }
    })?;
    // a bare json string of base64 bytes, since secret data can be binary
    let encoded = base64::engine::general_purpose::STANDARD.encode(value);
    Ok(Json(encoded).into_response())
}

async fn create(state: &ApiState, claims: &Claims, body: &Bytes) -> Result<Response, HttpError> {
    let mut request: SecretRequest = serde_json::from_slice(body)
        .map_err(|e| HttpError::bad_request(format!("could not decode request body; err={e}")))?;

    // ownerUser is the authenticated principal; whatever the caller sent is
    // ignored
    request.owner_user = claims.principal_email();

    super::validate::validate_create(&request)
        .map_err(|e| HttpError::bad_request(format!("failed to validate body; err={e}")))?;
    let value = super::validate::decode_value(&request.value)
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    state
        .secrets
        .create(&request.id, &value, &request.owner_user, &request.owner_group)
        .await
        .map_err(|e| match &e {
            Error::SecretStore(message) if message.contains("already exists") => {
                info!("error creating secret: {message}");
                HttpError::conflict("error creating secret; already exists")
            }
            _ => {
                error!("error creating secret: {e}");
                HttpError::internal(
                    "error creating secret; have the app administrator check the logs",
                )
            }
        })?;

    let entry = SecretEntry {
        urn: secret_urn(&request.id),
        owner_group: request.owner_group.clone(),
        owner_user: request.owner_user.clone(),
        created_epoch_ns: Utc::now().timestamp_nanos_opt().unwrap_or(0),
    };
    Ok(Json(entry).into_response())
}

async fn update(state: &ApiState, id: &str, body: &Bytes) -> Result<Response, HttpError> {
    let request: SecretRequest = serde_json::from_slice(body)
        .map_err(|e| HttpError::bad_request(format!("could not decode request body; err={e}")))?;
    super::validate::validate_update(&request)
        .map_err(|e| HttpError::bad_request(format!("failed to validate body; err={e}")))?;
    let value = super::validate::decode_value(&request.value)
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    state.secrets.update(id, &value).await.map_err(|e| match &e {
        Error::SecretStore(message) if message.contains("not found") => {
            HttpError::not_found("error updating secret; could not find it")
        }
        _ => {
            error!("error updating secret: {e}");
            HttpError::internal("error updating secret; have the app administrator check the logs")
        }
    })?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn delete(state: &ApiState, id: &str) -> Result<Response, HttpError> {
    state.secrets.delete(id).await.map_err(|e| match &e {
        Error::SecretStore(message) if message.contains("not found") => {
            HttpError::not_found("error deleting secret; could not find it")
        }
        _ => {
            error!("error deleting secret: {e}");
            HttpError::internal("error deleting secret; have the app administrator check the logs")
        }
    })?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
