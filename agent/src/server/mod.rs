//! Agent HTTPS API
//!
//! Three endpoints behind a pre-shared bearer token: `/status` (full cache
//! snapshot), `/healthz?app=X` (load-balancer view of one app) and
//! `/deploy?app=X&version=V` (synchronous deploy).

pub mod deploy;
pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use appctl::errors::Error;
use appctl::server::auth::bearer_token;
use appctl::server::tls::{serve_tls, server_config};
use appctl::server::HttpError;
use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use std::future::Future;
use tower_http::trace::TraceLayer;

use crate::cache::{DeployCache, StatusCache};
use crate::config::Config;

/// State shared across handlers
pub struct ServerState {
    pub cfg: Arc<Config>,
    pub status_cache: Arc<StatusCache>,
    pub deploy_cache: Arc<DeployCache>,
    pub psk: String,
}

pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/status", get(handlers::status_handler))
        .route("/healthz", get(handlers::healthz_handler))
        .route("/deploy", get(handlers::deploy_handler))
        .layer(middleware::from_fn_with_state(state.clone(), require_psk))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// All endpoints require the pre-shared bearer token. An unreadable PSK file
/// fails closed.
async fn require_psk(
    State(state): State<Arc<ServerState>>,
    request: Request,
    next: Next,
) -> Result<Response, HttpError> {
    match bearer_token(request.headers()) {
        Some(token) if !state.psk.is_empty() && token == state.psk => Ok(next.run(request).await),
        _ => Err(HttpError::unauthorized("invalid or missing bearer token")),
    }
}

/// Serve the agent API over HTTPS until the shutdown future resolves.
pub async fn serve(
    cfg: &Config,
    state: Arc<ServerState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), Error> {
    let tls = server_config(&cfg.crt_path, &cfg.key_path, &cfg.tls)?;
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    serve_tls(addr, router(state), tls, shutdown).await
}
