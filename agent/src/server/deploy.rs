//! Synchronous deploy protocol
//!
//! The handler does not install anything itself. It records the desired
//! version in the deploy cache and waits for the background runner to
//! complete and for the status cache to converge on the requested version.

use std::sync::Arc;
use std::time::Duration;

use appctl::model::{Deploy, DeployResult, Version};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::cache::{now_unix, StatusCache};
use crate::server::ServerState;

pub fn render(result: DeployResult) -> Response {
    let status =
        StatusCode::from_u16(result.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_success() {
        info!("deploy finished code={} app={:?}", result.code, result.state);
    } else {
        warn!("deploy failed code={} err={}", result.code, result.err);
    }
    (status, Json(result)).into_response()
}

/// Run the deploy protocol, bounded by the server's write timeout. The flow
/// task keeps running past a timeout so the deploy record is always cleaned
/// up when the runner finishes.
pub async fn handle(state: Arc<ServerState>, app: String, version: String) -> Response {
    let write_timeout = Duration::from_secs(state.cfg.write_timeout_s);
    let flow = tokio::spawn(deploy_flow(state.clone(), app.clone(), version));

    match tokio::time::timeout(write_timeout, flow).await {
        Err(_) => render(DeployResult {
            code: StatusCode::REQUEST_TIMEOUT.as_u16(),
            err: "Timeout exceeded waiting for deploy".to_string(),
            state: None,
        }),
        Ok(Err(join_err)) => {
            error!("deploy task for app={app} failed: {join_err}");
            render(DeployResult {
                code: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                err: format!("deploy task failed: {join_err}"),
                state: None,
            })
        }
        Ok(Ok(result)) => render(result),
    }
}

/// Insert the deploy record, await the runner, check convergence. The record
/// is removed on every exit.
pub async fn deploy_flow(state: Arc<ServerState>, app: String, version: String) -> DeployResult {
    debug!("deploy_flow app={app} version={version}");
    let record = Deploy {
        app: app.clone(),
        version: version.clone(),
        requested_at: now_unix(),
        ..Default::default()
    };

    // add-if-absent is the whole concurrency story: a second deploy for the
    // same app gets refused while this one is in flight
    if !state.deploy_cache.add_deploy(&app, record) {
        return DeployResult {
            code: StatusCode::TOO_MANY_REQUESTS.as_u16(),
            err: format!("deploy already requested for {app}"),
            state: None,
        };
    }

    let result = deploy_inner(&state, &app, &version).await;
    state.deploy_cache.delete_deploy(&app);
    result
}

async fn deploy_inner(state: &ServerState, app: &str, version: &str) -> DeployResult {
    let interval = Duration::from_secs_f64(state.cfg.write_timeout_s as f64 * 0.05);

    // wait for the background runner to pick the record up and finish
    let latest = loop {
        tokio::time::sleep(interval).await;
        match state.deploy_cache.get_deploys().get(app) {
            Some(record) if record.completed_at != 0 => {
                info!("deploy marked completed app={app} state={record:?}");
                break record.clone();
            }
            Some(_) => {
                debug!("deploy completion not seen yet app={app}");
            }
            None => {
                return DeployResult {
                    code: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                    err: format!("deploy record for {app} disappeared"),
                    state: None,
                };
            }
        }
    };

    if let Some(err) = &latest.err {
        return DeployResult {
            code: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            err: err.clone(),
            state: Some(latest),
        };
    }

    // confirm from the status cache that installed+running converged on the
    // requested version
    let converge_timeout = Duration::from_secs(state.cfg.converge_timeout_s);
    let converged =
        wait_for_converge(&state.status_cache, app, version, converge_timeout).await;
    let message = convergence_msg(&state.status_cache, app, version);
    if converged {
        info!("deploy converged {message}");
        DeployResult {
            code: StatusCode::OK.as_u16(),
            err: String::new(),
            state: Some(latest),
        }
    } else {
        error!("deploy did not converge {message}");
        DeployResult {
            code: StatusCode::REQUEST_TIMEOUT.as_u16(),
            err: format!("deploy did not converge {message}"),
            state: Some(latest),
        }
    }
}

fn convergence_msg(status_cache: &StatusCache, app: &str, version: &str) -> String {
    let statuses = status_cache.get_statuses();
    let versions = statuses.get(app).map(|status| status.versions.clone());
    format!(
        "app={app}, desired={version}, installed={:?}, running={:?}",
        versions.as_ref().and_then(|v| v.installed),
        versions.as_ref().and_then(|v| v.running),
    )
}

/// Poll the status cache until installed == running == requested, or until
/// the timeout passes. A cache entry with absent version pointers counts as
/// not-yet-converged.
pub async fn wait_for_converge(
    status_cache: &StatusCache,
    app: &str,
    version: &str,
    duration: Duration,
) -> bool {
    let requested = match Version::parse(version) {
        Ok(parsed) => parsed,
        Err(_) => {
            warn!("could not parse requested version string app={app} version={version}");
            return false;
        }
    };

    let interval = Duration::from_secs_f64(duration.as_secs_f64() * 0.05);
    let deadline = Instant::now() + duration;
    loop {
        tokio::time::sleep(interval).await;
        if Instant::now() >= deadline {
            return false;
        }
        debug!("checking for convergence app={app}");
        let statuses = status_cache.get_statuses();
        let Some(status) = statuses.get(app) else {
            continue;
        };
        let (Some(installed), Some(running)) =
            (status.versions.installed, status.versions.running)
        else {
            continue;
        };
        if installed == requested && running == requested {
            return true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{DeployCache, StatusCache};
    use crate::config::Config;
    use appctl::model::{Status, Versions};
    use std::collections::HashMap;

    fn state() -> Arc<ServerState> {
        Arc::new(ServerState {
            cfg: Arc::new(Config::default()),
            status_cache: Arc::new(StatusCache::new()),
            deploy_cache: Arc::new(DeployCache::new()),
            psk: "psk".to_string(),
        })
    }

    fn set_versions(cache: &StatusCache, app: &str, installed: &str, running: &str) {
        cache.set_statuses(HashMap::from([(
            app.to_string(),
            Status {
                versions: Versions {
                    config: 0,
                    installed: Version::parse(installed).ok(),
                    running: Version::parse(running).ok(),
                },
                health: Vec::new(),
            },
        )]));
    }

    fn complete_soon(state: &Arc<ServerState>, app: &str, err: Option<String>) {
        let state = state.clone();
        let app = app.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            state.deploy_cache.mark_deploy_start(&app);
            state.deploy_cache.mark_deploy_complete(&app, err);
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_happy_path_converges() {
        let state = state();
        set_versions(&state.status_cache, "arryved-api", "1.2.3", "1.2.3");
        complete_soon(&state, "arryved-api", None);

        let result = deploy_flow(state.clone(), "arryved-api".into(), "1.2.3".into()).await;
        assert_eq!(result.code, 200);
        assert!(result.state.is_some());
        // record removed on exit
        assert!(state.deploy_cache.get_deploys().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_deploy_rejected() {
        let state = state();
        state.deploy_cache.add_deploy(
            "arryved-api",
            Deploy {
                app: "arryved-api".into(),
                version: "1.2.3".into(),
                requested_at: now_unix(),
                ..Default::default()
            },
        );

        let result = deploy_flow(state.clone(), "arryved-api".into(), "1.2.3".into()).await;
        assert_eq!(result.code, 429);
        assert_eq!(result.err, "deploy already requested for arryved-api");
        // the pre-existing record is untouched
        assert!(state.deploy_cache.get_deploys().contains_key("arryved-api"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_runner_error_is_a_500() {
        let state = state();
        complete_soon(&state, "arryved-api", Some("apt install failed: boom".into()));

        let result = deploy_flow(state.clone(), "arryved-api".into(), "1.2.3".into()).await;
        assert_eq!(result.code, 500);
        assert!(result.err.contains("apt install failed"));
        assert!(result.state.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_converge_failure_is_a_408_with_state() {
        let state = state();
        // install "succeeded" but the running version stayed behind
        set_versions(&state.status_cache, "arryved-api", "1.2.3", "1.2.1");
        complete_soon(&state, "arryved-api", None);

        let result = deploy_flow(state.clone(), "arryved-api".into(), "1.2.3".into()).await;
        assert_eq!(result.code, 408);
        assert!(result.err.contains("deploy did not converge"));
        assert!(result.state.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_converge_guards_absent_versions() {
        let cache = StatusCache::new();
        cache.set_statuses(HashMap::from([(
            "arryved-api".to_string(),
            Status::default(),
        )]));
        let converged =
            wait_for_converge(&cache, "arryved-api", "1.2.3", Duration::from_secs(2)).await;
        assert!(!converged);
    }

    #[tokio::test(start_paused = true)]
    async fn test_once_cleared_deploys_are_accepted_again() {
        let state = state();
        set_versions(&state.status_cache, "arryved-api", "1.2.3", "1.2.3");
        complete_soon(&state, "arryved-api", None);
        let first = deploy_flow(state.clone(), "arryved-api".into(), "1.2.3".into()).await;
        assert_eq!(first.code, 200);

        complete_soon(&state, "arryved-api", None);
        let second = deploy_flow(state.clone(), "arryved-api".into(), "1.2.3".into()).await;
        assert_eq!(second.code, 200);
    }
}
