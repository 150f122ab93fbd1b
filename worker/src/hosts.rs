//! Per-host deploy fan-out
//!
//! One task per host, gated by a semaphore sized from the requested
//! concurrency. Every host runs to completion regardless of individual
//! failures; the caller aggregates.

use std::sync::Arc;
use std::time::Duration;

use appctl::errors::Error;
use appctl::jobs::DeployJobRequest;
use appctl::model::DeployResult;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::config::Config;

#[derive(Debug)]
pub struct HostOutcome {
    pub host: String,
    pub result: DeployResult,
}

/// Interpret a concurrency request: an integer N, or a percentage of the
/// host count (floored).
pub fn concurrency_to_batch_count(concurrency: &str, total: usize) -> Result<usize, Error> {
    if let Some(percentage) = concurrency.strip_suffix('%') {
        let percentage: usize = percentage
            .trim()
            .parse()
            .map_err(|_| Error::Parse(format!("bad concurrency percentage: {concurrency}")))?;
        return Ok(total * percentage / 100);
    }
    concurrency
        .trim()
        .parse()
        .map_err(|_| Error::Parse(format!("bad concurrency: {concurrency}")))
}

/// Deploy to every host in the cluster, at most `batch_count` in flight.
pub async fn deploy_to_hosts(
    cfg: &Config,
    psk: &str,
    request: &DeployJobRequest,
) -> Result<Vec<HostOutcome>, Error> {
    let hosts: Vec<String> = request.cluster.hosts.keys().cloned().collect();
    let batch_count = concurrency_to_batch_count(&request.concurrency, hosts.len())?;
    info!(
        "deployment with concurrency of {batch_count} nodes requested against {} hosts",
        hosts.len()
    );
    if batch_count == 0 {
        return Ok(Vec::new());
    }

    let semaphore = Arc::new(Semaphore::new(batch_count));
    let tasks = hosts.into_iter().map(|host| {
        let semaphore = semaphore.clone();
        let app = request.cluster.id.app.clone();
        let variant = request.cluster.id.variant.clone();
        let version = request.version.clone();
        let scheme = cfg.agent_scheme.clone();
        let port = cfg.agent_port;
        let timeout = Duration::from_secs(cfg.host_deploy_timeout_s);
        let psk = psk.to_string();
        async move {
            let _permit = semaphore.acquire().await.expect("semaphore open");
            info!("starting deployment on host={host} app={app} version={version}");
            let result = host_deploy(
                &scheme, &host, port, &psk, timeout, &app, &variant, &version,
            )
            .await;
            info!("finished deployment for={host} result={result:?}");
            HostOutcome { host, result }
        }
    });

    Ok(join_all(tasks).await)
}

/// One agent /deploy call with its own deadline. Transport and decode
/// failures are folded into the DeployResult.
#[allow(clippy::too_many_arguments)]
pub async fn host_deploy(
    scheme: &str,
    host: &str,
    port: u16,
    psk: &str,
    timeout: Duration,
    app: &str,
    variant: &str,
    version: &str,
) -> DeployResult {
    let failed = |message: String| {
        warn!("{message}");
        DeployResult {
            code: 0,
            err: message,
            state: None,
        }
    };

    // agent certificates are fleet-internal; the PSK carries the trust
    let client = match reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .timeout(timeout)
        .build()
    {
        Ok(client) => client,
        Err(e) => return failed(format!("could not build client for host={host}: {e}")),
    };

    let url = format!(
        "{scheme}://{host}:{port}/deploy?app={app}&variant={variant}&version={version}"
    );
    let response = match client.get(&url).bearer_auth(psk).send().await {
        Ok(response) => response,
        Err(e) => {
            return failed(format!(
                "failed to execute /deploy request to app-controld on host={host}: {e}"
            ))
        }
    };
    match response.json::<DeployResult>().await {
        Ok(result) => result,
        Err(e) => failed(format!(
            "failed to unmarshal response from app-controld on host={host}: {e}"
        )),
    }
}
