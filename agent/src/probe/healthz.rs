//! Health probe client

use std::time::Duration;

use appctl::model::HealthResult;
use tracing::debug;

use crate::config::ProbeSpec;

/// Check a healthz port. The body must be the literal `OK` for the port to
/// count as healthy. A TLS negotiation failure against a port that turns out
/// to speak plaintext yields `unknown` rather than unhealthy.
pub async fn check(spec: &ProbeSpec) -> HealthResult {
    let mut result = HealthResult {
        port: spec.port,
        ..Default::default()
    };

    let scheme = if spec.tls { "https" } else { "http" };
    // Local checks run against hard-coded certificates, so verification is
    // skipped for the probe itself.
    let client = match reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .timeout(Duration::from_secs(2))
        .build()
    {
        Ok(client) => client,
        Err(_) => {
            result.unknown = true;
            return result;
        }
    };

    let url = format!("{scheme}://localhost:{}/healthz", spec.port);
    let response = match client.get(&url).send().await {
        Ok(response) => response,
        Err(e) => {
            debug!("url={url} error={e}");
            let detail = format!("{e:?}");
            if spec.tls
                && (detail.contains("InvalidMessage")
                    || detail.contains("CorruptMessage")
                    || detail.contains("handshake"))
            {
                result.unknown = true;
            }
            return result;
        }
    };

    match response.text().await {
        Ok(body) => {
            result.healthy = body.trim_end_matches('\n') == "OK";
        }
        Err(_) => {
            result.unknown = true;
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::Router;

    async fn serve(router: Router) -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        port
    }

    #[tokio::test]
    async fn test_ok_body_is_healthy() {
        let port = serve(Router::new().route("/healthz", get(|| async { "OK" }))).await;
        let result = check(&ProbeSpec { port, tls: false }).await;
        assert!(result.healthy);
        assert!(!result.unknown);
    }

    #[tokio::test]
    async fn test_non_ok_body_is_unhealthy() {
        let port = serve(Router::new().route("/healthz", get(|| async { "DEGRADED" }))).await;
        let result = check(&ProbeSpec { port, tls: false }).await;
        assert!(!result.healthy);
        assert!(!result.unknown);
    }

    #[tokio::test]
    async fn test_connection_refused_is_unhealthy() {
        let result = check(&ProbeSpec { port: 1, tls: false }).await;
        assert!(!result.healthy);
        assert!(!result.unknown);
    }
}
