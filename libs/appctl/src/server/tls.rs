//! HTTPS listener
//!
//! Terminates TLS with rustls and hands each connection to an axum router.
//! The cipher allow-list and minimum protocol version come from config;
//! cipher names are resolved against the library's named suite set.

use std::future::Future;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use hyper::body::Incoming;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnectionBuilder;
use rustls::crypto::ring;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ServerConfig, SupportedCipherSuite};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;
use tracing::{debug, info, warn};

use crate::errors::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsSettings {
    /// list of allowed cipher suite names
    #[serde(default = "default_ciphers")]
    pub ciphers: Vec<String>,

    /// minimum TLS version to use
    #[serde(rename = "minVersion", default = "default_min_version")]
    pub min_version: String,
}

fn default_ciphers() -> Vec<String> {
    vec![
        "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256".to_string(),
        "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256".to_string(),
    ]
}

fn default_min_version() -> String {
    "1.2".to_string()
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            ciphers: default_ciphers(),
            min_version: default_min_version(),
        }
    }
}

/// Install the process-wide crypto provider. Call once at startup, before
/// any TLS client or server config is built.
pub fn init_crypto() {
    let _ = rustls::crypto::CryptoProvider::install_default(ring::default_provider());
}

/// Resolve configured cipher names against the library's named set. Unknown
/// names are dropped; an allow-list matching nothing falls back to the full
/// default set. TLS 1.3 suites are not part of the negotiable legacy set and
/// are kept so the newer protocol stays usable.
pub fn cipher_suites_from(configured: &[String]) -> Vec<SupportedCipherSuite> {
    let all = ring::default_provider().cipher_suites;
    let mut picked: Vec<SupportedCipherSuite> = all
        .iter()
        .copied()
        .filter(|suite| {
            configured
                .iter()
                .any(|name| name == &format!("{:?}", suite.suite()))
        })
        .collect();
    if picked.is_empty() {
        return all;
    }
    if !picked
        .iter()
        .any(|suite| matches!(suite, SupportedCipherSuite::Tls13(_)))
    {
        picked.extend(
            all.iter()
                .copied()
                .filter(|suite| matches!(suite, SupportedCipherSuite::Tls13(_))),
        );
    }
    picked
}

/// Map a configured minimum version onto the supported protocol set. The
/// library does not speak below 1.2, so configured 1.0/1.1 minimums resolve
/// to 1.2.
pub fn protocol_versions_from(min_version: &str) -> Vec<&'static rustls::SupportedProtocolVersion> {
    match min_version {
        "1.3" => vec![&rustls::version::TLS13],
        _ => vec![&rustls::version::TLS12, &rustls::version::TLS13],
    }
}

/// Build a rustls server config from key/cert paths and the TLS settings.
pub fn server_config(
    crt_path: &Path,
    key_path: &Path,
    settings: &TlsSettings,
) -> Result<ServerConfig, Error> {
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut BufReader::new(
        std::fs::File::open(crt_path)
            .map_err(|e| Error::Server(format!("cannot open cert {}: {e}", crt_path.display())))?,
    ))
    .collect::<Result<_, _>>()
    .map_err(|e| Error::Server(format!("bad cert {}: {e}", crt_path.display())))?;

    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut BufReader::new(
        std::fs::File::open(key_path)
            .map_err(|e| Error::Server(format!("cannot open key {}: {e}", key_path.display())))?,
    ))
    .map_err(|e| Error::Server(format!("bad key {}: {e}", key_path.display())))?
    .ok_or_else(|| Error::Server(format!("no private key in {}", key_path.display())))?;

    let provider = rustls::crypto::CryptoProvider {
        cipher_suites: cipher_suites_from(&settings.ciphers),
        ..ring::default_provider()
    };
    ServerConfig::builder_with_provider(Arc::new(provider))
        .with_protocol_versions(&protocol_versions_from(&settings.min_version))
        .map_err(|e| Error::Server(format!("TLS protocol config: {e}")))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| Error::Server(format!("TLS cert config: {e}")))
}

/// Accept loop: TLS handshake per connection, then serve the router over
/// HTTP/1.1. Returns when the shutdown future resolves.
pub async fn serve_tls(
    addr: SocketAddr,
    router: Router,
    tls: ServerConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), Error> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Server(format!("cannot bind {addr}: {e}")))?;
    let acceptor = TlsAcceptor::from(Arc::new(tls));
    info!("Starting HTTPS listener on {addr}");

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("HTTPS listener on {addr} shutting down");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("accept failed: {e}");
                        continue;
                    }
                };
                let acceptor = acceptor.clone();
                let router = router.clone();
                tokio::spawn(async move {
                    let tls_stream = match acceptor.accept(stream).await {
                        Ok(tls_stream) => tls_stream,
                        Err(e) => {
                            debug!("TLS handshake with {peer} failed: {e}");
                            return;
                        }
                    };
                    let service = hyper::service::service_fn(move |request: Request<Incoming>| {
                        router.clone().oneshot(request)
                    });
                    if let Err(e) = ConnectionBuilder::new(TokioExecutor::new())
                        .serve_connection(TokioIo::new(tls_stream), service)
                        .await
                    {
                        debug!("connection from {peer} ended with error: {e}");
                    }
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cipher_allow_list_filters() {
        let picked = cipher_suites_from(&["TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256".to_string()]);
        assert!(picked
            .iter()
            .any(|s| format!("{:?}", s.suite()) == "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256"));
        assert!(!picked
            .iter()
            .any(|s| format!("{:?}", s.suite()) == "TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384"));
        // 1.3 suites stay available
        assert!(picked
            .iter()
            .any(|s| matches!(s, SupportedCipherSuite::Tls13(_))));
    }

    #[test]
    fn test_unknown_names_fall_back_to_defaults() {
        let all = ring::default_provider().cipher_suites;
        let picked = cipher_suites_from(&["NOT_A_SUITE".to_string()]);
        assert_eq!(picked.len(), all.len());
    }

    #[test]
    fn test_min_version_mapping() {
        assert_eq!(protocol_versions_from("1.3").len(), 1);
        assert_eq!(protocol_versions_from("1.2").len(), 2);
        // below-1.2 minimums resolve to 1.2
        assert_eq!(protocol_versions_from("1.0").len(), 2);
    }
}
