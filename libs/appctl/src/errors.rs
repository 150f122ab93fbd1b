//! Error types shared across the control plane

use thiserror::Error;

/// Main error type for app-control processes
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("authentication error: {0}")]
    Authentication(String),

    #[error("authorization error: {0}")]
    Authorization(String),

    #[error("topology error: {0}")]
    Topology(String),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("object store error: {0}")]
    ObjectStore(String),

    #[error("secret store error: {0}")]
    SecretStore(String),

    #[error("package error: {0}")]
    Package(String),

    #[error("service control error: {0}")]
    ServiceControl(String),

    #[error("file system error: {0}")]
    FileSystem(String),

    #[error("deploy did not converge: {0}")]
    ConvergeTimeout(String),

    #[error("cluster API error: {0}")]
    ClusterApi(String),

    #[error("server error: {0}")]
    Server(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unsupported: {0}")]
    Unsupported(String),
}
