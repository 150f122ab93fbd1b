//! HTTPS server plumbing shared by the control API and host agent

pub mod auth;
pub mod error;
pub mod tls;

pub use auth::{bearer_token, read_psk};
pub use error::HttpError;
pub use tls::{init_crypto, serve_tls, TlsSettings};
