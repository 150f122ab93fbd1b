//! Object and secret store boundaries

pub mod object;
pub mod secret;

pub use object::{configball_pattern, fetch_latest_matching, FsObjectStore, ObjectMeta, ObjectStore};
pub use secret::{secret_urn, FsSecretStore, SecretEntry, SecretStore};
