//! Layered application configuration
//!
//! An app config is a typed head (name, version, kind, runtime, repo
//! coordinates, port) plus an arbitrarily nested body tree. Four YAML layers
//! (defaults, env, region, variant) compile into one document; see
//! [`merge::multi_merge`].

pub mod compile;
pub mod merge;
pub mod schema;

pub use compile::compile;
pub use merge::{merge, multi_merge, strip_deleted};
pub use schema::{parse_yaml, to_yaml_string, AppConfig, ConfigValue, DELETE_SENTINEL};
