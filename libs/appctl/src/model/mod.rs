//! Data model shared by the control API, worker pool and host agents

pub mod cluster;
pub mod deploy;
pub mod status;
pub mod version;

pub use cluster::{Cluster, ClusterId, Environment, Host, Kind, RepoType, RuntimeKind, Topology};
pub use deploy::{Deploy, DeployResult};
pub use status::{HealthResult, Status, Versions};
pub use version::Version;
