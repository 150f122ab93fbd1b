//! Shared core for the app-control deployment control plane.
//!
//! Holds the pieces every process agrees on: the cluster/version/status
//! model, the layered configuration compiler, the job wire format, the
//! queue and store boundaries, and the HTTPS server plumbing.

pub mod appconfig;
pub mod errors;
pub mod jobs;
pub mod model;
pub mod queue;
pub mod server;
pub mod store;

pub use errors::Error;
