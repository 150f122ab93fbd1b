//! app-controld library
//!
//! Node-local agent for VM hosts: keeps installed/running/health status for
//! each known app, accepts deploy requests, and drives package install,
//! config materialization and service restarts.

pub mod cache;
pub mod config;
pub mod deploy;
pub mod exec;
pub mod probe;
pub mod server;
pub mod status;
