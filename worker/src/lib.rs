//! app-control-worker library
//!
//! Worker pool: consumes deploy jobs from the queue and executes them, per
//! host through the agents or per cluster through the cluster API.

pub mod config;
pub mod configball;
pub mod hosts;
pub mod kube;
pub mod worker;
