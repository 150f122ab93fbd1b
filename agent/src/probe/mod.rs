//! Local probes against apps on this host

pub mod healthz;
pub mod varz;
