//! Process-wide status and deploy caches
//!
//! Both caches hide their maps behind locks and hand out copies; raw
//! references never escape.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use appctl::model::{Deploy, Status};
use tracing::debug;

pub const STALE_DEPLOY_COMPLETED_S: i64 = 300;
pub const STALE_DEPLOY_REQUESTED_S: i64 = 3600;

pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Latest per-app status snapshot. The poller replaces the whole map; readers
/// get a copy, so a reader never observes a partially updated snapshot.
#[derive(Default)]
pub struct StatusCache {
    statuses: RwLock<HashMap<String, Status>>,
}

impl StatusCache {
    pub fn new() -> StatusCache {
        StatusCache::default()
    }

    pub fn get_statuses(&self) -> HashMap<String, Status> {
        let statuses = self.statuses.read().unwrap_or_else(|e| e.into_inner());
        statuses.clone()
    }

    pub fn set_statuses(&self, new_statuses: HashMap<String, Status>) {
        let mut statuses = self.statuses.write().unwrap_or_else(|e| e.into_inner());
        *statuses = new_statuses;
    }
}

/// Pending and recently finished deploys, keyed by app. `add_deploy` is
/// add-if-absent and is the only thing preventing concurrent same-app
/// deploys on a host.
#[derive(Default)]
pub struct DeployCache {
    deploys: Mutex<HashMap<String, Deploy>>,
}

impl DeployCache {
    pub fn new() -> DeployCache {
        DeployCache::default()
    }

    /// Insert a deploy record if no record exists for the app. Returns
    /// whether the insert happened.
    pub fn add_deploy(&self, app: &str, deploy: Deploy) -> bool {
        let mut deploys = self.deploys.lock().unwrap_or_else(|e| e.into_inner());
        if deploys.contains_key(app) {
            return false;
        }
        deploys.insert(app.to_string(), deploy);
        true
    }

    pub fn mark_deploy_start(&self, app: &str) -> bool {
        let mut deploys = self.deploys.lock().unwrap_or_else(|e| e.into_inner());
        match deploys.get_mut(app) {
            Some(deploy) => {
                deploy.started_at = now_unix();
                true
            }
            None => false,
        }
    }

    pub fn mark_deploy_complete(&self, app: &str, err: Option<String>) -> bool {
        let mut deploys = self.deploys.lock().unwrap_or_else(|e| e.into_inner());
        match deploys.get_mut(app) {
            Some(deploy) => {
                debug!("mark complete app={app}");
                deploy.completed_at = now_unix();
                deploy.err = err;
                true
            }
            None => false,
        }
    }

    pub fn delete_deploy(&self, app: &str) {
        let mut deploys = self.deploys.lock().unwrap_or_else(|e| e.into_inner());
        deploys.remove(app);
    }

    pub fn get_deploys(&self) -> HashMap<String, Deploy> {
        let deploys = self.deploys.lock().unwrap_or_else(|e| e.into_inner());
        deploys.clone()
    }

    /// Clean up probable stale deploys, where either the completion or the
    /// request is too long ago.
    pub fn clean_deploys(&self) {
        let mut deploys = self.deploys.lock().unwrap_or_else(|e| e.into_inner());
        let now = now_unix();
        deploys.retain(|app, deploy| {
            let completed_stale =
                deploy.completed_at != 0 && (now - deploy.completed_at) > STALE_DEPLOY_COMPLETED_S;
            let requested_stale = (now - deploy.requested_at) > STALE_DEPLOY_REQUESTED_S;
            if completed_stale || requested_stale {
                debug!("clearing out stale entry {app}={deploy:?}");
                return false;
            }
            true
        });
    }
}
