//! Role-based authorization
//!
//! A static table maps (permission, target) pairs to roles, roles to
//! groups, and groups to principals. Secret targets get their own
//! authorizer keyed off the urn scheme prefix.

use appctl::errors::Error;
use appctl::store::SecretStore;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::Config;

pub type PrincipalUrn = String;
pub type GroupUrn = String;
pub type Role = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Permission {
    Deploy,
    SecretsList,
    SecretsRead,
    SecretsCreate,
    SecretsUpdate,
    SecretsDelete,
}

/// Generic authorizer: picks the specific authorizer from the target urn.
pub async fn authorized(
    cfg: &Config,
    secrets: &dyn SecretStore,
    principal: &PrincipalUrn,
    action: Permission,
    target: &str,
) -> Result<(), Error> {
    if !cfg.rbac_enabled {
        warn!("RBAC is disabled - everything is permitted!");
        return Ok(());
    }

    if target.starts_with("urn:secret") {
        return secrets_authorizer(cfg, secrets, principal, action, target).await;
    }

    config_authorizer(cfg, principal, action, target)
}

/// Authorizer for locally-configured access entries (e.g. the deploy
/// action).
pub fn config_authorizer(
    cfg: &Config,
    principal: &PrincipalUrn,
    action: Permission,
    target: &str,
) -> Result<(), Error> {
    for entry in &cfg.access_entries {
        if entry.permission == action && (entry.target == target || entry.target == "*") {
            if principal_has_role(cfg, principal, &entry.role) {
                return Ok(());
            }
        }
    }
    Err(Error::Authorization(format!(
        "not authorized principal={principal} action={action:?} target={target}"
    )))
}

pub fn principal_has_role(cfg: &Config, principal: &PrincipalUrn, role: &Role) -> bool {
    let Some(groups) = cfg.role_memberships.get(role) else {
        return false;
    };
    groups
        .iter()
        .any(|group| principal_in_group(cfg, principal, group))
}

pub fn principal_in_group(cfg: &Config, principal: &PrincipalUrn, group: &GroupUrn) -> bool {
    cfg.users_by_groups
        .get(group)
        .map(|members| members.iter().any(|member| member == principal))
        .unwrap_or(false)
}

/// Authorizer for secret targets. Create/list/read need authentication
/// only; update and delete are restricted to the owning user or a member of
/// the owning group.
pub async fn secrets_authorizer(
    cfg: &Config,
    secrets: &dyn SecretStore,
    principal: &PrincipalUrn,
    action: Permission,
    target: &str,
) -> Result<(), Error> {
    let mutation = matches!(action, Permission::SecretsUpdate | Permission::SecretsDelete);
    if !mutation {
        return Ok(());
    }

    let secret_id = target.rsplit(':').next().unwrap_or_default();
    let (owner_user, owner_group) = secrets.owners(secret_id).await?;
    debug!(
        "authorizing principal={principal} action={action:?} target={target} ownerUser={owner_user} ownerGroup={owner_group}"
    );

    let owner_urn = crate::authn::principal_urn(&owner_user);
    if principal == &owner_urn || principal_in_group(cfg, principal, &owner_group) {
        return Ok(());
    }
    Err(Error::Authorization(format!(
        "not authorized principal={principal} action={action:?} target={target}"
    )))
}
