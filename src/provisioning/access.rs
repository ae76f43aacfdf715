use rand::{distr::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

use super::{role_group, STANDARD_ROLES};
use crate::confluence::{ConfluenceClient, ConfluenceError, NewUser};
use crate::config::ProvisioningConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Read,
    Dev,
    Admin,
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessLevel::Read => write!(f, "read"),
            AccessLevel::Dev => write!(f, "dev"),
            AccessLevel::Admin => write!(f, "admin"),
        }
    }
}

/// Payload of a "grant space access" request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRequest {
    pub lan_id: String,
    pub email: String,
    pub domain: String,
    pub manager: String,
    pub requester: String,
    pub full_name: String,
    pub space_key: String,
    pub access: AccessLevel,
}

/// Successful outcome of an access reconciliation. `access_granted` is the
/// level that was actually granted, which may be lower than requested.
#[derive(Debug, Clone, Serialize)]
pub struct AccessGrant {
    pub username: String,
    pub access_granted: AccessLevel,
    pub group: String,
    /// Advisory sub-step failures, surfaced on the record but never
    /// escalated to the overall status.
    #[serde(skip_serializing)]
    pub advisories: Vec<String>,
}

/// Drives a single access request to completion against Confluence.
/// Every step is check-then-act; "already exists" on creation counts as
/// success, which is what makes re-running a request a no-op.
pub struct AccessReconciler<'a> {
    client: &'a ConfluenceClient,
    settings: &'a ProvisioningConfig,
}

impl<'a> AccessReconciler<'a> {
    pub fn new(client: &'a ConfluenceClient, settings: &'a ProvisioningConfig) -> Self {
        Self { client, settings }
    }

    /// Internal-domain users are addressed by LAN ID, everyone else by
    /// email. Closed two-branch rule: a new domain needs an explicit rule,
    /// not a silent default.
    fn resolve_username(&self, request: &AccessRequest) -> String {
        if request.domain == self.settings.internal_domain {
            request.lan_id.clone()
        } else {
            request.email.clone()
        }
    }

    async fn ensure_user_exists(
        &self,
        request: &AccessRequest,
        username: &str,
    ) -> Result<(), ConfluenceError> {
        match self.client.get_user(username).await {
            Ok(_) => {
                info!(username = %username, "User exists");
                return Ok(());
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        info!(username = %username, "Creating user");
        let new_user = NewUser {
            user_name: username.to_string(),
            full_name: request.full_name.clone(),
            email: request.email.clone(),
            password: generate_initial_password(),
            notify_via_email: false,
        };
        match self.client.create_user(&new_user).await {
            Ok(()) => {}
            Err(e) if e.is_already_exists() => {
                // Lost a creation race; the user is there, which is all we need.
                info!(username = %username, "User already existed on create");
            }
            Err(e) => return Err(e),
        }

        // Re-fetch for canonical details; a user we just created must resolve.
        self.client.get_user(username).await.map(|_| ())
    }

    /// License assignment is advisory: membership may already be correct via
    /// a path this check cannot see, so a failed add is reported, not fatal.
    async fn ensure_license(&self, username: &str) -> Option<String> {
        let group = &self.settings.licensed_group;
        if self.client.is_user_in_group(username, group).await {
            return None;
        }
        match self.client.add_user_to_group(username, group).await {
            Ok(()) => {
                info!(username = %username, group = %group, "License seat assigned");
                None
            }
            Err(e) => {
                warn!(username = %username, group = %group, error = %e, "License assignment failed");
                Some(format!("License assignment for {username} failed: {e}"))
            }
        }
    }

    /// Group existence is idempotent by construction: create all three and
    /// swallow every error, "already exists" included.
    async fn ensure_space_groups(&self, space_key: &str) {
        for level in STANDARD_ROLES {
            let name = role_group(space_key, level);
            if let Err(e) = self.client.create_group(&name).await {
                if !e.is_already_exists() {
                    warn!(group = %name, error = %e, "Group creation failed");
                }
            }
        }
    }

    /// Does `username` hold administer permission on the space? Matched by
    /// resolved user key against the space's permission list. Any lookup
    /// failure reads as "no".
    async fn is_space_admin(&self, space_key: &str, username: &str) -> bool {
        let Ok(user) = self.client.get_user(username).await else {
            return false;
        };
        let Some(user_key) = user.user_key else {
            return false;
        };
        let Ok(permissions) = self.client.get_space_permissions(space_key).await else {
            return false;
        };
        permissions.iter().any(|p| {
            p.operation.operation_key == "administer"
                && p.subject
                    .as_ref()
                    .is_some_and(|s| s.user_key.as_deref() == Some(user_key.as_str()))
        })
    }

    pub async fn grant_access(
        &self,
        request: &AccessRequest,
    ) -> Result<AccessGrant, ConfluenceError> {
        let username = self.resolve_username(request);
        self.ensure_user_exists(request, &username).await?;

        let mut advisories = Vec::new();
        if let Some(comment) = self.ensure_license(&username).await {
            advisories.push(comment);
        }

        self.ensure_space_groups(&request.space_key).await;

        // Self-escalation guard: admin access needs an existing admin's
        // involvement, otherwise the request is quietly downgraded to dev.
        let mut level = request.access;
        if level == AccessLevel::Admin
            && !(self.is_space_admin(&request.space_key, &request.manager).await
                || self
                    .is_space_admin(&request.space_key, &request.requester)
                    .await)
        {
            warn!(
                username = %username,
                space_key = %request.space_key,
                "Admin denied without an existing admin; downgrading to dev"
            );
            level = AccessLevel::Dev;
        }

        let group = role_group(&request.space_key, level);
        if !self.client.is_user_in_group(&username, &group).await {
            self.client.add_user_to_group(&username, &group).await?;
        }

        info!(username = %username, group = %group, access = %level, "Access granted");
        Ok(AccessGrant {
            username,
            access_granted: level,
            group,
            advisories,
        })
    }
}

fn generate_initial_password() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(24)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_is_a_required_field() {
        let result: Result<AccessRequest, _> = serde_json::from_value(serde_json::json!({
            "lan_id": "jdoe",
            "email": "jdoe@example.com",
            "domain": "r1-core",
            "manager": "boss",
            "requester": "boss",
            "full_name": "Jane Doe",
            "space_key": "ENG"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn access_levels_parse_from_lowercase_names() {
        assert_eq!(
            serde_json::from_value::<AccessLevel>(serde_json::json!("dev")).unwrap(),
            AccessLevel::Dev
        );
        assert_eq!(serde_json::to_value(AccessLevel::Admin).unwrap(), "admin");
    }

    #[test]
    fn missing_required_field_fails_deserialization() {
        let result: Result<AccessRequest, _> = serde_json::from_value(serde_json::json!({
            "lan_id": "jdoe",
            "space_key": "ENG"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn role_group_uses_level_suffix() {
        assert_eq!(role_group("ENG", AccessLevel::Dev), "ENG_dev");
        assert_eq!(role_group("ENG", AccessLevel::Admin), "ENG_admin");
        assert_eq!(role_group("VIS", AccessLevel::Read), "VIS_read");
    }

    #[test]
    fn initial_passwords_are_long_and_distinct() {
        let a = generate_initial_password();
        let b = generate_initial_password();
        assert_eq!(a.chars().count(), 24);
        assert_ne!(a, b);
    }
}
