use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{role_group, validation, AccessLevel, STANDARD_ROLES};
use crate::confluence::{ConfluenceClient, ConfluenceError, PermissionGrant};
use crate::config::ProvisioningConfig;

/// Payload of a "create space" request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpaceRequest {
    pub space_name: String,
    pub space_key: String,
    pub space_admin: String,
    #[serde(default)]
    pub description: String,
}

/// Terminal outcome of a space-creation reconciliation.
#[derive(Debug)]
pub enum SpaceOutcome {
    /// The space exists. Advisory failures along the way live in `comments`.
    Created {
        space_url: String,
        space_key: String,
        comments: Vec<String>,
    },
    /// Preconditions failed; nothing was mutated on the platform.
    Blocked { comments: Vec<String> },
    /// The space-creation call itself failed; `error` is the raw response
    /// text. Groups are never provisioned in this case.
    Failed { error: String },
}

/// Drives a single space-creation request to completion against Confluence.
pub struct SpaceReconciler<'a> {
    client: &'a ConfluenceClient,
    settings: &'a ProvisioningConfig,
}

impl<'a> SpaceReconciler<'a> {
    pub fn new(client: &'a ConfluenceClient, settings: &'a ProvisioningConfig) -> Self {
        Self { client, settings }
    }

    /// Gate before any mutation: structural rules plus the cross-referential
    /// checks on the designated admin. A partially-created space from
    /// invalid input must never occur, so every violation is collected and
    /// the whole operation blocks without touching the platform.
    async fn gate(&self, request: &SpaceRequest) -> Vec<String> {
        let mut issues =
            validation::structural_issues(&request.space_name, &request.space_key);

        if self.client.get_user(&request.space_admin).await.is_err() {
            issues.push(format!("User {} not found", request.space_admin));
        } else if !self
            .client
            .is_user_in_group(&request.space_admin, &self.settings.licensed_group)
            .await
        {
            issues.push(format!("User {} has no license", request.space_admin));
        }

        issues
    }

    /// Differentiated permission sets for the three standard groups.
    fn grants_for(level: AccessLevel) -> Vec<PermissionGrant> {
        match level {
            AccessLevel::Read => vec![PermissionGrant::new("space", "read")],
            AccessLevel::Dev => {
                let mut grants = vec![PermissionGrant::new("space", "read")];
                for target in ["page", "blogpost", "comment", "attachment"] {
                    grants.push(PermissionGrant::new(target, "create"));
                    grants.push(PermissionGrant::new(target, "delete"));
                }
                grants
            }
            AccessLevel::Admin => vec![PermissionGrant::new("space", "administer")],
        }
    }

    /// Best-effort group + permission provisioning. Each failure is advisory:
    /// a missing dev-group grant does not fail the request.
    async fn provision_groups(&self, space_key: &str, comments: &mut Vec<String>) {
        for level in STANDARD_ROLES {
            let group = role_group(space_key, level);
            if let Err(e) = self.client.create_group(&group).await {
                if !e.is_already_exists() {
                    warn!(group = %group, error = %e, "Group creation failed");
                    comments.push(format!("Group {group} could not be created: {e}"));
                    continue;
                }
            }
            if let Err(e) = self
                .client
                .grant_space_permissions(space_key, &group, &Self::grants_for(level))
                .await
            {
                warn!(group = %group, error = %e, "Permission grant failed");
                comments.push(format!("Permission grant for {group} failed: {e}"));
            }
        }
    }

    /// Read back the admin group until Confluence can serve it, with
    /// exponential backoff and a bounded attempt count. The platform
    /// propagates new spaces/groups asynchronously; this wait is a
    /// heuristic, not a correctness guarantee.
    async fn wait_for_admin_group(&self, space_key: &str) -> Option<String> {
        let group = role_group(space_key, AccessLevel::Admin);
        let mut delay = Duration::from_millis(self.settings.settle_initial_delay_ms);
        for attempt in 1..=self.settings.settle_max_attempts {
            match self.client.get_group_members(&group).await {
                Ok(_) => return None,
                Err(e) => {
                    debug!(group = %group, attempt, error = %e, "Group not queryable yet")
                }
            }
            tokio::time::sleep(delay).await;
            delay = delay.saturating_mul(2);
        }
        Some(format!(
            "Group {group} was still not queryable after {} read-back attempts",
            self.settings.settle_max_attempts
        ))
    }

    pub async fn create_space(&self, request: &SpaceRequest) -> SpaceOutcome {
        let issues = self.gate(request).await;
        if !issues.is_empty() {
            info!(space_key = %request.space_key, issues = issues.len(), "Space request blocked");
            return SpaceOutcome::Blocked { comments: issues };
        }

        if let Err(e) = self
            .client
            .create_space(&request.space_key, &request.space_name, &request.description)
            .await
        {
            // Raw error text preserved for operator diagnosis; no retry.
            let error = match e {
                ConfluenceError::Api { body, .. } if !body.is_empty() => body,
                other => other.to_string(),
            };
            return SpaceOutcome::Failed { error };
        }

        let mut comments = Vec::new();
        self.provision_groups(&request.space_key, &mut comments).await;

        if let Some(comment) = self.wait_for_admin_group(&request.space_key).await {
            comments.push(comment);
        }

        // The space exists at this point, so an admin-add failure is only
        // ever an advisory comment, never an overall failure.
        let admin_group = role_group(&request.space_key, AccessLevel::Admin);
        match self
            .client
            .add_user_to_group(&request.space_admin, &admin_group)
            .await
        {
            Ok(()) => comments.push(format!(
                "Space {} created. {} added as admin.",
                request.space_key, request.space_admin
            )),
            Err(e) => comments.push(format!(
                "Could not add {} to {}: {}",
                request.space_admin, admin_group, e
            )),
        }

        info!(space_key = %request.space_key, "Space created");
        SpaceOutcome::Created {
            space_url: format!("{}/display/{}", self.client.base_url(), request.space_key),
            space_key: request.space_key.clone(),
            comments,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dev_grants_cover_all_content_types() {
        let grants = SpaceReconciler::grants_for(AccessLevel::Dev);
        // space read plus create+delete on each of the four content types
        assert_eq!(grants.len(), 9);
        assert!(grants
            .iter()
            .any(|g| g.target_type == "space" && g.operation_key == "read"));
        for target in ["page", "blogpost", "comment", "attachment"] {
            for op in ["create", "delete"] {
                assert!(
                    grants
                        .iter()
                        .any(|g| g.target_type == target && g.operation_key == op),
                    "missing {op} on {target}"
                );
            }
        }
    }

    #[test]
    fn read_and_admin_grants_are_space_scoped() {
        let read = SpaceReconciler::grants_for(AccessLevel::Read);
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].operation_key, "read");

        let admin = SpaceReconciler::grants_for(AccessLevel::Admin);
        assert_eq!(admin.len(), 1);
        assert_eq!(admin[0].operation_key, "administer");
        assert_eq!(admin[0].target_type, "space");
    }

    #[test]
    fn description_defaults_to_empty() {
        let request: SpaceRequest = serde_json::from_value(serde_json::json!({
            "space_name": "Docs",
            "space_key": "DOC",
            "space_admin": "admin"
        }))
        .unwrap();
        assert_eq!(request.description, "");
    }
}
