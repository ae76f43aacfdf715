use reqwest::RequestBuilder;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::errors::ConfluenceError;
use super::types::{
    ConfluenceUser, GroupMember, NewUser, Page, PermissionGrant, ResultsPage, Space,
    SpacePermission, Webhook,
};
use crate::vault::Credentials;

/// HTTP client for the Confluence REST API, authenticated with the basic
/// credentials the service fetched at startup.
///
/// Every call carries a client-level timeout so a hung Confluence instance
/// cannot stall a worker indefinitely.
#[derive(Debug, Clone)]
pub struct ConfluenceClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl ConfluenceClient {
    pub fn new(
        base_url: &str,
        credentials: &Credentials,
        request_timeout: Duration,
    ) -> Result<Self, ConfluenceError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            username: credentials.username.clone(),
            password: credentials.password.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .basic_auth(&self.username, Some(&self.password))
            .header("Accept", "application/json")
    }

    /// Send a request and enforce the 2xx success convention, preserving the
    /// raw body of any error response verbatim.
    async fn send(&self, builder: RequestBuilder) -> Result<reqwest::Response, ConfluenceError> {
        let response = self.authed(builder).send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ConfluenceError::Api { status, body })
        }
    }

    // --- users ---

    pub async fn get_user(&self, username: &str) -> Result<ConfluenceUser, ConfluenceError> {
        let response = self
            .send(
                self.http
                    .get(self.url("/rest/api/user"))
                    .query(&[("username", username)]),
            )
            .await?;
        Ok(response.json().await?)
    }

    /// Administrative user creation. The caller decides how to interpret an
    /// "already exists" rejection.
    pub async fn create_user(&self, user: &NewUser) -> Result<(), ConfluenceError> {
        debug!(username = %user.user_name, "Creating Confluence user");
        self.send(self.http.post(self.url("/rest/api/admin/user")).json(user))
            .await?;
        Ok(())
    }

    // --- groups & membership ---

    pub async fn create_group(&self, name: &str) -> Result<(), ConfluenceError> {
        debug!(group = %name, "Creating Confluence group");
        self.send(
            self.http
                .post(self.url("/rest/api/admin/group"))
                .json(&json!({ "name": name, "type": "group" })),
        )
        .await?;
        Ok(())
    }

    pub async fn get_group_members(&self, group: &str) -> Result<Vec<GroupMember>, ConfluenceError> {
        let response = self
            .send(
                self.http
                    .get(self.url(&format!("/rest/api/group/{group}/member"))),
            )
            .await?;
        let page: ResultsPage<GroupMember> = response.json().await?;
        Ok(page.results)
    }

    /// Membership check. Any lookup failure reads as "not a member" - the
    /// caller will attempt the add and let that call be authoritative.
    pub async fn is_user_in_group(&self, username: &str, group: &str) -> bool {
        match self.get_group_members(group).await {
            Ok(members) => members.iter().any(|m| m.username == username),
            Err(_) => false,
        }
    }

    pub async fn add_user_to_group(&self, username: &str, group: &str) -> Result<(), ConfluenceError> {
        debug!(username = %username, group = %group, "Adding user to group");
        self.send(
            self.http
                .post(self.url(&format!("/rest/api/admin/group/{group}/add-user")))
                .json(&json!({ "name": username })),
        )
        .await?;
        Ok(())
    }

    // --- spaces & permissions ---

    pub async fn get_space_permissions(
        &self,
        space_key: &str,
    ) -> Result<Vec<SpacePermission>, ConfluenceError> {
        let response = self
            .send(
                self.http
                    .get(self.url(&format!("/rest/api/space/{space_key}/permission"))),
            )
            .await?;
        Ok(response.json().await?)
    }

    pub async fn create_space(
        &self,
        key: &str,
        name: &str,
        description: &str,
    ) -> Result<Space, ConfluenceError> {
        debug!(space_key = %key, "Creating Confluence space");
        let response = self
            .send(self.http.post(self.url("/rest/api/space")).json(&json!({
                "key": key,
                "name": name,
                "description": {
                    "plain": { "value": description, "representation": "plain" }
                },
                "type": "global"
            })))
            .await?;
        Ok(response.json().await?)
    }

    pub async fn grant_space_permissions(
        &self,
        space_key: &str,
        group: &str,
        grants: &[PermissionGrant],
    ) -> Result<(), ConfluenceError> {
        debug!(space_key = %space_key, group = %group, grants = grants.len(), "Granting space permissions");
        self.send(
            self.http
                .put(self.url(&format!(
                    "/rest/api/space/{space_key}/permissions/group/{group}/grant"
                )))
                .json(grants),
        )
        .await?;
        Ok(())
    }

    // --- content ---

    pub async fn get_page(&self, page_id: &str) -> Result<Page, ConfluenceError> {
        let response = self
            .send(
                self.http
                    .get(self.url(&format!("/rest/api/content/{page_id}")))
                    .query(&[("expand", "body.storage,version")]),
            )
            .await?;
        Ok(response.json().await?)
    }

    pub async fn update_page_body(
        &self,
        page_id: &str,
        title: &str,
        body: &str,
        next_version: u64,
        message: &str,
    ) -> Result<(), ConfluenceError> {
        debug!(page_id = %page_id, next_version, "Updating page body");
        self.send(
            self.http
                .put(self.url(&format!("/rest/api/content/{page_id}")))
                .json(&json!({
                    "version": { "number": next_version, "message": message },
                    "title": title,
                    "type": "page",
                    "body": {
                        "storage": { "value": body, "representation": "storage" }
                    }
                })),
        )
        .await?;
        Ok(())
    }

    // --- webhooks ---

    pub async fn list_webhooks(&self) -> Result<Vec<Webhook>, ConfluenceError> {
        let response = self.send(self.http.get(self.url("/rest/api/webhooks"))).await?;
        let page: ResultsPage<Webhook> = response.json().await?;
        Ok(page.results)
    }

    pub async fn create_webhook(
        &self,
        name: &str,
        url: &str,
        events: &[&str],
    ) -> Result<(), ConfluenceError> {
        debug!(name = %name, url = %url, "Registering webhook");
        self.send(self.http.post(self.url("/rest/api/webhooks")).json(&json!({
            "name": name,
            "url": url,
            "events": events,
            "active": true
        })))
        .await?;
        Ok(())
    }
}
