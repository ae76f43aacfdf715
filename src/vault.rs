use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::config::VaultConfig;

/// Errors from the Vault credential provider. All of them are fatal at
/// startup: without Confluence credentials the service must not come up.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Vault transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Vault returned HTTP {status} for {path}")]
    Status { status: StatusCode, path: String },

    #[error("Vault token is not configured (set vault.token or VAULT_TOKEN)")]
    MissingToken,

    #[error("Secret at {0} is missing username/password fields")]
    MalformedSecret(String),
}

/// Confluence service-account credentials.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
struct KvReadResponse {
    data: KvData,
}

#[derive(Debug, Deserialize)]
struct KvData {
    data: serde_json::Map<String, serde_json::Value>,
}

/// Minimal Vault KV v2 client: one secret read, nothing more.
#[derive(Debug)]
pub struct VaultClient {
    http: reqwest::Client,
    addr: String,
    token: String,
    mount: String,
    secret_path: String,
}

impl VaultClient {
    pub fn from_config(config: &VaultConfig) -> Result<Self, VaultError> {
        let token = config.token.clone().ok_or(VaultError::MissingToken)?;
        Ok(Self {
            http: reqwest::Client::new(),
            addr: config.addr.trim_end_matches('/').to_string(),
            token,
            mount: config.mount.clone(),
            secret_path: config.secret_path.clone(),
        })
    }

    /// Read the Confluence username/password from the configured KV v2 secret.
    pub async fn get_credentials(&self) -> Result<Credentials, VaultError> {
        let path = format!("{}/v1/{}/data/{}", self.addr, self.mount, self.secret_path);
        let response = self
            .http
            .get(&path)
            .header("X-Vault-Token", &self.token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(VaultError::Status {
                status: response.status(),
                path,
            });
        }

        let body: KvReadResponse = response.json().await?;
        let field = |name: &str| {
            body.data
                .data
                .get(name)
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };
        match (field("username"), field("password")) {
            (Some(username), Some(password)) => {
                info!(username = %username, "Fetched Confluence credentials from Vault");
                Ok(Credentials { username, password })
            }
            _ => Err(VaultError::MalformedSecret(self.secret_path.clone())),
        }
    }
}
