use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure for Quartermaster
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QuartermasterConfig {
    /// HTTP server settings
    pub server: ServerConfig,
    /// Confluence connection settings
    pub confluence: ConfluenceConfig,
    /// Vault (credential provider) settings
    pub vault: VaultConfig,
    /// Request store settings
    pub store: StoreConfig,
    /// Provisioning workflow settings
    pub provisioning: ProvisioningConfig,
    /// Observability settings
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Address the API server binds to
    pub bind: String,
    /// Externally reachable base URL of this service (used when registering webhooks)
    pub public_url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConfluenceConfig {
    /// Base URL of the Confluence instance
    pub base_url: String,
    /// Per-request timeout for outbound Confluence calls, in seconds.
    /// A hung call must not stall a worker indefinitely.
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VaultConfig {
    /// Vault address
    pub addr: String,
    /// Vault token (can be set via VAULT_TOKEN env var)
    pub token: Option<String>,
    /// KV v2 mount point
    pub mount: String,
    /// Secret path holding the Confluence username/password
    pub secret_path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    /// Path to the request history JSON file
    pub path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProvisioningConfig {
    /// Organizational domain whose users are addressed by LAN ID instead of email.
    /// A closed two-branch rule: any new domain needs an explicit rule here,
    /// not a silent default.
    pub internal_domain: String,
    /// Confluence group that carries a license seat
    pub licensed_group: String,
    /// Upper bound on concurrently reconciling requests
    pub max_concurrent_jobs: usize,
    /// Read-back attempts while waiting for a new space's groups to propagate
    pub settle_max_attempts: u32,
    /// Initial delay between settle read-backs, doubled each attempt
    pub settle_initial_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level
    pub log_level: String,
}

impl Default for QuartermasterConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind: "127.0.0.1:5001".to_string(),
                public_url: "http://127.0.0.1:5001".to_string(),
            },
            confluence: ConfluenceConfig {
                base_url: "http://localhost:8090".to_string(),
                request_timeout_seconds: 30,
            },
            vault: VaultConfig {
                addr: "http://127.0.0.1:8200".to_string(),
                token: None, // Will be read from VAULT_TOKEN env var
                mount: "kv".to_string(),
                secret_path: "confluence".to_string(),
            },
            store: StoreConfig {
                path: ".quartermaster/requests.json".to_string(),
            },
            provisioning: ProvisioningConfig {
                internal_domain: "r1-core".to_string(),
                licensed_group: "confluence-users".to_string(),
                max_concurrent_jobs: 8,
                settle_max_attempts: 5,
                settle_initial_delay_ms: 250,
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
            },
        }
    }
}

impl QuartermasterConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration file (quartermaster.toml)
    /// 3. Environment variables (prefixed with QUARTERMASTER__)
    pub fn load() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if Path::new("quartermaster.toml").exists() {
            builder = builder.add_source(File::with_name("quartermaster"));
        }

        builder = builder.add_source(
            Environment::with_prefix("QUARTERMASTER")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        let mut quartermaster_config: QuartermasterConfig = config.try_deserialize()?;

        // Special handling for the Vault token - check the conventional env var
        if quartermaster_config.vault.token.is_none() {
            if let Ok(token) = std::env::var("VAULT_TOKEN") {
                quartermaster_config.vault.token = Some(token);
            }
        }

        Ok(quartermaster_config)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}

/// Global configuration instance
static CONFIG: std::sync::LazyLock<Result<QuartermasterConfig, anyhow::Error>> =
    std::sync::LazyLock::new(|| {
        // Load .env file first
        let _ = QuartermasterConfig::load_env_file();
        QuartermasterConfig::load()
    });

/// Get the global configuration
pub fn config() -> Result<&'static QuartermasterConfig> {
    CONFIG
        .as_ref()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
}

/// Initialize configuration (called at startup)
pub fn init_config() -> Result<()> {
    let _config = config()?;
    tracing::info!("Configuration loaded successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_section() {
        let cfg = QuartermasterConfig::default();
        assert_eq!(cfg.provisioning.internal_domain, "r1-core");
        assert_eq!(cfg.provisioning.licensed_group, "confluence-users");
        assert!(cfg.provisioning.max_concurrent_jobs > 0);
        assert!(cfg.confluence.request_timeout_seconds > 0);
    }

    #[test]
    fn config_round_trips_through_toml() {
        let cfg = QuartermasterConfig::default();
        let toml_content = toml::to_string_pretty(&cfg).unwrap();
        let parsed: QuartermasterConfig = toml::from_str(&toml_content).unwrap();
        assert_eq!(parsed.server.bind, cfg.server.bind);
        assert_eq!(parsed.store.path, cfg.store.path);
    }
}
