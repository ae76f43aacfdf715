use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;

use quartermaster::config::{config, init_config};
use quartermaster::confluence::ConfluenceClient;
use quartermaster::events::EventBus;
use quartermaster::provisioning::WorkflowRunner;
use quartermaster::server::{self, AppState};
use quartermaster::store::RequestStore;
use quartermaster::telemetry::{init_telemetry, shutdown_telemetry};
use quartermaster::vault::VaultClient;
use quartermaster::webhooks::register_scanner_webhooks;

#[derive(Parser)]
#[command(name = "quartermaster")]
#[command(about = "Confluence access & space provisioning service")]
#[command(
    long_about = "Quartermaster takes access and space-creation requests over HTTP, \
                  reconciles them asynchronously against Confluence, and broadcasts \
                  live request status to connected observers."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the provisioning API server (default)
    Serve {
        /// Override the configured bind address
        #[arg(long, help = "Address to bind, e.g. 0.0.0.0:5001")]
        bind: Option<String>,
    },
    /// Register the secret-scanner webhooks with Confluence (idempotent)
    SetupWebhooks,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None => tokio::runtime::Runtime::new()?.block_on(async { serve_command(None).await }),
        Some(Commands::Serve { bind }) => {
            tokio::runtime::Runtime::new()?.block_on(async { serve_command(bind).await })
        }
        Some(Commands::SetupWebhooks) => {
            tokio::runtime::Runtime::new()?.block_on(async { setup_webhooks_command().await })
        }
    }
}

/// Build the Confluence client from Vault-held credentials. Credential
/// failure is fatal: the service must not come up without them.
async fn build_confluence_client() -> Result<ConfluenceClient> {
    let cfg = config()?;
    let credentials = VaultClient::from_config(&cfg.vault)?
        .get_credentials()
        .await
        .context("Vault credentials are required to start")?;
    let client = ConfluenceClient::new(
        &cfg.confluence.base_url,
        &credentials,
        Duration::from_secs(cfg.confluence.request_timeout_seconds),
    )?;
    Ok(client)
}

async fn serve_command(bind: Option<String>) -> Result<()> {
    init_telemetry()?;
    init_config()?;
    let cfg = config()?;

    let client = Arc::new(build_confluence_client().await?);
    let store = Arc::new(RequestStore::new(cfg.store.path.clone()));
    let bus = EventBus::default();
    let runner = WorkflowRunner::new(
        store.clone(),
        bus.clone(),
        client.clone(),
        cfg.provisioning.clone(),
    );

    let state = AppState {
        runner,
        store,
        bus,
        client,
    };
    let bind = bind.unwrap_or_else(|| cfg.server.bind.clone());
    server::serve(&bind, state).await
}

async fn setup_webhooks_command() -> Result<()> {
    init_telemetry()?;
    init_config()?;
    let cfg = config()?;

    let client = build_confluence_client().await?;
    register_scanner_webhooks(&client, &cfg.server.public_url).await?;
    println!("Webhook setup complete.");
    shutdown_telemetry();
    Ok(())
}
