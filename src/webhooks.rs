use tracing::{info, warn};

use crate::confluence::{ConfluenceClient, ConfluenceError};

const SCANNER_HOOKS: [(&str, &str); 2] = [
    ("page_created", "/webhook/page-created"),
    ("page_updated", "/webhook/page-updated"),
];

/// Idempotent one-time setup: register the secret-scanner webhooks with
/// Confluence unless hooks named for the scanner are already present.
pub async fn register_scanner_webhooks(
    client: &ConfluenceClient,
    public_url: &str,
) -> Result<(), ConfluenceError> {
    let existing = client.list_webhooks().await?;
    for hook in &existing {
        info!(name = %hook.name, url = %hook.url, "Found registered webhook");
    }

    if existing.iter().any(|h| h.name.contains("Scanner")) {
        info!("Scanner webhooks already registered; nothing to do");
        return Ok(());
    }

    let base = public_url.trim_end_matches('/');
    for (event, endpoint) in SCANNER_HOOKS {
        let name = format!("Scanner - {event}");
        let url = format!("{base}{endpoint}");
        match client.create_webhook(&name, &url, &[event]).await {
            Ok(()) => info!(name = %name, "Webhook registered"),
            Err(e) => warn!(name = %name, error = %e, "Webhook registration failed"),
        }
    }
    Ok(())
}
