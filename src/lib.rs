// Quartermaster Library - Confluence Access & Space Provisioning
// This exposes the core components for testing and integration

pub mod config;
pub mod confluence;
pub mod events;
pub mod provisioning;
pub mod scanner;
pub mod server;
pub mod store;
pub mod telemetry;
pub mod vault;
pub mod webhooks;

// Re-export key types for easy access
pub use config::{config, init_config, QuartermasterConfig};
pub use confluence::{ConfluenceClient, ConfluenceError};
pub use events::{EventBus, RequestEvent, RequestEventKind};
pub use provisioning::{
    AccessGrant, AccessLevel, AccessReconciler, AccessRequest, SpaceOutcome, SpaceReconciler,
    SpaceRequest, WorkflowRunner,
};
pub use server::{serve, AppState};
pub use store::{
    PersistenceError, RequestKind, RequestRecord, RequestStats, RequestStatus, RequestStore,
};
pub use telemetry::{generate_correlation_id, init_telemetry, shutdown_telemetry};
pub use vault::{Credentials, VaultClient, VaultError};
pub use webhooks::register_scanner_webhooks;
