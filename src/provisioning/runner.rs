use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn, Instrument};

use super::access::{AccessReconciler, AccessRequest};
use super::space::{SpaceOutcome, SpaceReconciler, SpaceRequest};
use crate::confluence::ConfluenceClient;
use crate::config::ProvisioningConfig;
use crate::events::EventBus;
use crate::store::{PersistenceError, RequestKind, RequestRecord, RequestStatus, RequestStore};

/// Walks each request through `pending -> processing -> terminal`.
///
/// Submission persists the record and returns immediately; reconciliation
/// runs on a spawned worker task per request, bounded by a semaphore so a
/// burst of submissions cannot open unbounded connections to Confluence.
/// The runner is the only mutator of request records.
#[derive(Clone)]
pub struct WorkflowRunner {
    store: Arc<RequestStore>,
    bus: EventBus,
    client: Arc<ConfluenceClient>,
    settings: Arc<ProvisioningConfig>,
    jobs: Arc<Semaphore>,
}

impl WorkflowRunner {
    pub fn new(
        store: Arc<RequestStore>,
        bus: EventBus,
        client: Arc<ConfluenceClient>,
        settings: ProvisioningConfig,
    ) -> Self {
        let jobs = Arc::new(Semaphore::new(settings.max_concurrent_jobs));
        Self {
            store,
            bus,
            client,
            settings: Arc::new(settings),
            jobs,
        }
    }

    pub async fn submit_access(
        &self,
        request: &AccessRequest,
    ) -> Result<RequestRecord, PersistenceError> {
        let payload = to_payload_map(serde_json::to_value(request)?);
        let record = self.store.create(RequestKind::Access, payload).await?;
        info!(request_id = %record.id, "Accepted access request");
        self.bus.publish_created(&record);
        self.schedule(record.id);
        Ok(record)
    }

    pub async fn submit_space_creation(
        &self,
        request: &SpaceRequest,
    ) -> Result<RequestRecord, PersistenceError> {
        let payload = to_payload_map(serde_json::to_value(request)?);
        let record = self.store.create(RequestKind::SpaceCreation, payload).await?;
        info!(request_id = %record.id, space_key = %request.space_key, "Accepted space-creation request");
        self.bus.publish_created(&record);
        self.schedule(record.id);
        Ok(record)
    }

    fn schedule(&self, id: u64) {
        let runner = self.clone();
        let span = crate::telemetry::create_request_span("reconcile", Some(id));
        tokio::spawn(
            async move {
                runner.run(id).await;
            }
            .instrument(span),
        );
    }

    async fn run(&self, id: u64) {
        let _permit = match self.jobs.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return, // semaphore closed: shutting down
        };

        let record = match self.store.get(id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                // Should not happen under the single-writer discipline.
                warn!(request_id = %id, "Record disappeared before execution");
                return;
            }
            Err(e) => {
                error!(request_id = %id, error = %e, "Could not load record for execution");
                return;
            }
        };

        // Terminal records are never re-processed.
        if record.status != RequestStatus::Pending {
            warn!(request_id = %id, status = ?record.status, "Skipping non-pending record");
            return;
        }

        // Observers see work start before any Confluence call is made.
        if self
            .persist_and_broadcast(id, |r| r.status = RequestStatus::Processing)
            .await
            .is_none()
        {
            return;
        }

        match record.kind {
            RequestKind::Access => self.run_access(id, &record.payload).await,
            RequestKind::SpaceCreation => self.run_space_creation(id, &record.payload).await,
        }
    }

    async fn run_access(&self, id: u64, payload: &Map<String, Value>) {
        let request: AccessRequest = match serde_json::from_value(Value::Object(payload.clone())) {
            Ok(request) => request,
            Err(e) => {
                self.persist_and_broadcast(id, |r| {
                    r.status = RequestStatus::Failed;
                    r.error = Some(format!("Invalid access payload: {e}"));
                })
                .await;
                return;
            }
        };

        let reconciler = AccessReconciler::new(&self.client, &self.settings);
        match reconciler.grant_access(&request).await {
            Ok(grant) => {
                let result = json!({
                    "status": "success",
                    "username": grant.username,
                    "access_granted": grant.access_granted,
                    "group": grant.group,
                });
                let advisories = grant.advisories;
                self.persist_and_broadcast(id, move |r| {
                    r.status = RequestStatus::Completed;
                    r.comments.extend(advisories);
                    r.result = Some(result);
                })
                .await;
            }
            Err(e) => {
                let message = e.to_string();
                self.persist_and_broadcast(id, move |r| {
                    r.status = RequestStatus::Failed;
                    r.error = Some(message);
                })
                .await;
            }
        }
    }

    async fn run_space_creation(&self, id: u64, payload: &Map<String, Value>) {
        let request: SpaceRequest = match serde_json::from_value(Value::Object(payload.clone())) {
            Ok(request) => request,
            Err(e) => {
                self.persist_and_broadcast(id, |r| {
                    r.status = RequestStatus::Failed;
                    r.error = Some(format!("Invalid space payload: {e}"));
                })
                .await;
                return;
            }
        };

        let reconciler = SpaceReconciler::new(&self.client, &self.settings);
        match reconciler.create_space(&request).await {
            SpaceOutcome::Created {
                space_url,
                space_key,
                comments,
            } => {
                let result = json!({
                    "status": "success",
                    "comments": comments.clone(),
                    "space_url": space_url,
                    "space_key": space_key,
                });
                self.persist_and_broadcast(id, move |r| {
                    r.status = RequestStatus::Completed;
                    r.comments.extend(comments);
                    r.result = Some(result);
                })
                .await;
            }
            SpaceOutcome::Blocked { comments } => {
                let result = json!({ "status": "blocked", "comments": comments.clone() });
                self.persist_and_broadcast(id, move |r| {
                    r.status = RequestStatus::Blocked;
                    r.comments.extend(comments);
                    r.result = Some(result);
                })
                .await;
            }
            SpaceOutcome::Failed { error } => {
                self.persist_and_broadcast(id, move |r| {
                    r.status = RequestStatus::Failed;
                    r.error = Some(error);
                    r.result = Some(json!({ "status": "failed" }));
                })
                .await;
            }
        }
    }

    /// Persist a transition and broadcast the updated record. A persistence
    /// failure is fatal to this request's execution, not to the service.
    async fn persist_and_broadcast<F>(&self, id: u64, mutate: F) -> Option<RequestRecord>
    where
        F: FnOnce(&mut RequestRecord),
    {
        match self.store.update(id, mutate).await {
            Ok(record) => {
                self.bus.publish_updated(&record);
                Some(record)
            }
            Err(e) => {
                error!(request_id = %id, error = %e, "Failed to persist request transition");
                None
            }
        }
    }
}

fn to_payload_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => {
            // Payloads are always objects; anything else is a programming error
            // worth keeping visible rather than panicking over.
            let mut map = Map::new();
            map.insert("payload".to_string(), other);
            map
        }
    }
}
