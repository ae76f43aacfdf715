use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

/// Errors that can occur while reading or writing the request history.
/// Fatal to the operation in progress, not to the whole service.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Request {0} not found")]
    NotFound(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Access,
    SpaceCreation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Blocked,
}

impl RequestStatus {
    /// Terminal statuses are never left again; the runner refuses to
    /// re-process a record that reached one.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Completed | RequestStatus::Failed | RequestStatus::Blocked
        )
    }
}

/// One provisioning request and its full lifecycle state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    pub id: u64,
    pub kind: RequestKind,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub payload: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<String>,
}

/// Per-status request counts, recomputed on demand from the full store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestStats {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub blocked: usize,
}

/// Durable, append-mostly request history backed by a JSON file.
///
/// Every mutation runs a read-entire-file / modify-in-memory / write-entire-file
/// cycle under a single process-wide lock, so mutations are atomic with
/// respect to each other at the cost of O(history) work per write. Records
/// are never deleted.
#[derive(Debug)]
pub struct RequestStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl RequestStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Vec<RequestRecord>, PersistenceError> {
        match fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, records: &[RequestRecord]) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let bytes = serde_json::to_vec_pretty(records)?;
        fs::write(&self.path, bytes).await?;
        Ok(())
    }

    /// Append a new record with the next id (1 + max existing id, or 1 when
    /// the history is empty). Ids are assigned once and never reused.
    pub async fn create(
        &self,
        kind: RequestKind,
        payload: Map<String, Value>,
    ) -> Result<RequestRecord, PersistenceError> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.load().await?;
        let next_id = records.iter().map(|r| r.id).max().unwrap_or(0) + 1;
        let now = Utc::now();
        let record = RequestRecord {
            id: next_id,
            kind,
            status: RequestStatus::Pending,
            created_at: now,
            updated_at: now,
            payload,
            result: None,
            error: None,
            comments: Vec::new(),
        };
        records.push(record.clone());
        self.save(&records).await?;
        debug!(request_id = %next_id, "Persisted new request record");
        Ok(record)
    }

    pub async fn get(&self, id: u64) -> Result<Option<RequestRecord>, PersistenceError> {
        let records = self.load().await?;
        Ok(records.into_iter().find(|r| r.id == id))
    }

    /// Apply `mutate` to the record with the given id and persist the result.
    /// `updated_at` is stamped here so callers cannot forget it.
    pub async fn update<F>(&self, id: u64, mutate: F) -> Result<RequestRecord, PersistenceError>
    where
        F: FnOnce(&mut RequestRecord),
    {
        let _guard = self.write_lock.lock().await;
        let mut records = self.load().await?;
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(PersistenceError::NotFound(id))?;
        mutate(record);
        record.updated_at = Utc::now();
        let updated = record.clone();
        self.save(&records).await?;
        Ok(updated)
    }

    pub async fn list(&self) -> Result<Vec<RequestRecord>, PersistenceError> {
        self.load().await
    }

    /// Aggregate counts by status. Invariant: the per-status counts sum to
    /// the total record count.
    pub async fn stats(&self) -> Result<RequestStats, PersistenceError> {
        let records = self.load().await?;
        let mut stats = RequestStats {
            total: records.len(),
            ..Default::default()
        };
        for record in &records {
            match record.status {
                RequestStatus::Pending => stats.pending += 1,
                RequestStatus::Processing => stats.processing += 1,
                RequestStatus::Completed => stats.completed += 1,
                RequestStatus::Failed => stats.failed += 1,
                RequestStatus::Blocked => stats.blocked += 1,
            }
        }
        Ok(stats)
    }
}
