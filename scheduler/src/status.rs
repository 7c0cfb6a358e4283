use crate::errors::StatusStoreError;
use crate::files::{read_json_or_default, write_json_atomic};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Outcome history of one sync job.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncJobMetadata {
    pub job_id: String,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
}

impl SyncJobMetadata {
    pub fn new(job_id: &str) -> Self {
        SyncJobMetadata {
            job_id: job_id.to_string(),
            ..Default::default()
        }
    }

    pub fn record_success(&mut self, started_at: DateTime<Utc>, finished_at: DateTime<Utc>) {
        self.last_run_at = Some(started_at);
        self.last_success_at = Some(finished_at);
        self.last_error = None;
        self.consecutive_failures = 0;
    }

    pub fn record_failure(&mut self, started_at: DateTime<Utc>, error: &str) {
        self.last_run_at = Some(started_at);
        self.last_error = Some(error.to_string());
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }
}

pub trait SyncStatusStore: Send + Sync {
    fn load(&self, job_id: &str) -> Result<Option<SyncJobMetadata>, StatusStoreError>;
    fn save(&self, metadata: &SyncJobMetadata) -> Result<(), StatusStoreError>;
    /// Every known job, ordered by job id.
    fn all(&self) -> Result<Vec<SyncJobMetadata>, StatusStoreError>;
}

#[derive(Default)]
pub struct MemorySyncStatusStore {
    jobs: RwLock<BTreeMap<String, SyncJobMetadata>>,
}

impl MemorySyncStatusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SyncStatusStore for MemorySyncStatusStore {
    fn load(&self, job_id: &str) -> Result<Option<SyncJobMetadata>, StatusStoreError> {
        Ok(self.jobs.read().get(job_id).cloned())
    }

    fn save(&self, metadata: &SyncJobMetadata) -> Result<(), StatusStoreError> {
        self.jobs
            .write()
            .insert(metadata.job_id.clone(), metadata.clone());
        Ok(())
    }

    fn all(&self) -> Result<Vec<SyncJobMetadata>, StatusStoreError> {
        Ok(self.jobs.read().values().cloned().collect())
    }
}

/// Keeps all jobs in one JSON object keyed by job id.
pub struct FilesystemSyncStatusStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within the process.
    lock: Mutex<()>,
}

impl FilesystemSyncStatusStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        FilesystemSyncStatusStore {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn read(&self) -> Result<BTreeMap<String, SyncJobMetadata>, StatusStoreError> {
        read_json_or_default(&self.path)
    }
}

impl SyncStatusStore for FilesystemSyncStatusStore {
    fn load(&self, job_id: &str) -> Result<Option<SyncJobMetadata>, StatusStoreError> {
        let _guard = self.lock.lock();
        Ok(self.read()?.remove(job_id))
    }

    fn save(&self, metadata: &SyncJobMetadata) -> Result<(), StatusStoreError> {
        let _guard = self.lock.lock();
        let mut jobs = self.read()?;
        jobs.insert(metadata.job_id.clone(), metadata.clone());
        write_json_atomic(&self.path, &jobs)
    }

    fn all(&self) -> Result<Vec<SyncJobMetadata>, StatusStoreError> {
        let _guard = self.lock.lock();
        Ok(self.read()?.into_values().collect())
    }
}
