//! Scheduled ingestion.
//!
//! The [`Orchestrator`] runs each registered [`IngestionTask`] on its cron
//! cadence, never more than one run per job at a time, retries a failed run
//! once after a cooldown, and records every run in the sync status store.

pub mod cadence;
pub mod config;
pub mod errors;
mod files;
pub mod ingestion;
pub mod metrics_defs;
pub mod orchestrator;
pub mod records;
pub mod status;

pub use cadence::Cadence;
pub use config::SchedulerConfig;
pub use errors::{IngestionError, OrchestratorError, RecordStoreError, StatusStoreError};
pub use ingestion::{CatalogIngestion, IngestionStats, IngestionTask, ReportIngestion};
pub use orchestrator::{Orchestrator, RunOutcome, TriggerKind};
pub use records::{FilesystemRecordStore, MemoryRecordStore, RecordStore};
pub use status::{
    FilesystemSyncStatusStore, MemorySyncStatusStore, SyncJobMetadata, SyncStatusStore,
};

/// Job id of the shortage and discontinuance report sync.
pub const DSC_JOB: &str = "dsc";
/// Job id of the drug product catalog sync.
pub const DPD_JOB: &str = "dpd";
