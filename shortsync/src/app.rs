use crate::config::{Config, ConfigError};
use dsc_client::config::{CredentialsError, credentials_from_env};
use dsc_client::{ClientError, ShortageClient};
use gateway::errors::GatewayError;
use notifier::{Dispatcher, NotifyError};
use scheduler::{
    CatalogIngestion, DPD_JOB, DSC_JOB, FilesystemRecordStore, FilesystemSyncStatusStore,
    IngestionError, IngestionTask, Orchestrator, OrchestratorError, RecordStore, ReportIngestion,
    RunOutcome, SyncStatusStore, TriggerKind,
};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("could not load upstream credentials: {0}")]
    Credentials(#[from] CredentialsError),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Ingestion(#[from] IngestionError),
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
    #[error("could not set up notifications: {0}")]
    Notify(#[from] NotifyError),
    #[error("gateway stopped: {0}")]
    Gateway(#[from] GatewayError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Builds the ingestion task for one job. Only the report sync talks to the
/// authenticated API, so only it needs credentials.
fn build_task(
    config: &Config,
    job: &str,
    records: Arc<dyn RecordStore>,
) -> Result<Arc<dyn IngestionTask>, AppError> {
    let ingestion = &config.scheduler.ingestion;
    match job {
        DSC_JOB => {
            let credentials = credentials_from_env(&config.upstream.credentials_env)?;
            let client = ShortageClient::new(&config.upstream, credentials)?;
            tracing::info!(accounts = client.pool_size(), "upstream credentials loaded");
            Ok(Arc::new(ReportIngestion::new(
                client,
                records,
                ingestion.page_size,
            )))
        }
        DPD_JOB => {
            let catalog_url = ingestion
                .catalog_url()
                .map_err(|e| ConfigError::invalid("scheduler", e))?;
            Ok(Arc::new(CatalogIngestion::new(
                &catalog_url,
                &config.upstream,
                records,
            )?))
        }
        other => Err(OrchestratorError::UnknownJob(other.to_string()).into()),
    }
}

pub fn build_orchestrator(config: &Config, jobs: &[&str]) -> Result<Orchestrator, AppError> {
    let storage = &config.scheduler.storage;
    let records: Arc<dyn RecordStore> =
        Arc::new(FilesystemRecordStore::new(storage.records_dir.clone()));
    let status: Arc<dyn SyncStatusStore> =
        Arc::new(FilesystemSyncStatusStore::new(storage.status_path.clone()));

    let mut tasks = HashMap::new();
    for job in jobs {
        tasks.insert(job.to_string(), build_task(config, job, records.clone())?);
    }

    let dispatcher = Arc::new(Dispatcher::from_config(&config.notifier)?);
    Ok(Orchestrator::new(
        tasks,
        status,
        dispatcher,
        config.scheduler.retry_cooldown(),
    ))
}

/// Runs the schedules and the gateway until the process is told to stop.
pub async fn run(config: Config) -> Result<(), AppError> {
    let schedules = config
        .scheduler
        .schedules()
        .map_err(|e| ConfigError::invalid("scheduler", e))?;
    let orchestrator = build_orchestrator(&config, &[DSC_JOB, DPD_JOB])?;

    orchestrator.start(schedules)?;
    tracing::info!(jobs = ?orchestrator.jobs(), "scheduler started");

    let result = tokio::select! {
        res = gateway::run(config.gateway.clone(), orchestrator.clone()) => res.map_err(AppError::from),
        res = shutdown_signal() => {
            tracing::info!("shutdown requested");
            res.map_err(AppError::from)
        }
    };

    orchestrator.shutdown();
    result
}

/// Runs one job once. The process exits right after, so a retry scheduled
/// by a failed run is cancelled rather than awaited.
pub async fn sync(config: Config, job: &str) -> Result<RunOutcome, AppError> {
    let orchestrator = build_orchestrator(&config, &[job])?;
    let outcome = orchestrator.trigger(job, TriggerKind::Manual).await?;
    orchestrator.shutdown();
    Ok(outcome)
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
