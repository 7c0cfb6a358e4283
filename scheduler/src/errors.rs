use dsc_client::ClientError;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum OrchestratorError {
    #[error("unknown job: {0}")]
    UnknownJob(String),

    #[error("sync run for {job} ended abnormally: {reason}")]
    RunAborted { job: String, reason: String },
}

#[derive(thiserror::Error, Debug)]
pub enum IngestionError {
    #[error("upstream error: {0}")]
    Upstream(#[from] ClientError),

    #[error("record store error: {0}")]
    Store(#[from] RecordStoreError),

    #[error("ingestion task aborted: {0}")]
    Aborted(String),
}

#[derive(thiserror::Error, Debug)]
pub enum StatusStoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid status file: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum RecordStoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid record file: {0}")]
    Json(#[from] serde_json::Error),
}
