use reqwest::StatusCode;

#[derive(thiserror::Error, Debug)]
pub enum NotifyError {
    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("webhook returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("audit log I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not encode event: {0}")]
    Encode(#[from] serde_json::Error),
}
