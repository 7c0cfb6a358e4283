use scheduler::StatusStoreError;

#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("status store error: {0}")]
    Status(#[from] StatusStoreError),
}
