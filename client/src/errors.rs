use reqwest::StatusCode;

/// Result type alias for upstream client operations
pub type Result<T, E = ClientError> = std::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    /// The upstream rejected the credential or session (401/403).
    #[error("authentication failed ({status}): {body}")]
    AuthFailure { status: StatusCode, body: String },

    #[error("rate limited by upstream")]
    RateLimited,

    #[error("network error: {0}")]
    TransientNetwork(String),

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("upstream server error ({status}): {body}")]
    UpstreamServerError { status: StatusCode, body: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("all credentials exhausted")]
    AllCredentialsExhausted,

    #[error("no credentials configured")]
    NoCredentials,

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("unexpected status {status}: {body}")]
    UnexpectedStatus { status: StatusCode, body: String },

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl ClientError {
    /// Classifies a non-success HTTP status.
    pub fn from_status(status: StatusCode, body: String) -> Self {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                ClientError::AuthFailure { status, body }
            }
            StatusCode::TOO_MANY_REQUESTS => ClientError::RateLimited,
            StatusCode::NOT_FOUND => ClientError::NotFound(body),
            s if s.is_server_error() => ClientError::UpstreamServerError { status, body },
            _ => ClientError::UnexpectedStatus { status, body },
        }
    }

    /// Failures worth retrying against the same credential after a backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::RateLimited
                | ClientError::TransientNetwork(_)
                | ClientError::Timeout(_)
                | ClientError::UpstreamServerError { .. }
        )
    }

    /// Failures that are resolved by switching to another account.
    pub fn needs_rotation(&self) -> bool {
        matches!(
            self,
            ClientError::AuthFailure { .. } | ClientError::RateLimited
        )
    }

    /// Short stable label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientError::AuthFailure { .. } => "auth_failure",
            ClientError::RateLimited => "rate_limited",
            ClientError::TransientNetwork(_) => "network",
            ClientError::Timeout(_) => "timeout",
            ClientError::UpstreamServerError { .. } => "server_error",
            ClientError::MalformedResponse(_) => "malformed",
            ClientError::AllCredentialsExhausted => "credentials_exhausted",
            ClientError::NoCredentials => "no_credentials",
            ClientError::NotFound(_) => "not_found",
            ClientError::UnexpectedStatus { .. } => "unexpected_status",
            ClientError::InvalidUrl(_) => "invalid_url",
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClientError::MalformedResponse(err.to_string())
        } else {
            ClientError::TransientNetwork(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let err = ClientError::from_status(StatusCode::UNAUTHORIZED, "bad credentials".into());
        assert!(matches!(err, ClientError::AuthFailure { .. }));
        assert!(err.needs_rotation());
        assert!(!err.is_retryable());

        let err = ClientError::from_status(StatusCode::TOO_MANY_REQUESTS, String::new());
        assert!(matches!(err, ClientError::RateLimited));
        assert!(err.needs_rotation());

        let err = ClientError::from_status(StatusCode::SERVICE_UNAVAILABLE, String::new());
        assert!(err.is_retryable());
        assert!(!err.needs_rotation());

        let err = ClientError::from_status(StatusCode::NOT_FOUND, "/shortages/1".into());
        assert!(matches!(err, ClientError::NotFound(_)));
        assert!(!err.is_retryable());

        let err = ClientError::from_status(StatusCode::BAD_REQUEST, String::new());
        assert!(matches!(err, ClientError::UnexpectedStatus { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_terminal_errors() {
        assert!(!ClientError::MalformedResponse("eof".into()).is_retryable());
        assert!(!ClientError::AllCredentialsExhausted.is_retryable());
        assert!(ClientError::Timeout(30).is_retryable());
    }
}
