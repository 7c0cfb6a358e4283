use serde::Deserialize;
use std::time::Duration;
use url::Url;

use crate::backoff::Backoff;

#[derive(thiserror::Error, Debug)]
pub enum CredentialsError {
    #[error("environment variable {0} is not set")]
    MissingEnv(String),
    #[error("could not parse credentials: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("credential list is empty")]
    Empty,
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("max_attempts must be at least 1")]
    InvalidMaxAttempts,
    #[error("login_attempts must be at least 1")]
    InvalidLoginAttempts,
    #[error("request timeout cannot be 0")]
    InvalidTimeout,
    #[error("backoff max_delay_ms must not be below base_delay_ms")]
    InvalidBackoff,
    #[error("base_url must use http or https, got {0}")]
    InvalidScheme(String),
}

/// One account on the upstream service.
#[derive(Clone, Deserialize, PartialEq, Eq)]
pub struct Credential {
    pub email: String,
    pub password: String,
}

impl Credential {
    pub fn new<E: Into<String>, P: Into<String>>(email: E, password: P) -> Self {
        Credential {
            email: email.into(),
            password: password.into(),
        }
    }
}

// Keep passwords out of logs.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Parses the JSON account list, e.g. `[{"email": "a@b.c", "password": "..."}]`.
pub fn parse_credentials(raw: &str) -> Result<Vec<Credential>, CredentialsError> {
    let credentials: Vec<Credential> = serde_json::from_str(raw)?;
    if credentials.is_empty() {
        return Err(CredentialsError::Empty);
    }
    Ok(credentials)
}

pub fn credentials_from_env(var: &str) -> Result<Vec<Credential>, CredentialsError> {
    let raw = std::env::var(var).map_err(|_| CredentialsError::MissingEnv(var.to_string()))?;
    parse_credentials(&raw)
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct BackoffConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_jitter_ms() -> u64 {
    250
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

impl From<&BackoffConfig> for Backoff {
    fn from(config: &BackoffConfig) -> Self {
        Backoff::new(
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            Duration::from_millis(config.jitter_ms),
        )
    }
}

/// Upstream API client configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ClientConfig {
    /// Base URL of the upstream API, e.g. "https://www.drugshortagescanada.ca/api/v1"
    pub base_url: Url,
    /// Name of the environment variable holding the JSON credential list
    #[serde(default = "default_credentials_env")]
    pub credentials_env: String,
    /// Upper bound on a single HTTP exchange, body included
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Attempts per call for 5xx and network failures
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Attempts per credential during login
    #[serde(default = "default_login_attempts")]
    pub login_attempts: u32,
    #[serde(default)]
    pub backoff: BackoffConfig,
}

fn default_credentials_env() -> String {
    "DSC_ACCOUNTS".into()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_login_attempts() -> u32 {
    3
}

impl ClientConfig {
    pub fn new(base_url: Url) -> Self {
        ClientConfig {
            base_url,
            credentials_env: default_credentials_env(),
            request_timeout_secs: default_request_timeout_secs(),
            max_attempts: default_max_attempts(),
            login_attempts: default_login_attempts(),
            backoff: BackoffConfig::default(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match self.base_url.scheme() {
            "http" | "https" => {}
            other => return Err(ValidationError::InvalidScheme(other.to_string())),
        }
        if self.max_attempts == 0 {
            return Err(ValidationError::InvalidMaxAttempts);
        }
        if self.login_attempts == 0 {
            return Err(ValidationError::InvalidLoginAttempts);
        }
        if self.request_timeout_secs == 0 {
            return Err(ValidationError::InvalidTimeout);
        }
        if self.backoff.max_delay_ms < self.backoff.base_delay_ms {
            return Err(ValidationError::InvalidBackoff);
        }
        Ok(())
    }
}
