use serde::Deserialize;
use std::time::Duration;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("rate_limit.max_requests must be at least 1")]
    InvalidMaxRequests,
    #[error("rate_limit.window_secs cannot be 0")]
    InvalidWindow,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port: 3000,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct RateLimitConfig {
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// How often idle identifiers are dropped. Defaults to the window length.
    #[serde(default)]
    pub sweep_interval_secs: Option<u64>,
}

fn default_max_requests() -> u32 {
    60
}

fn default_window_secs() -> u64 {
    60
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
            sweep_interval_secs: None,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.unwrap_or(self.window_secs))
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct GatewayConfig {
    #[serde(default)]
    pub listener: Listener,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl GatewayConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.rate_limit.max_requests == 0 {
            return Err(ValidationError::InvalidMaxRequests);
        }
        if self.rate_limit.window_secs == 0 {
            return Err(ValidationError::InvalidWindow);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let yaml = r#"
listener:
  host: 0.0.0.0
  port: 8080
rate_limit:
  max_requests: 100
"#;
        let config: GatewayConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.listener.port, 8080);
        assert_eq!(config.rate_limit.max_requests, 100);
        assert_eq!(config.rate_limit.window(), Duration::from_secs(60));
        assert_eq!(config.rate_limit.sweep_interval(), Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate() {
        let mut config = GatewayConfig::default();
        config.rate_limit.max_requests = 0;
        assert_eq!(config.validate(), Err(ValidationError::InvalidMaxRequests));

        let mut config = GatewayConfig::default();
        config.rate_limit.window_secs = 0;
        assert_eq!(config.validate(), Err(ValidationError::InvalidWindow));
    }
}
