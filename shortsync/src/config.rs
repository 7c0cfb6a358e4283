use dsc_client::ClientConfig;
use gateway::config::GatewayConfig;
use notifier::NotifierConfig;
use scheduler::SchedulerConfig;
use serde::Deserialize;
use std::fs::File;
use std::path::Path;

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    #[serde(default = "default_statsd_port")]
    pub statsd_port: u16,
    #[serde(default = "default_metrics_prefix")]
    pub prefix: String,
}

fn default_statsd_port() -> u16 {
    8125
}

fn default_metrics_prefix() -> String {
    "shortsync".into()
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct LoggingConfig {
    pub sentry_dsn: String,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct CommonConfig {
    pub metrics: Option<MetricsConfig>,
    pub logging: Option<LoggingConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(flatten)]
    pub common: CommonConfig,
    pub upstream: ClientConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let data = serde_yaml::from_reader(file)?;

        Ok(data)
    }

    /// Checks every section, reporting the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.upstream
            .validate()
            .map_err(|e| ConfigError::invalid("upstream", e))?;
        self.scheduler
            .validate()
            .map_err(|e| ConfigError::invalid("scheduler", e))?;
        self.notifier
            .validate()
            .map_err(|e| ConfigError::invalid("notifier", e))?;
        self.gateway
            .validate()
            .map_err(|e| ConfigError::invalid("gateway", e))?;

        if let Some(logging) = &self.common.logging {
            logging
                .sentry_dsn
                .parse::<sentry::types::Dsn>()
                .map_err(|e| ConfigError::invalid("logging", e))?;
        }
        if let Some(metrics) = &self.common.metrics
            && metrics.statsd_host.is_empty()
        {
            return Err(ConfigError::invalid("metrics", "statsd_host cannot be empty"));
        }
        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid {section} config: {reason}")]
    Invalid {
        section: &'static str,
        reason: String,
    },
}

impl ConfigError {
    pub fn invalid(section: &'static str, reason: impl ToString) -> Self {
        ConfigError::Invalid {
            section,
            reason: reason.to_string(),
        }
    }
}
