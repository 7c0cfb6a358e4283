use crate::cadence::Cadence;
use crate::{DPD_JOB, DSC_JOB};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("invalid cron expression for job {job}: {reason}")]
    InvalidCron { job: String, reason: String },
    #[error("page_size must be between 1 and 1000")]
    InvalidPageSize,
    #[error("invalid catalog_url: {0}")]
    InvalidCatalogUrl(String),
    #[error("catalog_url must use http or https, got {0}")]
    InvalidScheme(String),
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct JobConfig {
    pub cron: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct JobsConfig {
    #[serde(default = "default_dsc_job")]
    pub dsc: JobConfig,
    #[serde(default = "default_dpd_job")]
    pub dpd: JobConfig,
}

fn default_dsc_job() -> JobConfig {
    JobConfig {
        cron: "*/30 * * * *".into(),
        enabled: true,
    }
}

fn default_dpd_job() -> JobConfig {
    JobConfig {
        cron: "0 3 * * *".into(),
        enabled: true,
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        JobsConfig {
            dsc: default_dsc_job(),
            dpd: default_dpd_job(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct IngestionConfig {
    #[serde(default = "default_catalog_url")]
    pub catalog_url: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_catalog_url() -> String {
    "https://health-products.canada.ca/api/drug/".into()
}

fn default_page_size() -> u32 {
    dsc_client::types::DEFAULT_PAGE_SIZE
}

impl IngestionConfig {
    pub fn catalog_url(&self) -> Result<Url, ValidationError> {
        Url::parse(&self.catalog_url).map_err(|e| ValidationError::InvalidCatalogUrl(e.to_string()))
    }
}

impl Default for IngestionConfig {
    fn default() -> Self {
        IngestionConfig {
            catalog_url: default_catalog_url(),
            page_size: default_page_size(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct StorageConfig {
    #[serde(default = "default_status_path")]
    pub status_path: PathBuf,
    #[serde(default = "default_records_dir")]
    pub records_dir: PathBuf,
}

fn default_status_path() -> PathBuf {
    PathBuf::from("data/sync_status.json")
}

fn default_records_dir() -> PathBuf {
    PathBuf::from("data/records")
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            status_path: default_status_path(),
            records_dir: default_records_dir(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub jobs: JobsConfig,
    /// Wait before the single retry of a failed run.
    #[serde(default = "default_retry_cooldown_secs")]
    pub retry_cooldown_secs: u64,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

fn default_retry_cooldown_secs() -> u64 {
    300
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            jobs: JobsConfig::default(),
            retry_cooldown_secs: default_retry_cooldown_secs(),
            ingestion: IngestionConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn retry_cooldown(&self) -> Duration {
        Duration::from_secs(self.retry_cooldown_secs)
    }

    /// Cadences of the enabled jobs, keyed by job id.
    pub fn schedules(&self) -> Result<Vec<(String, Cadence)>, ValidationError> {
        [(DSC_JOB, &self.jobs.dsc), (DPD_JOB, &self.jobs.dpd)]
            .into_iter()
            .filter(|(_, job)| job.enabled)
            .map(|(id, job)| {
                Cadence::parse(&job.cron)
                    .map(|cadence| (id.to_string(), cadence))
                    .map_err(|e| ValidationError::InvalidCron {
                        job: id.to_string(),
                        reason: e.to_string(),
                    })
            })
            .collect()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.schedules()?;
        if self.ingestion.page_size == 0 || self.ingestion.page_size > 1000 {
            return Err(ValidationError::InvalidPageSize);
        }
        let catalog_url = self.ingestion.catalog_url()?;
        if !matches!(catalog_url.scheme(), "http" | "https") {
            return Err(ValidationError::InvalidScheme(catalog_url.scheme().to_string()));
        }
        Ok(())
    }
}
