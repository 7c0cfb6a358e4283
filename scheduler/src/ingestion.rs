use crate::errors::IngestionError;
use crate::metrics_defs::RECORDS_STORED;
use crate::records::RecordStore;
use dsc_client::{Backoff, ClientConfig, ClientError, ReportQuery, ShortageClient};
use serde::Serialize;
use serde_json::Value;
use shared::counter;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct IngestionStats {
    /// Records received from upstream.
    pub fetched: usize,
    /// Records that were new to the store.
    pub inserted: usize,
    pub pages: usize,
}

impl fmt::Display for IngestionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fetched {} records in {} pages, {} new",
            self.fetched, self.pages, self.inserted
        )
    }
}

/// One unit of scheduled work. Every call is a full run from scratch.
#[async_trait::async_trait]
pub trait IngestionTask: Send + Sync {
    async fn run(&self) -> Result<IngestionStats, IngestionError>;
}

/// Pages through `/search` and upserts every report.
pub struct ReportIngestion {
    client: ShortageClient,
    store: Arc<dyn RecordStore>,
    query: ReportQuery,
}

impl ReportIngestion {
    pub fn new(client: ShortageClient, store: Arc<dyn RecordStore>, page_size: u32) -> Self {
        ReportIngestion {
            client,
            store,
            query: ReportQuery::page(page_size, 0),
        }
    }
}

#[async_trait::async_trait]
impl IngestionTask for ReportIngestion {
    async fn run(&self) -> Result<IngestionStats, IngestionError> {
        let mut stats = IngestionStats::default();
        let mut offset = 0;

        loop {
            let page = self.client.search(&self.query.with_offset(offset)).await?;
            if page.data.is_empty() {
                break;
            }

            stats.pages += 1;
            stats.fetched += page.data.len();
            stats.inserted += self.store.upsert_reports(&page.data)?;
            counter!(RECORDS_STORED, "kind" => "report").increment(page.data.len() as u64);

            offset += page.data.len() as u32;
            tracing::debug!(offset, total = page.total, "stored report page");
            if u64::from(offset) >= page.total {
                break;
            }
        }

        Ok(stats)
    }
}

/// Downloads the drug product catalog and replaces the stored copy.
///
/// The catalog endpoint is public, so this uses a plain HTTP client with the
/// same timeout and backoff settings as the authenticated client.
pub struct CatalogIngestion {
    http: reqwest::Client,
    url: Url,
    store: Arc<dyn RecordStore>,
    timeout: Duration,
    max_attempts: u32,
    backoff: Backoff,
}

impl CatalogIngestion {
    pub fn new(
        catalog_url: &Url,
        config: &ClientConfig,
        store: Arc<dyn RecordStore>,
    ) -> Result<Self, IngestionError> {
        let mut base = catalog_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let mut url = base.join("drugproduct/").map_err(ClientError::from)?;
        url.query_pairs_mut()
            .append_pair("type", "json")
            .append_pair("lang", "en");

        let http = reqwest::Client::builder()
            .build()
            .map_err(ClientError::from)?;

        Ok(CatalogIngestion {
            http,
            url,
            store,
            timeout: config.request_timeout(),
            max_attempts: config.max_attempts.max(1),
            backoff: Backoff::from(&config.backoff),
        })
    }

    async fn fetch(&self) -> Result<Vec<Value>, ClientError> {
        let exchange = async {
            let response = self.http.get(self.url.clone()).send().await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ClientError::from_status(status, body));
            }
            let bytes = response.bytes().await?;
            serde_json::from_slice(&bytes)
                .map_err(|e| ClientError::MalformedResponse(format!("catalog: {e}")))
        };

        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| ClientError::Timeout(self.timeout.as_secs()))?
    }
}

#[async_trait::async_trait]
impl IngestionTask for CatalogIngestion {
    async fn run(&self) -> Result<IngestionStats, IngestionError> {
        let mut attempt = 0;
        let products = loop {
            match self.fetch().await {
                Ok(products) => break products,
                Err(err) if err.is_retryable() && attempt + 1 < self.max_attempts => {
                    let delay = self.backoff.delay(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying catalog download"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        };

        let fetched = products.len();
        self.store.replace_products(products)?;
        counter!(RECORDS_STORED, "kind" => "product").increment(fetched as u64);

        Ok(IngestionStats {
            fetched,
            inserted: fetched,
            pages: 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::MemoryRecordStore;
    use dsc_client::Credential;
    use dsc_client::testutils::{MockResponse, MockUpstream};
    use http::StatusCode;
    use serde_json::json;

    fn client_config(mock: &MockUpstream) -> ClientConfig {
        let mut config = ClientConfig::new(mock.base_url());
        config.request_timeout_secs = 2;
        config.backoff.base_delay_ms = 1;
        config.backoff.max_delay_ms = 5;
        config.backoff.jitter_ms = 0;
        config
    }

    fn page(ids: &[u64], total: u64, offset: u32) -> MockResponse {
        let data: Vec<_> = ids
            .iter()
            .map(|id| json!({"id": id, "type": "shortage", "status": "active_confirmed"}))
            .collect();
        MockResponse::json(
            StatusCode::OK,
            json!({"data": data, "total": total, "limit": 2, "offset": offset}),
        )
    }

    async fn report_ingestion(mock: &MockUpstream, store: Arc<MemoryRecordStore>) -> ReportIngestion {
        mock.add_account("sync@example.com", "token");
        let client = ShortageClient::new(
            &client_config(mock),
            vec![Credential::new("sync@example.com", "secret")],
        )
        .unwrap();
        ReportIngestion::new(client, store, 2)
    }

    #[tokio::test]
    async fn test_report_ingestion_pages_until_total() {
        let mock = MockUpstream::start().await;
        mock.script(
            "/search",
            vec![page(&[1, 2], 3, 0), page(&[3], 3, 2)],
        );
        let store = Arc::new(MemoryRecordStore::new());
        let task = report_ingestion(&mock, store.clone()).await;

        let stats = task.run().await.unwrap();

        assert_eq!(
            stats,
            IngestionStats {
                fetched: 3,
                inserted: 3,
                pages: 2
            }
        );
        assert_eq!(store.reports().unwrap().len(), 3);

        let offsets: Vec<_> = mock
            .requests("/search")
            .into_iter()
            .map(|r| r.query["offset"].clone())
            .collect();
        assert_eq!(offsets, vec!["0", "2"]);
        assert_eq!(mock.requests("/search")[0].query["limit"], "2");
    }

    #[tokio::test]
    async fn test_report_ingestion_stops_on_empty_page() {
        let mock = MockUpstream::start().await;
        // The upstream overstates the total; the empty page ends the run.
        mock.script("/search", vec![page(&[1, 2], 10, 0), page(&[], 10, 2)]);
        let store = Arc::new(MemoryRecordStore::new());
        let task = report_ingestion(&mock, store.clone()).await;

        let stats = task.run().await.unwrap();
        assert_eq!(stats.pages, 1);
        assert_eq!(mock.requests("/search").len(), 2);
    }

    #[tokio::test]
    async fn test_report_ingestion_propagates_upstream_error() {
        let mock = MockUpstream::start().await;
        mock.set_route("/search", MockResponse::status(StatusCode::BAD_GATEWAY));
        let store = Arc::new(MemoryRecordStore::new());
        let task = report_ingestion(&mock, store.clone()).await;

        let err = task.run().await.unwrap_err();
        assert!(matches!(
            err,
            IngestionError::Upstream(ClientError::UpstreamServerError { .. })
        ));
        assert!(store.reports().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_catalog_ingestion() {
        let mock = MockUpstream::start().await;
        mock.script(
            "/drugproduct/",
            vec![MockResponse::status(StatusCode::SERVICE_UNAVAILABLE)],
        );
        mock.set_public_route(
            "/drugproduct/",
            MockResponse::json(
                StatusCode::OK,
                json!([{"drug_code": 1}, {"drug_code": 2}, {"drug_code": 3}]),
            ),
        );
        let store = Arc::new(MemoryRecordStore::new());

        // No trailing slash on purpose.
        let catalog_url = Url::parse(&format!("{}api/drug", mock.url())).unwrap();
        let task = CatalogIngestion::new(&catalog_url, &client_config(&mock), store.clone()).unwrap();
        assert_eq!(task.url.path(), "/api/drug/drugproduct/");

        // The mock serves public routes at the root.
        let task = CatalogIngestion::new(&mock.url(), &client_config(&mock), store.clone()).unwrap();
        let stats = task.run().await.unwrap();

        assert_eq!(stats.fetched, 3);
        assert_eq!(store.product_count().unwrap(), 3);

        let requests = mock.requests("/drugproduct/");
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].query["type"], "json");
        assert_eq!(requests[1].query["lang"], "en");
    }

    #[tokio::test]
    async fn test_catalog_ingestion_rejects_non_array() {
        let mock = MockUpstream::start().await;
        mock.set_public_route(
            "/drugproduct/",
            MockResponse::json(StatusCode::OK, json!({"error": "maintenance"})),
        );
        let store = Arc::new(MemoryRecordStore::new());
        let task = CatalogIngestion::new(&mock.url(), &client_config(&mock), store.clone()).unwrap();

        let err = task.run().await.unwrap_err();
        assert!(matches!(
            err,
            IngestionError::Upstream(ClientError::MalformedResponse(_))
        ));
        assert_eq!(mock.requests("/drugproduct/").len(), 1);
    }
}
