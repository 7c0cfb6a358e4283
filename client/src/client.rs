use crate::backoff::Backoff;
use crate::config::{ClientConfig, Credential};
use crate::errors::{ClientError, Result};
use crate::metrics_defs::{
    CREDENTIAL_ROTATIONS, LOGIN_FAILURES, UPSTREAM_REQUEST_DURATION, UPSTREAM_REQUESTS,
    UPSTREAM_RETRIES,
};
use crate::types::{Report, ReportKind, ReportQuery, SearchResponse};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use shared::{counter, histogram};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use url::Url;

pub const AUTH_TOKEN_HEADER: &str = "auth-token";

// Error bodies are only kept for diagnostics.
const MAX_ERROR_BODY: usize = 512;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    /// Index into the credential pool of the account that owns this session.
    pub owner: usize,
}

#[derive(Debug, Default)]
struct SessionState {
    session: Option<Session>,
    index: usize,
}

struct ClientInner {
    http: reqwest::Client,
    base_url: Url,
    credentials: Vec<Credential>,
    // Held across login I/O so concurrent calls never rotate at the same time.
    state: Mutex<SessionState>,
    timeout: Duration,
    max_attempts: u32,
    login_attempts: u32,
    backoff: Backoff,
}

/// Authenticated client for the shortage reporting API.
///
/// Cloning is cheap; all clones share the same session and credential index.
#[derive(Clone)]
pub struct ShortageClient {
    inner: Arc<ClientInner>,
}

impl ShortageClient {
    pub fn new(config: &ClientConfig, credentials: Vec<Credential>) -> Result<Self> {
        if credentials.is_empty() {
            return Err(ClientError::NoCredentials);
        }

        let http = reqwest::Client::builder()
            .user_agent(concat!("shortsync/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(ShortageClient {
            inner: Arc::new(ClientInner {
                http,
                base_url: normalize_base_url(config.base_url.clone()),
                credentials,
                state: Mutex::new(SessionState::default()),
                timeout: config.request_timeout(),
                max_attempts: config.max_attempts,
                login_attempts: config.login_attempts,
                backoff: Backoff::from(&config.backoff),
            }),
        })
    }

    pub fn pool_size(&self) -> usize {
        self.inner.credentials.len()
    }

    /// Index of the credential currently in use.
    pub async fn current_index(&self) -> usize {
        self.inner.state.lock().await.index
    }

    pub async fn session(&self) -> Option<Session> {
        self.inner.state.lock().await.session.clone()
    }

    /// Authenticates, trying every credential once starting at `start_index`
    /// (or the current index). Returns the new session token.
    pub async fn login(&self, start_index: Option<usize>) -> Result<String> {
        let mut state = self.inner.state.lock().await;
        self.login_locked(&mut state, start_index).await
    }

    /// Moves to the next credential and authenticates with it. The cycle ends
    /// back at the current credential; if nothing succeeds on the way the
    /// pool is exhausted.
    pub async fn rotate_account(&self) -> Result<String> {
        let mut state = self.inner.state.lock().await;
        self.rotate_locked(&mut state).await
    }

    pub async fn search(&self, query: &ReportQuery) -> Result<SearchResponse> {
        self.request("search", &query.to_params()).await
    }

    pub async fn shortage(&self, id: u64) -> Result<Report> {
        self.report(ReportKind::Shortage, id).await
    }

    pub async fn discontinuance(&self, id: u64) -> Result<Report> {
        self.report(ReportKind::Discontinuance, id).await
    }

    pub async fn report(&self, kind: ReportKind, id: u64) -> Result<Report> {
        self.request(&format!("{}/{id}", kind.details_path()), &[])
            .await
    }

    /// Authenticated GET against `path` (relative to the base URL), decoded as JSON.
    ///
    /// Auth failures and rate limiting rotate to the next account and retry
    /// at once, outside the attempt budget. Server errors and network
    /// failures back off and retry up to `max_attempts`. Undecodable bodies
    /// are returned as `MalformedResponse` without retrying.
    pub async fn request<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let url = self.endpoint(path)?;
        let pool_size = self.pool_size();
        let mut attempt = 0;
        let mut rotations = 0;

        loop {
            let token = self.session_token().await?;

            let started = Instant::now();
            let result = self.get(&url, params, &token).await;
            histogram!(UPSTREAM_REQUEST_DURATION).record(started.elapsed().as_secs_f64());

            let err = match result {
                Ok(body) => {
                    let decoded = serde_json::from_slice(&body)
                        .map_err(|e| ClientError::MalformedResponse(format!("{path}: {e}")));
                    let outcome = if decoded.is_ok() { "ok" } else { "malformed" };
                    counter!(UPSTREAM_REQUESTS, "outcome" => outcome).increment(1);
                    return decoded;
                }
                Err(err) => err,
            };
            counter!(UPSTREAM_REQUESTS, "outcome" => err.kind()).increment(1);

            if err.needs_rotation() {
                if rotations >= pool_size {
                    tracing::error!(path, error = %err, "every account was rejected for this call");
                    return Err(ClientError::AllCredentialsExhausted);
                }
                rotations += 1;
                tracing::warn!(path, error = %err, "rotating upstream account");
                self.rotate_from(&token).await?;
                continue;
            }

            if err.is_retryable() && attempt + 1 < self.inner.max_attempts {
                let delay = self.inner.backoff.delay(attempt);
                counter!(UPSTREAM_RETRIES, "kind" => err.kind()).increment(1);
                tracing::warn!(
                    path,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying upstream request"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            return Err(err);
        }
    }

    async fn session_token(&self) -> Result<String> {
        let mut state = self.inner.state.lock().await;
        if let Some(session) = &state.session {
            return Ok(session.token.clone());
        }
        self.login_locked(&mut state, None).await
    }

    /// Rotates unless another call already replaced the session that failed.
    async fn rotate_from(&self, stale_token: &str) -> Result<String> {
        let mut state = self.inner.state.lock().await;
        if let Some(session) = &state.session
            && session.token != stale_token
        {
            return Ok(session.token.clone());
        }
        self.rotate_locked(&mut state).await
    }

    async fn rotate_locked(&self, state: &mut SessionState) -> Result<String> {
        let next = (state.index + 1) % self.pool_size();
        counter!(CREDENTIAL_ROTATIONS).increment(1);
        tracing::info!(from = state.index, to = next, "rotating upstream account");
        self.login_locked(state, Some(next)).await
    }

    async fn login_locked(
        &self,
        state: &mut SessionState,
        start_index: Option<usize>,
    ) -> Result<String> {
        let pool_size = self.pool_size();
        let start = start_index.unwrap_or(state.index) % pool_size;
        state.session = None;

        for offset in 0..pool_size {
            let index = (start + offset) % pool_size;
            match self.login_with(index).await {
                Ok(token) => {
                    tracing::info!(account = index, "logged in to upstream");
                    state.index = index;
                    state.session = Some(Session {
                        token: token.clone(),
                        owner: index,
                    });
                    return Ok(token);
                }
                Err(err) => {
                    tracing::warn!(account = index, error = %err, "upstream login failed");
                }
            }
        }

        tracing::error!(pool_size, "all upstream credentials exhausted");
        Err(ClientError::AllCredentialsExhausted)
    }

    async fn login_with(&self, index: usize) -> Result<String> {
        let credential = &self.inner.credentials[index];
        let mut attempt = 0;

        loop {
            match self.post_login(credential).await {
                Ok(token) => return Ok(token),
                Err(err) => {
                    counter!(LOGIN_FAILURES, "kind" => err.kind()).increment(1);
                    if !err.is_retryable() || attempt + 1 >= self.inner.login_attempts {
                        return Err(err);
                    }
                    self.inner.backoff.wait(attempt).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn post_login(&self, credential: &Credential) -> Result<String> {
        let url = self.endpoint("login")?;
        let form = [
            ("email", credential.email.as_str()),
            ("password", credential.password.as_str()),
        ];

        self.with_timeout(async {
            let response = self.inner.http.post(url).form(&form).send().await?;
            let status = response.status();
            if !status.is_success() {
                let body = error_body(response).await;
                return Err(ClientError::from_status(status, body));
            }

            response
                .headers()
                .get(AUTH_TOKEN_HEADER)
                .and_then(|value| value.to_str().ok())
                .filter(|token| !token.is_empty())
                .map(String::from)
                .ok_or_else(|| {
                    ClientError::MalformedResponse("login response has no auth-token header".into())
                })
        })
        .await
    }

    async fn get(&self, url: &Url, params: &[(&str, String)], token: &str) -> Result<Vec<u8>> {
        self.with_timeout(async {
            let response = self
                .inner
                .http
                .get(url.clone())
                .query(params)
                .header(AUTH_TOKEN_HEADER, token)
                .send()
                .await?;

            let status = response.status();
            if status == StatusCode::NOT_FOUND {
                return Err(ClientError::NotFound(url.path().to_string()));
            }
            if !status.is_success() {
                let body = error_body(response).await;
                return Err(ClientError::from_status(status, body));
            }

            Ok(response.bytes().await?.to_vec())
        })
        .await
    }

    async fn with_timeout<T, F>(&self, exchange: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.inner.timeout, exchange)
            .await
            .map_err(|_| ClientError::Timeout(self.inner.timeout.as_secs()))?
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.inner.base_url.join(path.trim_start_matches('/'))?)
    }
}

async fn error_body(response: reqwest::Response) -> String {
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}

// Url::join replaces the last path segment unless the base ends with a slash.
fn normalize_base_url(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
