//! In-process mock of the upstream API for tests.
//!
//! Accounts, login failures and per-path responses are scripted up front and
//! every request is recorded so tests can assert on what the client sent.

use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::collections::{HashMap, HashSet, VecDeque};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use url::Url;

/// Path prefix the mock serves the authenticated API under.
pub const API_PREFIX: &str = "/api/v1";

#[derive(Clone, Debug)]
pub struct MockResponse {
    pub status: StatusCode,
    pub body: Bytes,
    pub delay: Option<Duration>,
    pub auth_token: Option<String>,
}

impl MockResponse {
    pub fn json(status: StatusCode, body: serde_json::Value) -> Self {
        MockResponse {
            status,
            body: Bytes::from(body.to_string()),
            delay: None,
            auth_token: None,
        }
    }

    pub fn raw(status: StatusCode, body: &str) -> Self {
        MockResponse {
            status,
            body: Bytes::from(body.to_owned()),
            delay: None,
            auth_token: None,
        }
    }

    pub fn status(status: StatusCode) -> Self {
        MockResponse::raw(status, status.canonical_reason().unwrap_or_default())
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub token: Option<String>,
    pub query: HashMap<String, String>,
}

#[derive(Default)]
struct MockState {
    // email -> token; `None` accepts the login but omits the token header.
    accounts: HashMap<String, Option<String>>,
    login_scripts: HashMap<String, VecDeque<StatusCode>>,
    logins: Vec<String>,
    valid_tokens: HashSet<String>,
    scripted: HashMap<String, VecDeque<MockResponse>>,
    routes: HashMap<String, MockResponse>,
    public: HashSet<String>,
    requests: HashMap<String, Vec<RecordedRequest>>,
}

pub struct MockUpstream {
    addr: SocketAddr,
    state: Arc<Mutex<MockState>>,
    handle: JoinHandle<()>,
}

impl MockUpstream {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(MockState::default()));

        let server_state = state.clone();
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let io = TokioIo::new(stream);
                let state = server_state.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req| handle_request(state.clone(), req));
                    let _ = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                        .serve_connection(io, service)
                        .await;
                });
            }
        });

        MockUpstream {
            addr,
            state,
            handle,
        }
    }

    /// Root of the server, for unauthenticated endpoints.
    pub fn url(&self) -> Url {
        Url::parse(&format!("http://{}/", self.addr)).unwrap()
    }

    /// Base URL of the authenticated API, without a trailing slash.
    pub fn base_url(&self) -> Url {
        Url::parse(&format!("http://{}{}", self.addr, API_PREFIX)).unwrap()
    }

    pub fn add_account(&self, email: &str, token: &str) {
        self.lock()
            .accounts
            .insert(email.to_owned(), Some(token.to_owned()));
    }

    pub fn add_account_without_token(&self, email: &str) {
        self.lock().accounts.insert(email.to_owned(), None);
    }

    /// Statuses returned to the next logins of `email`, before its normal behaviour.
    pub fn script_login(&self, email: &str, statuses: &[StatusCode]) {
        self.lock()
            .login_scripts
            .entry(email.to_owned())
            .or_default()
            .extend(statuses.iter().copied());
    }

    pub fn revoke_token(&self, token: &str) {
        self.lock().valid_tokens.remove(token);
    }

    /// Responses served, in order, before falling back to the route's default.
    pub fn script(&self, path: &str, responses: Vec<MockResponse>) {
        self.lock()
            .scripted
            .entry(path.to_owned())
            .or_default()
            .extend(responses);
    }

    pub fn set_route(&self, path: &str, response: MockResponse) {
        self.lock().routes.insert(path.to_owned(), response);
    }

    /// A route served at the server root without a session token.
    pub fn set_public_route(&self, path: &str, response: MockResponse) {
        let mut state = self.lock();
        state.public.insert(path.to_owned());
        state.routes.insert(path.to_owned(), response);
    }

    pub fn logins(&self) -> Vec<String> {
        self.lock().logins.clone()
    }

    pub fn requests(&self, path: &str) -> Vec<RecordedRequest> {
        self.lock().requests.get(path).cloned().unwrap_or_default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle_request(
    state: Arc<Mutex<MockState>>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = body
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .unwrap_or_default();

    let raw_path = parts.uri.path();
    let public = !raw_path.starts_with(API_PREFIX);
    let path = raw_path
        .strip_prefix(API_PREFIX)
        .unwrap_or(raw_path)
        .to_owned();

    let response = {
        let mut state = state.lock().unwrap();
        if parts.method == Method::POST && path == "/login" {
            login(&mut state, &body)
        } else {
            let token = parts
                .headers
                .get("auth-token")
                .and_then(|value| value.to_str().ok())
                .map(String::from);
            let query = parts
                .uri
                .query()
                .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
                .unwrap_or_default();
            state
                .requests
                .entry(path.clone())
                .or_default()
                .push(RecordedRequest {
                    token: token.clone(),
                    query,
                });

            let authorized = (public && state.public.contains(&path))
                || token.is_some_and(|t| state.valid_tokens.contains(&t));
            if !authorized {
                MockResponse::status(StatusCode::UNAUTHORIZED)
            } else if let Some(next) = state.scripted.get_mut(&path).and_then(|q| q.pop_front()) {
                next
            } else {
                state
                    .routes
                    .get(&path)
                    .cloned()
                    .unwrap_or_else(|| MockResponse::status(StatusCode::NOT_FOUND))
            }
        }
    };

    if let Some(delay) = response.delay {
        tokio::time::sleep(delay).await;
    }

    let mut builder = Response::builder()
        .status(response.status)
        .header("content-type", "application/json");
    if let Some(token) = &response.auth_token {
        builder = builder.header("auth-token", token.as_str());
    }
    Ok(builder.body(Full::new(response.body)).unwrap())
}

fn login(state: &mut MockState, body: &[u8]) -> MockResponse {
    let form: HashMap<String, String> = url::form_urlencoded::parse(body).into_owned().collect();
    let email = form.get("email").cloned().unwrap_or_default();
    state.logins.push(email.clone());

    if let Some(status) = state
        .login_scripts
        .get_mut(&email)
        .and_then(|q| q.pop_front())
    {
        return MockResponse::status(status);
    }

    match state.accounts.get(&email).cloned() {
        Some(Some(token)) => {
            state.valid_tokens.insert(token.clone());
            MockResponse {
                auth_token: Some(token),
                ..MockResponse::json(StatusCode::OK, serde_json::json!({}))
            }
        }
        Some(None) => MockResponse::json(StatusCode::OK, serde_json::json!({})),
        None => MockResponse::json(
            StatusCode::UNAUTHORIZED,
            serde_json::json!({"error": "invalid credentials"}),
        ),
    }
}
