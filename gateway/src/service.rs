use crate::errors::GatewayError;
use crate::metrics_defs::{GATEWAY_RATE_LIMITED, GATEWAY_REQUESTS};
use crate::rate_limiter::{Decision, RateLimiter};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, RETRY_AFTER};
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use scheduler::{
    IngestionStats, Orchestrator, OrchestratorError, RunOutcome, SyncJobMetadata,
    SyncStatusStore, TriggerKind,
};
use serde::Serialize;
use shared::counter;
use shared::http::{make_boxed_error_response, make_boxed_json_response};
use std::convert::Infallible;
use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;
use std::sync::Arc;

const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    #[serde(flatten)]
    metadata: SyncJobMetadata,
    running: bool,
}

#[derive(Serialize)]
struct StatusResponse {
    jobs: Vec<JobStatus>,
}

#[derive(Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
enum RunResponse {
    Succeeded {
        job: String,
        stats: IngestionStats,
    },
    #[serde(rename_all = "camelCase")]
    Failed {
        job: String,
        error: String,
        retry_scheduled: bool,
    },
}

/// Admin and status API for one client connection. Every request is
/// counted against the peer's rate limit before it is routed.
pub struct GatewayService {
    peer: IpAddr,
    limiter: Arc<RateLimiter>,
    orchestrator: Orchestrator,
}

impl GatewayService {
    pub fn new(peer: IpAddr, limiter: Arc<RateLimiter>, orchestrator: Orchestrator) -> Self {
        GatewayService {
            peer,
            limiter,
            orchestrator,
        }
    }
}

impl Service<Request<Incoming>> for GatewayService {
    type Response = Response<BoxBody<Bytes, Infallible>>;
    type Error = GatewayError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let decision = self.limiter.check(&self.peer.to_string());
        let orchestrator = self.orchestrator.clone();
        let peer = self.peer;

        Box::pin(async move {
            let mut response = if decision.allowed {
                route(&orchestrator, req.method(), req.uri().path()).await
            } else {
                counter!(GATEWAY_RATE_LIMITED).increment(1);
                tracing::debug!(%peer, "rate limited");
                rate_limited(&decision)
            };

            response
                .headers_mut()
                .insert(RATE_LIMIT_REMAINING, HeaderValue::from(decision.remaining));
            counter!(GATEWAY_REQUESTS, "status" => response.status().as_u16().to_string())
                .increment(1);
            Ok(response)
        })
    }
}

fn rate_limited(decision: &Decision) -> Response<BoxBody<Bytes, Infallible>> {
    let mut response = make_boxed_error_response(StatusCode::TOO_MANY_REQUESTS);
    // Whole seconds, rounded up so clients never retry early.
    let secs = decision.retry_after.as_secs() + u64::from(decision.retry_after.subsec_nanos() > 0);
    response
        .headers_mut()
        .insert(RETRY_AFTER, HeaderValue::from(secs.max(1)));
    response
}

fn text_response(body: &'static str) -> Response<BoxBody<Bytes, Infallible>> {
    Response::new(Full::new(Bytes::from_static(body.as_bytes())).boxed())
}

async fn route(
    orchestrator: &Orchestrator,
    method: &Method,
    path: &str,
) -> Response<BoxBody<Bytes, Infallible>> {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    match (method.as_str(), segments.as_slice()) {
        ("GET", ["health"]) => text_response("ok\n"),
        ("GET", ["ready"]) => match orchestrator.status_store().all() {
            Ok(_) => text_response("ok\n"),
            Err(e) => {
                tracing::warn!(error = %e, "status store unavailable");
                make_boxed_error_response(StatusCode::SERVICE_UNAVAILABLE)
            }
        },
        ("GET", ["status"]) => all_statuses(orchestrator),
        ("GET", ["status", job]) => job_status(orchestrator, job),
        ("POST", ["jobs", job, "run"]) => run_job(orchestrator, job).await,
        (_, ["health"] | ["ready"] | ["status"] | ["status", _] | ["jobs", _, "run"]) => {
            make_boxed_error_response(StatusCode::METHOD_NOT_ALLOWED)
        }
        _ => make_boxed_error_response(StatusCode::NOT_FOUND),
    }
}

fn load_status(orchestrator: &Orchestrator, job: &str) -> Result<JobStatus, GatewayError> {
    let metadata = orchestrator
        .status_store()
        .load(job)?
        .unwrap_or_else(|| SyncJobMetadata::new(job));
    Ok(JobStatus {
        metadata,
        running: orchestrator.is_running(job),
    })
}

fn all_statuses(orchestrator: &Orchestrator) -> Response<BoxBody<Bytes, Infallible>> {
    let jobs: Result<Vec<_>, _> = orchestrator
        .jobs()
        .iter()
        .map(|job| load_status(orchestrator, job))
        .collect();

    match jobs {
        Ok(jobs) => make_boxed_json_response(StatusCode::OK, &StatusResponse { jobs }),
        Err(e) => {
            tracing::error!(error = %e, "could not read sync status");
            make_boxed_error_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn job_status(orchestrator: &Orchestrator, job: &str) -> Response<BoxBody<Bytes, Infallible>> {
    if !orchestrator.has_job(job) {
        return make_boxed_error_response(StatusCode::NOT_FOUND);
    }
    match load_status(orchestrator, job) {
        Ok(status) => make_boxed_json_response(StatusCode::OK, &status),
        Err(e) => {
            tracing::error!(job, error = %e, "could not read sync status");
            make_boxed_error_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn run_job(orchestrator: &Orchestrator, job: &str) -> Response<BoxBody<Bytes, Infallible>> {
    let outcome = match orchestrator.trigger(job, TriggerKind::Manual).await {
        Ok(outcome) => outcome,
        Err(e @ OrchestratorError::UnknownJob(_)) => {
            tracing::debug!(job, error = %e, "manual trigger rejected");
            return make_boxed_error_response(StatusCode::NOT_FOUND);
        }
        Err(e) => {
            tracing::error!(job, error = %e, "manual run did not complete");
            return make_boxed_error_response(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    let body = match outcome {
        RunOutcome::AlreadyRunning => return make_boxed_error_response(StatusCode::CONFLICT),
        RunOutcome::Succeeded(stats) => RunResponse::Succeeded {
            job: job.to_string(),
            stats,
        },
        RunOutcome::Failed {
            error,
            retry_scheduled,
        } => RunResponse::Failed {
            job: job.to_string(),
            error,
            retry_scheduled,
        },
    };
    make_boxed_json_response(StatusCode::ACCEPTED, &body)
}
