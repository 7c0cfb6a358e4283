//! Inbound HTTP surface: health, sync status and manual job triggers,
//! rate limited per client address.

pub mod config;
pub mod errors;
pub mod metrics_defs;
pub mod rate_limiter;
pub mod service;

use config::GatewayConfig;
use errors::GatewayError;
use rate_limiter::RateLimiter;
use scheduler::Orchestrator;
use service::GatewayService;
use shared::http::run_http_service;
use std::net::SocketAddr;
use std::sync::Arc;

pub async fn run(config: GatewayConfig, orchestrator: Orchestrator) -> Result<(), GatewayError> {
    let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));
    run_http_service(
        &config.listener.host,
        config.listener.port,
        move |peer: SocketAddr| GatewayService::new(peer.ip(), limiter.clone(), orchestrator.clone()),
    )
    .await
}
