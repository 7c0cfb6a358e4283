//! Metrics definitions for the gateway.

use shared::metrics_defs::{MetricDef, MetricType};

pub const GATEWAY_REQUESTS: MetricDef = MetricDef {
    name: "gateway.requests",
    metric_type: MetricType::Counter,
    description: "Requests served by the gateway. Tagged with status.",
};

pub const GATEWAY_RATE_LIMITED: MetricDef = MetricDef {
    name: "gateway.rate_limited",
    metric_type: MetricType::Counter,
    description: "Requests rejected by the rate limiter",
};

pub const RATE_LIMITER_TRACKED: MetricDef = MetricDef {
    name: "gateway.rate_limiter.tracked",
    metric_type: MetricType::Gauge,
    description: "Identifiers with a live rate limit window after a sweep",
};

pub const ALL_METRICS: &[MetricDef] = &[GATEWAY_REQUESTS, GATEWAY_RATE_LIMITED, RATE_LIMITER_TRACKED];
