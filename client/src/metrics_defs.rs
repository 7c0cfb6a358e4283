//! Metrics definitions for the upstream client.

use shared::metrics_defs::{MetricDef, MetricType};

pub const UPSTREAM_REQUESTS: MetricDef = MetricDef {
    name: "upstream.requests",
    metric_type: MetricType::Counter,
    description: "Upstream API calls. Tagged with outcome.",
};

pub const UPSTREAM_REQUEST_DURATION: MetricDef = MetricDef {
    name: "upstream.request.duration",
    metric_type: MetricType::Histogram,
    description: "Duration of a single upstream HTTP exchange in seconds",
};

pub const UPSTREAM_RETRIES: MetricDef = MetricDef {
    name: "upstream.retries",
    metric_type: MetricType::Counter,
    description: "Backoff retries after transient upstream failures. Tagged with kind.",
};

pub const CREDENTIAL_ROTATIONS: MetricDef = MetricDef {
    name: "upstream.credential.rotations",
    metric_type: MetricType::Counter,
    description: "Credential rotations triggered by auth failures or rate limiting",
};

pub const LOGIN_FAILURES: MetricDef = MetricDef {
    name: "upstream.login.failures",
    metric_type: MetricType::Counter,
    description: "Failed login attempts. Tagged with kind.",
};

pub const ALL_METRICS: &[MetricDef] = &[
    UPSTREAM_REQUESTS,
    UPSTREAM_REQUEST_DURATION,
    UPSTREAM_RETRIES,
    CREDENTIAL_ROTATIONS,
    LOGIN_FAILURES,
];
