//! Metrics definitions for job notifications.

use shared::metrics_defs::{MetricDef, MetricType};

pub const JOB_RESULTS: MetricDef = MetricDef {
    name: "notifier.job.results",
    metric_type: MetricType::Counter,
    description: "Completed sync runs. Tagged with job and outcome.",
};

pub const WEBHOOK_DELIVERIES: MetricDef = MetricDef {
    name: "notifier.webhook.deliveries",
    metric_type: MetricType::Counter,
    description: "Webhook delivery attempts. Tagged with result.",
};

pub const AUDIT_LOG_ERRORS: MetricDef = MetricDef {
    name: "notifier.audit_log.errors",
    metric_type: MetricType::Counter,
    description: "Audit log writes that failed",
};

pub const AUDIT_LOG_ROTATIONS: MetricDef = MetricDef {
    name: "notifier.audit_log.rotations",
    metric_type: MetricType::Counter,
    description: "Audit log file rotations",
};

pub const ALL_METRICS: &[MetricDef] = &[
    JOB_RESULTS,
    WEBHOOK_DELIVERIES,
    AUDIT_LOG_ERRORS,
    AUDIT_LOG_ROTATIONS,
];
