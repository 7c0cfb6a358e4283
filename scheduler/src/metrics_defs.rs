//! Metrics definitions for the scheduler.

use shared::metrics_defs::{MetricDef, MetricType};

pub const SYNC_RUNS: MetricDef = MetricDef {
    name: "scheduler.runs",
    metric_type: MetricType::Counter,
    description: "Finished sync runs. Tagged with job, trigger and outcome.",
};

pub const SYNC_RUN_DURATION: MetricDef = MetricDef {
    name: "scheduler.run.duration",
    metric_type: MetricType::Histogram,
    description: "Duration of a sync run in seconds. Tagged with job.",
};

pub const SYNC_OVERLAP_SKIPS: MetricDef = MetricDef {
    name: "scheduler.overlap_skips",
    metric_type: MetricType::Counter,
    description: "Triggers dropped because the job was already running. Tagged with job.",
};

pub const SYNC_RETRIES_SCHEDULED: MetricDef = MetricDef {
    name: "scheduler.retries_scheduled",
    metric_type: MetricType::Counter,
    description: "Retries scheduled after a failed run. Tagged with job.",
};

pub const STATUS_STORE_ERRORS: MetricDef = MetricDef {
    name: "scheduler.status_store.errors",
    metric_type: MetricType::Counter,
    description: "Failed reads or writes of the sync status store",
};

pub const RECORDS_STORED: MetricDef = MetricDef {
    name: "scheduler.records_stored",
    metric_type: MetricType::Counter,
    description: "Records written to the record store. Tagged with kind.",
};

pub const ALL_METRICS: &[MetricDef] = &[
    SYNC_RUNS,
    SYNC_RUN_DURATION,
    SYNC_OVERLAP_SKIPS,
    SYNC_RETRIES_SCHEDULED,
    STATUS_STORE_ERRORS,
    RECORDS_STORED,
];
