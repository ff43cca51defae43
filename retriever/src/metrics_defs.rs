//! Metrics definitions for the retriever.

use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUESTS: MetricDef = MetricDef {
    name: "retriever.requests",
    metric_type: MetricType::Counter,
    description: "Inbound submissions. Tagged with intent.",
};

pub const JOBS_DISPATCHED: MetricDef = MetricDef {
    name: "retriever.jobs.dispatched",
    metric_type: MetricType::Counter,
    description: "Retrieval jobs handed to the dispatcher. Tagged with kind.",
};

pub const JOBS_FAILED: MetricDef = MetricDef {
    name: "retriever.jobs.failed",
    metric_type: MetricType::Counter,
    description: "Retrieval jobs that ended in a failure notice. Tagged with kind.",
};

pub const SIZE_LIMIT_EXCEEDED: MetricDef = MetricDef {
    name: "retriever.extract.size_limit_exceeded",
    metric_type: MetricType::Counter,
    description: "Record extracts rejected for compressing above the size ceiling",
};

pub const NO_MATCHING_RECORDS: MetricDef = MetricDef {
    name: "retriever.extract.no_matching_records",
    metric_type: MetricType::Counter,
    description: "Record queries that finished without any rows",
};

pub const INVARIANT_VIOLATIONS: MetricDef = MetricDef {
    name: "retriever.query_build.invariant_violation",
    metric_type: MetricType::Counter,
    description: "Record requests accepted by classification that produced no query",
};

pub const NOTICES_FAILED: MetricDef = MetricDef {
    name: "retriever.notices.failed",
    metric_type: MetricType::Counter,
    description: "Notices that could not be sent to the requester. Tagged with notice.",
};

pub const COMPRESSED_BYTES: MetricDef = MetricDef {
    name: "retriever.extract.compressed_bytes",
    metric_type: MetricType::Histogram,
    description: "Size of compressed record extracts in bytes",
};

pub const JOB_DURATION: MetricDef = MetricDef {
    name: "retriever.job.duration",
    metric_type: MetricType::Histogram,
    description: "Time to run one retrieval job to its notification in seconds",
};

pub const ALL_METRICS: &[MetricDef] = &[
    REQUESTS,
    JOBS_DISPATCHED,
    JOBS_FAILED,
    SIZE_LIMIT_EXCEEDED,
    NO_MATCHING_RECORDS,
    INVARIANT_VIOLATIONS,
    NOTICES_FAILED,
    COMPRESSED_BYTES,
    JOB_DURATION,
];
