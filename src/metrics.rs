//! Prometheus metrics for the sync and reindex paths.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Histogram, HistogramOpts, Opts, Registry,
};
use tracing::warn;

/// Metric name prefix for all catalog metrics
const PREFIX: &str = "catalog";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref SYNC_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            format!("{PREFIX}_index_sync_total"),
            "Index sync requests processed, by entity kind, action and outcome"
        ),
        &["kind", "action", "status"]
    ).expect("Failed to create index_sync_total metric");

    pub static ref SYNC_RETRIES_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_index_sync_retries_total"),
        "Index sync attempts that failed and were retried"
    ).expect("Failed to create index_sync_retries_total metric");

    pub static ref SYNC_DISCARDED_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_index_sync_discarded_total"),
        "Index sync requests discarded as stale by version ordering"
    ).expect("Failed to create index_sync_discarded_total metric");

    pub static ref REINDEX_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            format!("{PREFIX}_reindex_duration_seconds"),
            "Full reindex duration in seconds"
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0])
    ).expect("Failed to create reindex_duration_seconds metric");

    pub static ref REINDEX_DOCUMENTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            format!("{PREFIX}_reindex_documents_total"),
            "Documents rebuilt by full reindex, by collection"
        ),
        &["collection"]
    ).expect("Failed to create reindex_documents_total metric");
}

/// Register all metrics with the global registry. Safe to call more than
/// once; duplicate registration is logged and ignored.
pub fn init_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(SYNC_TOTAL.clone()),
        Box::new(SYNC_RETRIES_TOTAL.clone()),
        Box::new(SYNC_DISCARDED_TOTAL.clone()),
        Box::new(REINDEX_DURATION_SECONDS.clone()),
        Box::new(REINDEX_DOCUMENTS_TOTAL.clone()),
    ];
    for collector in collectors {
        if let Err(e) = REGISTRY.register(collector) {
            warn!("Metric registration skipped: {}", e);
        }
    }
}
