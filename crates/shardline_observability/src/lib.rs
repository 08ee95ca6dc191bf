//! Observability setup: structured logging and metrics recording.

use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber with structured logging.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,shardline=debug"));

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init();
}

/// Record a routed logical statement and its fan-out width.
pub fn record_route_metrics(statement_kind: &str, unit_count: usize) {
    metrics::counter!("shardline_statements_routed_total", "kind" => statement_kind.to_string())
        .increment(1);
    metrics::histogram!("shardline_execution_units", "kind" => statement_kind.to_string())
        .record(unit_count as f64);
}

/// Record whether the handle pool served a unit from cache.
pub fn record_handle_pool_lookup(hit: bool) {
    let outcome = if hit { "hit" } else { "miss" };
    metrics::counter!("shardline_handle_pool_lookups_total", "outcome" => outcome).increment(1);
}

pub fn record_handle_pool_size(size: usize) {
    metrics::gauge!("shardline_handle_pool_size").set(size as f64);
}

pub fn record_unit_failure(data_source: &str) {
    metrics::counter!("shardline_unit_failures_total", "data_source" => data_source.to_string())
        .increment(1);
}

/// Record a completed logical call.
pub fn record_call_metrics(duration_us: u64, statement_kind: &str, success: bool) {
    metrics::counter!(
        "shardline_calls_total",
        "kind" => statement_kind.to_string(),
        "success" => success.to_string()
    )
    .increment(1);
    metrics::histogram!("shardline_call_duration_us", "kind" => statement_kind.to_string())
        .record(duration_us as f64);
}
