//! Metrics and observability utilities
//!
//! Prometheus metrics for the query pipeline, all under one prefix.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all QueryForge metrics
pub const METRICS_PREFIX: &str = "queryforge";

/// Histogram buckets for end-to-end query latency (in seconds)
///
/// Queries fan out to one or more model calls, so buckets start at 100ms.
pub const QUERY_LATENCY_BUCKETS: &[f64] = &[
    0.100, // 100ms
    0.250, // 250ms
    0.500, // 500ms
    1.000, // 1s
    2.000, // 2s
    3.000, // 3s - messaging webhook ceiling
    5.000, // 5s
    10.00, // 10s
    20.00, // 20s
    30.00, // 30s
    60.00, // 60s
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Query metrics
    describe_counter!(
        format!("{}_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Total orchestrated queries by route and status"
    );

    describe_histogram!(
        format!("{}_query_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Orchestrated query latency in seconds"
    );

    // Completion metrics
    describe_counter!(
        format!("{}_completion_calls_total", METRICS_PREFIX),
        Unit::Count,
        "Completion gateway calls by purpose and status"
    );

    // Structured metrics
    describe_counter!(
        format!("{}_structured_outcomes_total", METRICS_PREFIX),
        Unit::Count,
        "Structured query outcomes (answered, rejected, failed, empty)"
    );

    // Knowledge metrics
    describe_histogram!(
        format!("{}_knowledge_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Knowledge retrieve-and-generate latency in seconds"
    );

    describe_counter!(
        format!("{}_knowledge_tokens_total", METRICS_PREFIX),
        Unit::Count,
        "Estimated knowledge tokens by direction"
    );

    // Multimodal metrics
    describe_counter!(
        format!("{}_image_archive_total", METRICS_PREFIX),
        Unit::Count,
        "Background image archive attempts by status"
    );

    tracing::info!("Metrics registered");
}

fn status_label(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "error"
    }
}

/// Tracks the latency of one orchestrated query
pub struct QueryTimer {
    start: Instant,
}

impl QueryTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Elapsed time in seconds
    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// Record the query under its route and outcome
    pub fn finish(self, route: &str, success: bool) -> f64 {
        let duration = self.elapsed_secs();

        counter!(
            format!("{}_queries_total", METRICS_PREFIX),
            "route" => route.to_string(),
            "status" => status_label(success)
        )
        .increment(1);

        histogram!(
            format!("{}_query_duration_seconds", METRICS_PREFIX),
            "route" => route.to_string()
        )
        .record(duration);

        duration
    }
}

/// Helper to record completion metrics
pub fn record_completion(purpose: &str, success: bool) {
    counter!(
        format!("{}_completion_calls_total", METRICS_PREFIX),
        "purpose" => purpose.to_string(),
        "status" => status_label(success)
    )
    .increment(1);
}

/// Helper to record structured query outcomes
pub fn record_structured_outcome(outcome: &str) {
    counter!(
        format!("{}_structured_outcomes_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Helper to record knowledge call metrics
pub fn record_knowledge_call(duration_secs: f64, input_tokens: u64, output_tokens: u64) {
    histogram!(format!("{}_knowledge_duration_seconds", METRICS_PREFIX)).record(duration_secs);

    counter!(
        format!("{}_knowledge_tokens_total", METRICS_PREFIX),
        "direction" => "input"
    )
    .increment(input_tokens);

    counter!(
        format!("{}_knowledge_tokens_total", METRICS_PREFIX),
        "direction" => "output"
    )
    .increment(output_tokens);
}

/// Helper to record background image archive outcomes
pub fn record_image_archive(success: bool) {
    counter!(
        format!("{}_image_archive_total", METRICS_PREFIX),
        "status" => status_label(success)
    )
    .increment(1);
}
