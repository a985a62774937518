//! Prometheus metrics for miniblog-service.
//!
//! Fan-out collectors plus an HTTP handler for the `/metrics` endpoint.

use actix_web::HttpResponse;
use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};

lazy_static! {
    /// Fan-out events handled, by event kind and outcome (applied, retried).
    pub static ref FANOUT_EVENTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "miniblog_fanout_events_total",
        "Feed events processed by the fan-out worker",
        &["kind", "outcome"]
    )
    .expect("failed to register miniblog_fanout_events_total");

    /// Feed rows inserted or replaced.
    pub static ref FEED_ITEMS_WRITTEN_TOTAL: IntCounterVec = register_int_counter_vec!(
        "miniblog_feed_items_written_total",
        "Feed items written by the fan-out worker",
        &["kind"]
    )
    .expect("failed to register miniblog_feed_items_written_total");

    pub static ref FANOUT_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "miniblog_fanout_duration_seconds",
        "Time spent applying one feed event",
        &["kind"]
    )
    .expect("failed to register miniblog_fanout_duration_seconds");
}

/// Actix handler that renders Prometheus metrics in text format.
pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
