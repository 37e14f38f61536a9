//! Prometheus metrics for deletion operations, the grace queue and the
//! retention sweep

use actix_web::{HttpResponse, Responder};
use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Encoder, Histogram,
    IntCounter, IntCounterVec, TextEncoder,
};
use std::time::Duration;

/// Applied transitions per operation
static DELETIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "message_deletions_total",
        "Messages whose state changed, by operation",
        &["operation"]
    )
    .expect("failed to register message_deletions_total")
});

/// Messages refused or skipped, by reason code
static SKIPPED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "message_deletion_skipped_total",
        "Messages skipped by a deletion request, by reason",
        &["reason"]
    )
    .expect("failed to register message_deletion_skipped_total")
});

static SWEEP_RUNS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "retention_sweep_runs_total",
        "Retention sweep cycles (success/partial/error)",
        &["status"]
    )
    .expect("failed to register retention_sweep_runs_total")
});

static SWEEP_DURATION_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "retention_sweep_duration_seconds",
        "Duration of one retention sweep",
        vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0]
    )
    .expect("failed to register retention_sweep_duration_seconds")
});

static MEDIA_RELEASE_FAILURES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "media_release_failures_total",
        "Blob releases that failed and were scheduled for retry"
    )
    .expect("failed to register media_release_failures_total")
});

static GRACE_ENQUEUED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "grace_queue_enqueued_total",
        "Deferred deletions queued for offline recipients"
    )
    .expect("failed to register grace_queue_enqueued_total")
});

static GRACE_DRAINED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "grace_queue_drained_total",
        "Deferred deletions replayed on drain"
    )
    .expect("failed to register grace_queue_drained_total")
});

pub fn record_deletions(operation: &str, count: u64) {
    if count > 0 {
        DELETIONS_TOTAL.with_label_values(&[operation]).inc_by(count);
    }
}

pub fn record_skipped(reason: &str) {
    SKIPPED_TOTAL.with_label_values(&[reason]).inc();
}

pub fn record_sweep_run(status: &str) {
    SWEEP_RUNS_TOTAL.with_label_values(&[status]).inc();
}

pub fn record_sweep_duration(duration: Duration) {
    SWEEP_DURATION_SECONDS.observe(duration.as_secs_f64());
}

pub fn record_media_release_failure() {
    MEDIA_RELEASE_FAILURES_TOTAL.inc();
}

pub fn record_grace_enqueued(count: u64) {
    GRACE_ENQUEUED_TOTAL.inc_by(count);
}

pub fn record_grace_drained(count: u64) {
    GRACE_DRAINED_TOTAL.inc_by(count);
}

/// `GET /metrics`
pub async fn metrics_handler() -> impl Responder {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::error!(error = %e, "failed to encode metrics");
        return HttpResponse::InternalServerError().finish();
    }
    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
