use crate::background_jobs::QueueStats;
use anyhow::{Context, Result};
use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Metric name prefix for all metrics exported by this crate
const PREFIX: &str = "friends_jobs";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref JOBS_ENQUEUED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_jobs_enqueued_total"), "Jobs enqueued for later execution"),
        &["job_class", "queue"]
    ).expect("Failed to create jobs_enqueued_total metric");

    pub static ref JOBS_PERFORMED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_jobs_performed_total"), "Job executions by outcome"),
        &["job_class", "outcome"]
    ).expect("Failed to create jobs_performed_total metric");

    pub static ref JOB_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_job_duration_seconds"),
            "Job execution duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0]),
        &["job_class"]
    ).expect("Failed to create job_duration_seconds metric");

    pub static ref JOBS_RUNNING: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_jobs_running"), "Jobs currently executing"),
        &["job_class"]
    ).expect("Failed to create jobs_running metric");

    pub static ref QUEUE_DEPTH: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_queue_depth"), "Jobs in the queue database by status"),
        &["status"]
    ).expect("Failed to create queue_depth metric");
}

pub fn init_metrics() {
    // Ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(JOBS_ENQUEUED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(JOBS_PERFORMED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(JOB_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(JOBS_RUNNING.clone()));
    let _ = REGISTRY.register(Box::new(QUEUE_DEPTH.clone()));

    tracing::debug!("Metrics system initialized");
}

pub fn record_job_enqueued(job_class: &str, queue: &str) {
    JOBS_ENQUEUED_TOTAL
        .with_label_values(&[job_class, queue])
        .inc();
}

pub fn record_job_performed(job_class: &str, outcome: &str, duration: Duration) {
    JOBS_PERFORMED_TOTAL
        .with_label_values(&[job_class, outcome])
        .inc();
    JOB_DURATION_SECONDS
        .with_label_values(&[job_class])
        .observe(duration.as_secs_f64());
}

pub fn set_job_running(job_class: &str, running: bool) {
    let gauge = JOBS_RUNNING.with_label_values(&[job_class]);
    if running {
        gauge.inc();
    } else {
        gauge.dec();
    }
}

pub fn update_queue_depth(stats: &QueueStats) {
    QUEUE_DEPTH
        .with_label_values(&["pending"])
        .set(stats.pending as f64);
    QUEUE_DEPTH
        .with_label_values(&["running"])
        .set(stats.running as f64);
    QUEUE_DEPTH
        .with_label_values(&["completed"])
        .set(stats.completed as f64);
    QUEUE_DEPTH
        .with_label_values(&["failed"])
        .set(stats.failed as f64);
    QUEUE_DEPTH
        .with_label_values(&["discarded"])
        .set(stats.discarded as f64);
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_default();
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}

/// Serves `/metrics` until `shutdown_token` is cancelled.
pub async fn run_metrics_server(port: u16, shutdown_token: CancellationToken) -> Result<()> {
    let app = Router::new().route("/metrics", get(metrics_handler));
    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port))
        .await
        .with_context(|| format!("Failed to bind metrics port {}", port))?;

    info!("Metrics available at http://127.0.0.1:{}/metrics", port);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown_token.cancelled().await })
        .await?;
    Ok(())
}
