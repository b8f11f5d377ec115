//! Metrics and tracing setup for ringstore.
//!
//! Provides a global [`ProxyMetrics`] singleton backed by the `prometheus`
//! crate, plus an optional lightweight HTTP server for Prometheus scraping.
//! These counters are process-wide; per-coordinator counts live in the
//! proxy's own stats snapshot.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::net::SocketAddr;
use std::sync::OnceLock;

// ────────────────────────── Tracing ──────────────────────────

/// Initialize the tracing subscriber with env-filter. A no-op when a global
/// subscriber is already installed.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}

// ────────────────────────── Prometheus metrics ──────────────────────────

static METRICS: OnceLock<ProxyMetrics> = OnceLock::new();

/// Retrieve (or lazily create) the global metrics singleton.
pub fn metrics() -> &'static ProxyMetrics {
    METRICS.get_or_init(ProxyMetrics::new)
}

/// All Prometheus metrics for a ringstore coordinator.
pub struct ProxyMetrics {
    pub registry: Registry,

    // ── Client operations, by consistency level ──
    pub writes: IntCounterVec,
    pub reads: IntCounterVec,
    pub range_scans: IntCounter,

    // ── Failures, by operation ("write", "read", "range") ──
    pub unavailables: IntCounterVec,
    pub timeouts: IntCounterVec,

    // ── Replica traffic, by verb ──
    pub messages_sent: IntCounterVec,

    // ── Latency, by operation ──
    pub op_latency_secs: HistogramVec,

    // ── Hinted handoff ──
    pub hints_stored: IntCounter,
    pub hints_delivered: IntCounter,
    pub hints_dropped: IntCounter,

    // ── Read repair ──
    pub read_repairs: IntCounter,

    // ── Batch log ──
    pub batchlog_writes: IntCounter,
    pub batchlog_replays: IntCounter,
}

impl std::fmt::Debug for ProxyMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyMetrics").finish_non_exhaustive()
    }
}

/// Histogram buckets (seconds) for operation latency.
const LATENCY_BUCKETS: &[f64] = &[0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0];

fn counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let c = IntCounter::with_opts(Opts::new(name, help)).expect("valid counter definition");
    registry
        .register(Box::new(c.clone()))
        .expect("counter registered once");
    c
}

fn counter_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    let c = IntCounterVec::new(Opts::new(name, help), labels).expect("valid counter definition");
    registry
        .register(Box::new(c.clone()))
        .expect("counter registered once");
    c
}

impl ProxyMetrics {
    fn new() -> Self {
        let registry = Registry::new();

        let writes = counter_vec(
            &registry,
            "ringstore_writes_total",
            "Coordinated writes, by consistency level",
            &["cl"],
        );
        let reads = counter_vec(
            &registry,
            "ringstore_reads_total",
            "Coordinated single-partition reads, by consistency level",
            &["cl"],
        );
        let range_scans = counter(
            &registry,
            "ringstore_range_scans_total",
            "Coordinated partition range scans",
        );
        let unavailables = counter_vec(
            &registry,
            "ringstore_unavailables_total",
            "Operations rejected for lack of live replicas",
            &["op"],
        );
        let timeouts = counter_vec(
            &registry,
            "ringstore_timeouts_total",
            "Operations that missed their deadline",
            &["op"],
        );
        let messages_sent = counter_vec(
            &registry,
            "ringstore_messages_sent_total",
            "Messages sent to replicas, by verb",
            &["verb"],
        );

        let op_latency_secs = HistogramVec::new(
            HistogramOpts::new(
                "ringstore_op_latency_seconds",
                "Coordinator operation latency in seconds",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["op"],
        )
        .expect("valid histogram definition");
        registry
            .register(Box::new(op_latency_secs.clone()))
            .expect("histogram registered once");

        let hints_stored = counter(
            &registry,
            "ringstore_hints_stored_total",
            "Hints stored for hinted handoff",
        );
        let hints_delivered = counter(
            &registry,
            "ringstore_hints_delivered_total",
            "Hints successfully delivered",
        );
        let hints_dropped = counter(
            &registry,
            "ringstore_hints_dropped_total",
            "Hints not written because the target was over budget or down too long",
        );
        let read_repairs = counter(
            &registry,
            "ringstore_read_repairs_total",
            "Repair mutations sent to lagging replicas",
        );
        let batchlog_writes = counter(
            &registry,
            "ringstore_batchlog_writes_total",
            "Batches staged in the batch log",
        );
        let batchlog_replays = counter(
            &registry,
            "ringstore_batchlog_replays_total",
            "Orphaned batches replayed from the batch log",
        );

        Self {
            registry,
            writes,
            reads,
            range_scans,
            unavailables,
            timeouts,
            messages_sent,
            op_latency_secs,
            hints_stored,
            hints_delivered,
            hints_dropped,
            read_repairs,
            batchlog_writes,
            batchlog_replays,
        }
    }
}

/// Encode all registered metrics in Prometheus text exposition format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    if let Err(e) = encoder.encode(&metrics().registry.gather(), &mut buf) {
        tracing::warn!("prometheus text encoding failed: {}", e);
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Start an operation latency timer; records elapsed time on drop.
pub fn start_op_timer(op: &str) -> prometheus::HistogramTimer {
    metrics()
        .op_latency_secs
        .with_label_values(&[op])
        .start_timer()
}

// ────────────────────────── Metrics HTTP server ──────────────────────────

use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

async fn metrics_handler(
    _req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, std::convert::Infallible> {
    let mut response = Response::new(Full::new(Bytes::from(encode_metrics())));
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
    );
    Ok(response)
}

/// Serve Prometheus metrics on the given address (`GET /metrics`).
///
/// Call from a `tokio::spawn`.
pub async fn serve_metrics(
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("metrics server listening on http://{}/metrics", addr);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(metrics_handler))
                .await
            {
                tracing::debug!("metrics connection error: {}", e);
            }
        });
    }
}

// ────────────────────────── Tests ──────────────────────────
