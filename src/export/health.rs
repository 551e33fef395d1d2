use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const NAMESPACE: &str = "tsdb_eval";

/// Prometheus metrics describing the evaluator's own pipeline.
///
/// These cover the result queue, the sink, query outcomes per backend,
/// session refreshes and discovery. They say nothing about the TSDB under
/// test; those measurements travel through the result queue instead.
pub struct HealthMetrics {
    registry: Registry,
    addr: String,
    shutdown: parking_lot::Mutex<Option<CancellationToken>>,

    /// Results accepted by the queue.
    pub results_enqueued: Counter,
    /// Results rejected because the queue was full.
    pub results_dropped: Counter,
    /// Results discarded by the consumer because they carried no data.
    pub results_skipped: Counter,
    /// Results pushed to the sink successfully.
    pub results_forwarded: Counter,
    /// Failed sink pushes.
    pub sink_errors: Counter,
    /// Results currently waiting in the queue.
    pub queue_length: Gauge,
    /// Query executions by backend and outcome.
    pub queries_total: CounterVec,
    /// Query round-trip duration by backend.
    pub query_duration: HistogramVec,
    /// Session logins by outcome.
    pub session_refreshes: CounterVec,
    /// Validity window of the installed session credential.
    pub session_ttl_seconds: Gauge,
    /// Logins failed in a row since the last success; never terminal.
    pub session_consecutive_failures: Gauge,
    /// Scheduler cycles started.
    pub cycles_total: Counter,
    /// Tasks not launched because every in-flight slot was taken.
    pub tasks_skipped: Counter,
    /// Auto-scaling groups found at startup.
    pub discovered_groups: Gauge,
    /// Instances found at startup.
    pub discovered_instances: Gauge,
}

impl HealthMetrics {
    /// Creates a new health metrics instance with all metrics registered.
    pub fn new(addr: &str) -> Result<Self> {
        let registry = Registry::new();

        let results_enqueued = Counter::with_opts(
            Opts::new("results_enqueued_total", "Results accepted by the queue.")
                .namespace(NAMESPACE),
        )?;
        let results_dropped = Counter::with_opts(
            Opts::new(
                "results_dropped_total",
                "Results rejected because the queue was full.",
            )
            .namespace(NAMESPACE),
        )?;
        let results_skipped = Counter::with_opts(
            Opts::new(
                "results_skipped_total",
                "Results discarded because they carried no data.",
            )
            .namespace(NAMESPACE),
        )?;
        let results_forwarded = Counter::with_opts(
            Opts::new("results_forwarded_total", "Results pushed to the sink.")
                .namespace(NAMESPACE),
        )?;
        let sink_errors = Counter::with_opts(
            Opts::new("sink_errors_total", "Failed sink pushes.").namespace(NAMESPACE),
        )?;
        let queue_length = Gauge::with_opts(
            Opts::new("queue_length", "Results currently waiting in the queue.")
                .namespace(NAMESPACE),
        )?;
        let queries_total = CounterVec::new(
            Opts::new(
                "queries_total",
                "Query executions by backend and outcome.",
            )
            .namespace(NAMESPACE),
            &["backend", "status"],
        )?;
        let query_duration = HistogramVec::new(
            HistogramOpts::new(
                "query_duration_seconds",
                "Query round-trip duration by backend.",
            )
            .namespace(NAMESPACE)
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 25.0]),
            &["backend"],
        )?;
        let session_refreshes = CounterVec::new(
            Opts::new("session_refreshes_total", "Session logins by outcome.")
                .namespace(NAMESPACE),
            &["status"],
        )?;
        let session_ttl_seconds = Gauge::with_opts(
            Opts::new(
                "session_ttl_seconds",
                "Validity window of the installed session credential.",
            )
            .namespace(NAMESPACE),
        )?;
        let session_consecutive_failures = Gauge::with_opts(
            Opts::new(
                "session_consecutive_failures",
                "Logins failed in a row since the last success.",
            )
            .namespace(NAMESPACE),
        )?;
        let cycles_total = Counter::with_opts(
            Opts::new("cycles_total", "Scheduler cycles started.").namespace(NAMESPACE),
        )?;
        let tasks_skipped = Counter::with_opts(
            Opts::new(
                "tasks_skipped_total",
                "Tasks not launched because every in-flight slot was taken.",
            )
            .namespace(NAMESPACE),
        )?;
        let discovered_groups = Gauge::with_opts(
            Opts::new("discovered_groups", "Auto-scaling groups found at startup.")
                .namespace(NAMESPACE),
        )?;
        let discovered_instances = Gauge::with_opts(
            Opts::new("discovered_instances", "Instances found at startup.")
                .namespace(NAMESPACE),
        )?;

        registry.register(Box::new(results_enqueued.clone()))?;
        registry.register(Box::new(results_dropped.clone()))?;
        registry.register(Box::new(results_skipped.clone()))?;
        registry.register(Box::new(results_forwarded.clone()))?;
        registry.register(Box::new(sink_errors.clone()))?;
        registry.register(Box::new(queue_length.clone()))?;
        registry.register(Box::new(queries_total.clone()))?;
        registry.register(Box::new(query_duration.clone()))?;
        registry.register(Box::new(session_refreshes.clone()))?;
        registry.register(Box::new(session_ttl_seconds.clone()))?;
        registry.register(Box::new(session_consecutive_failures.clone()))?;
        registry.register(Box::new(cycles_total.clone()))?;
        registry.register(Box::new(tasks_skipped.clone()))?;
        registry.register(Box::new(discovered_groups.clone()))?;
        registry.register(Box::new(discovered_instances.clone()))?;

        Ok(Self {
            registry,
            addr: addr.to_string(),
            shutdown: parking_lot::Mutex::new(None),
            results_enqueued,
            results_dropped,
            results_skipped,
            results_forwarded,
            sink_errors,
            queue_length,
            queries_total,
            query_duration,
            session_refreshes,
            session_ttl_seconds,
            session_consecutive_failures,
            cycles_total,
            tasks_skipped,
            discovered_groups,
            discovered_instances,
        })
    }

    /// Records one query outcome for a backend.
    pub fn record_query(&self, backend: &str, ok: bool, elapsed_secs: f64) {
        let status = if ok { "success" } else { "error" };
        self.queries_total
            .with_label_values(&[backend, status])
            .inc();
        self.query_duration
            .with_label_values(&[backend])
            .observe(elapsed_secs);
    }

    /// Renders the registry in Prometheus text format.
    pub fn render(&self) -> Result<String> {
        encode_registry(&self.registry)
    }

    /// Starts the HTTP server serving /metrics and /healthz.
    pub async fn start(&self) -> Result<()> {
        let addr = if self.addr.is_empty() {
            ":9090"
        } else {
            &self.addr
        };

        // Parse address, handling ":port" shorthand.
        let bind_addr = if addr.starts_with(':') {
            format!("0.0.0.0{addr}")
        } else {
            addr.to_string()
        };

        let app_state = Arc::new(AppState {
            registry: self.registry.clone(),
        });

        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/healthz", get(healthz_handler))
            .with_state(app_state);

        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("listening on {bind_addr}"))?;

        let local_addr = listener.local_addr().context("getting local address")?;

        let cancel = CancellationToken::new();
        *self.shutdown.lock() = Some(cancel.clone());

        tokio::spawn(async move {
            tracing::info!(addr = %local_addr, "health metrics server started");

            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
            })
            .await;

            if let Err(e) = result {
                tracing::error!(error = %e, "health metrics server error");
            }
        });

        Ok(())
    }

    /// Gracefully shuts down the health metrics server.
    pub async fn stop(&self) -> Result<()> {
        if let Some(cancel) = self.shutdown.lock().take() {
            cancel.cancel();
        }

        Ok(())
    }
}

/// Shared state for axum handlers.
struct AppState {
    registry: Registry,
}

fn encode_registry(registry: &Registry) -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .context("encoding metrics")?;
    String::from_utf8(buffer).context("converting metrics to string")
}

/// GET /metrics - Prometheus text format.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match encode_registry(&state.registry) {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => {
            tracing::error!(error = %e, "encoding metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "encoding error".to_string(),
            )
        }
    }
}

/// GET /healthz - Simple health check.
async fn healthz_handler() -> &'static str {
    "ok"
}
