//! Prometheus instrumentation.
//!
//! A single [`Metrics`] value owns its registry. It is built once at startup
//! and handed to the request middleware, the `/metrics` handler and the
//! background sampler.

use axum::{
    extract::{MatchedPath, Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::{sync::Arc, time::Duration};
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::{task::JoinHandle, time::Instant};
use tracing::{debug, error, warn};

const UNMATCHED_ENDPOINT: &str = "unmatched";
const MIN_SAMPLE_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    requests_total: IntCounterVec,
    request_duration_seconds: HistogramVec,
    runtime_alive_tasks: IntGauge,
    process_memory_bytes: IntGauge,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("api_server_requests_total", "Total number of HTTP requests"),
            &["endpoint", "method"],
        )?;
        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "api_server_request_duration_seconds",
                "HTTP request duration in seconds",
            ),
            &["endpoint", "method"],
        )?;
        let runtime_alive_tasks = IntGauge::new(
            "api_server_runtime_alive_tasks",
            "Number of alive tasks on the async runtime",
        )?;
        let process_memory_bytes = IntGauge::new(
            "api_server_process_memory_bytes",
            "Resident memory of the server process in bytes",
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(request_duration_seconds.clone()))?;
        registry.register(Box::new(runtime_alive_tasks.clone()))?;
        registry.register(Box::new(process_memory_bytes.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            request_duration_seconds,
            runtime_alive_tasks,
            process_memory_bytes,
        })
    }

    pub fn observe_request(&self, endpoint: &str, method: &str, elapsed: Duration) {
        self.requests_total
            .with_label_values(&[endpoint, method])
            .inc();
        self.request_duration_seconds
            .with_label_values(&[endpoint, method])
            .observe(elapsed.as_secs_f64());
    }

    pub fn export(&self) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Middleware: counts and times every request by matched route template.
pub async fn track_requests(
    State(metrics): State<Arc<Metrics>>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_ENDPOINT.to_string());

    let response = next.run(request).await;
    metrics.observe_request(&endpoint, &method, start.elapsed());
    response
}

/// `GET /metrics`
pub async fn metrics_handler(State(metrics): State<Arc<Metrics>>) -> Response {
    match metrics.export() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(err) => {
            error!("failed to export metrics: {}", err);
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to export metrics").into_response()
        }
    }
}

/// Periodically record runtime task count and process memory.
///
/// Intervals shorter than 10ms are raised to 10ms.
pub fn spawn_runtime_sampler(metrics: Arc<Metrics>, every: Duration) -> JoinHandle<()> {
    if every < MIN_SAMPLE_INTERVAL {
        warn!(?every, "sample interval too short, using {:?}", MIN_SAMPLE_INTERVAL);
    }
    let every = every.max(MIN_SAMPLE_INTERVAL);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        let mut system = System::new();
        let pid = sysinfo::get_current_pid().ok();

        loop {
            ticker.tick().await;

            let alive = tokio::runtime::Handle::current().metrics().num_alive_tasks();
            metrics.runtime_alive_tasks.set(alive as i64);

            if let Some(pid) = pid {
                let targets = [pid];
                let _ = system.refresh_processes_specifics(
                    ProcessesToUpdate::Some(&targets),
                    true,
                    ProcessRefreshKind::nothing().with_memory(),
                );
                if let Some(process) = system.process(pid) {
                    metrics.process_memory_bytes.set(process.memory() as i64);
                }
            }
            debug!(alive_tasks = alive, "sampled runtime metrics");
        }
    })
}
