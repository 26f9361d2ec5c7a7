//! Prometheus request metrics.
//!
//! | Metric | Kind | Labels |
//! |---|---|---|
//! | `worker_api_http_request_total` | counter | `url`, `method`, `code` |
//! | `worker_api_http_request_duration_seconds` | histogram | `url`, `method` |
//! | `worker_api_version` | gauge, always 1 | `version` (const) |
//!
//! `url` is the matched route pattern, not the raw path, so one label value
//! covers every worker. The duration buckets are deliberately coarse: they
//! flag slow requests, they do not profile fast ones.

use std::time::Duration;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

const DURATION_BUCKETS: [f64; 5] = [4.0, 8.0, 12.0, 16.0, 20.0];

/// Request counters and latency histograms, registered on a private
/// [`Registry`]. Clones share the same underlying metrics.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    requests_total: IntCounterVec,
    request_duration: HistogramVec,
}

impl Metrics {
    /// Creates and registers all metrics.
    ///
    /// # Errors
    ///
    /// Returns an error if a metric definition is rejected by the registry.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let version = IntGauge::with_opts(
            Opts::new("worker_api_version", "Version of worker-api")
                .const_label("version", env!("CARGO_PKG_VERSION")),
        )?;
        version.set(1);

        let requests_total = IntCounterVec::new(
            Opts::new("worker_api_http_request_total", "Count of all http requests"),
            &["url", "method", "code"],
        )?;

        let request_duration = HistogramVec::new(
            HistogramOpts::new("worker_api_http_request_duration_seconds", "HTTP request duration")
                .buckets(DURATION_BUCKETS.to_vec()),
            &["url", "method"],
        )?;

        registry.register(Box::new(version))?;
        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(request_duration.clone()))?;

        Ok(Self { registry, requests_total, request_duration })
    }

    /// Records one completed request. Called exactly once per request.
    pub fn record_request(&self, route: &str, method: &str, status: u16, elapsed: Duration) {
        let code = status.to_string();
        self.requests_total
            .with_label_values(&[route, method, code.as_str()])
            .inc();
        self.request_duration
            .with_label_values(&[route, method])
            .observe(elapsed.as_secs_f64());
    }

    /// Current snapshot in the Prometheus text exposition format.
    pub fn render(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(buf)
    }

    /// `Content-Type` of [`Metrics::render`]'s output.
    pub fn content_type(&self) -> String {
        TextEncoder::new().format_type().to_owned()
    }

    pub fn request_count(&self, route: &str, method: &str, status: u16) -> u64 {
        let code = status.to_string();
        self.requests_total
            .with_label_values(&[route, method, code.as_str()])
            .get()
    }

    pub fn duration_count(&self, route: &str, method: &str) -> u64 {
        self.request_duration
            .with_label_values(&[route, method])
            .get_sample_count()
    }
}
