//! Request metrics and Prometheus text exposition.
//!
//! Counters live in atomics and a couple of concurrent maps; `render`
//! produces the text exposition format served at `/metrics`. The registry is
//! owned by the server and passed to the middleware explicitly, so nothing
//! here is process-global.
//!
//! Series names and label sets mirror the Go metrics this broker replaces:
//! the latency histogram is `http_latency` with `{code, endpoint, method}`,
//! the response counter is `http_count_total` with `{code, handler, method}`,
//! the in-flight gauge carries `{endpoint}`.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;

/// Metric name prefix; Go-style `<app>_` with dashes flattened.
const PREFIX: &str = "github_token_broker_";

/// Latency bucket upper bounds, in seconds.
const BUCKETS: [f64; 13] = [
    0.001, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 0.75, 1.0, 5.0, 10.0, 30.0, 60.0,
];

/// One `(code, endpoint, method)` series.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SeriesKey {
    endpoint: &'static str,
    method: String,
    code: u16,
}

/// Counters for one series.
#[derive(Default)]
struct Series {
    count: AtomicU64,
    latency: Histogram,
}

/// Fixed-bucket latency histogram.
struct Histogram {
    bucket_counts: [AtomicU64; BUCKETS.len()],
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self {
            bucket_counts: std::array::from_fn(|_| AtomicU64::new(0)),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }
}

impl Histogram {
    fn observe(&self, latency: Duration) {
        let seconds = latency.as_secs_f64();
        for (idx, bound) in BUCKETS.iter().enumerate() {
            if seconds <= *bound {
                self.bucket_counts[idx].fetch_add(1, Ordering::Relaxed);
            }
        }
        #[allow(clippy::cast_possible_truncation)]
        self.sum_micros
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }
}

/// Request metrics for the broker.
#[derive(Default)]
pub struct Metrics {
    /// Requests currently being handled, by endpoint
    in_flight: DashMap<&'static str, AtomicI64>,
    requests: DashMap<SeriesKey, Series>,
    panic_count: AtomicU64,
}

impl Metrics {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request entering `endpoint`.
    pub fn request_started(&self, endpoint: &'static str) {
        self.in_flight
            .entry(endpoint)
            .or_insert_with(|| AtomicI64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Record a request leaving `endpoint` with `status` after `latency`.
    pub fn request_finished(
        &self,
        endpoint: &'static str,
        method: &str,
        status: u16,
        latency: Duration,
    ) {
        self.in_flight
            .entry(endpoint)
            .or_insert_with(|| AtomicI64::new(0))
            .fetch_sub(1, Ordering::Relaxed);

        let key = SeriesKey {
            endpoint,
            method: method.to_string(),
            code: status,
        };
        let series = self.requests.entry(key).or_default();
        series.count.fetch_add(1, Ordering::Relaxed);
        series.latency.observe(latency);
    }

    /// Count a panic caught by the recovery middleware.
    pub fn record_panic(&self) {
        self.panic_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Total panics caught so far.
    #[must_use]
    pub fn panics(&self) -> u64 {
        self.panic_count.load(Ordering::Relaxed)
    }

    /// Responses recorded for `endpoint` with `status`, summed over methods.
    #[must_use]
    pub fn responses(&self, endpoint: &str, status: u16) -> u64 {
        self.requests
            .iter()
            .filter(|entry| entry.key().endpoint == endpoint && entry.key().code == status)
            .map(|entry| entry.count.load(Ordering::Relaxed))
            .sum()
    }

    /// Render all metrics in the Prometheus text exposition format.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn render(&self) -> String {
        let mut out = String::new();

        let mut keys: Vec<SeriesKey> = self.requests.iter().map(|e| e.key().clone()).collect();
        keys.sort_unstable_by(|a, b| {
            (a.endpoint, &a.method, a.code).cmp(&(b.endpoint, &b.method, b.code))
        });

        let _ = writeln!(
            out,
            "# HELP {PREFIX}http_latency The amount of time it takes to process http requests"
        );
        let _ = writeln!(out, "# TYPE {PREFIX}http_latency histogram");
        for key in &keys {
            let Some(series) = self.requests.get(key) else {
                continue;
            };
            let SeriesKey {
                endpoint,
                method,
                code,
            } = key;
            let histogram = &series.latency;
            let total = histogram.count.load(Ordering::Relaxed);
            for (idx, bound) in BUCKETS.iter().enumerate() {
                let count = histogram.bucket_counts[idx].load(Ordering::Relaxed);
                let _ = writeln!(
                    out,
                    "{PREFIX}http_latency_bucket{{code=\"{code}\",endpoint=\"{endpoint}\",method=\"{method}\",le=\"{bound}\"}} {count}"
                );
            }
            let _ = writeln!(
                out,
                "{PREFIX}http_latency_bucket{{code=\"{code}\",endpoint=\"{endpoint}\",method=\"{method}\",le=\"+Inf\"}} {total}"
            );
            let sum = histogram.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0;
            let _ = writeln!(
                out,
                "{PREFIX}http_latency_sum{{code=\"{code}\",endpoint=\"{endpoint}\",method=\"{method}\"}} {sum}"
            );
            let _ = writeln!(
                out,
                "{PREFIX}http_latency_count{{code=\"{code}\",endpoint=\"{endpoint}\",method=\"{method}\"}} {total}"
            );
        }

        let _ = writeln!(
            out,
            "# HELP {PREFIX}http_in_flight_request The amount of in flight http requests"
        );
        let _ = writeln!(out, "# TYPE {PREFIX}http_in_flight_request gauge");
        let mut endpoints: Vec<&'static str> = self.in_flight.iter().map(|e| *e.key()).collect();
        endpoints.sort_unstable();
        for endpoint in endpoints {
            let value = self
                .in_flight
                .get(endpoint)
                .map_or(0, |v| v.load(Ordering::Relaxed));
            let _ = writeln!(
                out,
                "{PREFIX}http_in_flight_request{{endpoint=\"{endpoint}\"}} {value}"
            );
        }

        let _ = writeln!(
            out,
            "# HELP {PREFIX}http_count_total The total count of http request"
        );
        let _ = writeln!(out, "# TYPE {PREFIX}http_count_total counter");
        for key in &keys {
            let count = self
                .requests
                .get(key)
                .map_or(0, |s| s.count.load(Ordering::Relaxed));
            let SeriesKey {
                endpoint,
                method,
                code,
            } = key;
            let _ = writeln!(
                out,
                "{PREFIX}http_count_total{{code=\"{code}\",handler=\"{endpoint}\",method=\"{method}\"}} {count}"
            );
        }

        let _ = writeln!(
            out,
            "# HELP {PREFIX}panic_count_total The total count of middleware caught panics"
        );
        let _ = writeln!(out, "# TYPE {PREFIX}panic_count_total counter");
        let _ = writeln!(
            out,
            "{PREFIX}panic_count_total {}",
            self.panic_count.load(Ordering::Relaxed)
        );

        out
    }
}
