//! Prometheus counters for order submission and endpoint traffic.
//!
//! Metrics are recorded only; nothing in the pipeline reads them back.

use prometheus::{
    Encoder, GaugeVec, Histogram, HistogramOpts, IntCounter, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::time::Instant;

pub struct Metrics {
    registry: Registry,

    // Submissions
    pub submissions_total: IntCounter,
    pub submission_success: IntCounter,
    pub submission_failures: IntCounter,
    pub custody_swaps: IntCounter,
    pub unacknowledged_sends: IntCounter,

    // Endpoint pool
    pub endpoint_attempts: IntCounter,
    pub endpoint_failures: IntCounter,
    pub endpoint_error_rate: GaugeVec,
    pub endpoint_latency_us: IntGaugeVec,

    // Histograms
    pub rpc_latency: Histogram,
    pub submission_latency: Histogram,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let submissions_total = IntCounter::with_opts(Opts::new(
            "perps_submissions_total",
            "Order submissions started",
        ))?;
        let submission_success = IntCounter::with_opts(Opts::new(
            "perps_submission_success_total",
            "Submissions that were confirmed or simulated cleanly",
        ))?;
        let submission_failures = IntCounter::with_opts(Opts::new(
            "perps_submission_failures_total",
            "Submissions that ended in an error",
        ))?;
        let custody_swaps = IntCounter::with_opts(Opts::new(
            "perps_custody_swaps_total",
            "Corrective custody role swaps performed",
        ))?;
        let unacknowledged_sends = IntCounter::with_opts(Opts::new(
            "perps_unacknowledged_sends_total",
            "Sends that failed without a program verdict",
        ))?;
        let endpoint_attempts = IntCounter::with_opts(Opts::new(
            "perps_endpoint_attempts_total",
            "Individual endpoint attempts made by the pool",
        ))?;
        let endpoint_failures = IntCounter::with_opts(Opts::new(
            "perps_endpoint_failures_total",
            "Endpoint attempts that were throttled or unreachable",
        ))?;

        let endpoint_error_rate = GaugeVec::new(
            Opts::new(
                "perps_endpoint_error_rate",
                "Failed share of requests per endpoint, as of the last health snapshot",
            ),
            &["endpoint"],
        )?;
        let endpoint_latency_us = IntGaugeVec::new(
            Opts::new(
                "perps_endpoint_latency_us",
                "Latency of the most recent request per endpoint",
            ),
            &["endpoint"],
        )?;

        let rpc_latency = Histogram::with_opts(
            HistogramOpts::new("perps_rpc_latency_seconds", "Endpoint call latency")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )?;
        let submission_latency = Histogram::with_opts(
            HistogramOpts::new(
                "perps_submission_latency_seconds",
                "Intent to final outcome",
            )
            .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
        )?;

        registry.register(Box::new(submissions_total.clone()))?;
        registry.register(Box::new(submission_success.clone()))?;
        registry.register(Box::new(submission_failures.clone()))?;
        registry.register(Box::new(custody_swaps.clone()))?;
        registry.register(Box::new(unacknowledged_sends.clone()))?;
        registry.register(Box::new(endpoint_attempts.clone()))?;
        registry.register(Box::new(endpoint_failures.clone()))?;
        registry.register(Box::new(endpoint_error_rate.clone()))?;
        registry.register(Box::new(endpoint_latency_us.clone()))?;
        registry.register(Box::new(rpc_latency.clone()))?;
        registry.register(Box::new(submission_latency.clone()))?;

        Ok(Self {
            registry,
            submissions_total,
            submission_success,
            submission_failures,
            custody_swaps,
            unacknowledged_sends,
            endpoint_attempts,
            endpoint_failures,
            endpoint_error_rate,
            endpoint_latency_us,
            rpc_latency,
            submission_latency,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Text exposition of every registered metric
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::debug!(error = %e, "Failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

/// Global metrics instance
pub fn metrics() -> &'static Metrics {
    static METRICS: once_cell::sync::Lazy<Metrics> =
        once_cell::sync::Lazy::new(|| Metrics::new().expect("Failed to initialize metrics"));
    &METRICS
}

/// Records elapsed time into a histogram when finished
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    pub fn observe(self, histogram: &Histogram) {
        histogram.observe(self.elapsed_secs());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_exported() {
        let m = metrics();
        let before = m.custody_swaps.get();
        m.custody_swaps.inc();
        assert_eq!(m.custody_swaps.get(), before + 1);

        let text = m.render();
        assert!(text.contains("perps_custody_swaps_total"));
        assert!(text.contains("perps_rpc_latency_seconds"));
    }

    #[test]
    fn test_timer_observes() {
        let m = Metrics::new().unwrap();
        Timer::start().observe(&m.submission_latency);
        assert_eq!(m.submission_latency.get_sample_count(), 1);
    }
}
