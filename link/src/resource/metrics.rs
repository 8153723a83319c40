use prometheus_client::metrics::{counter::Counter, gauge::Gauge};
use qnet_runtime::Metrics as RuntimeMetrics;

/// Metrics for the [`Actor`](super::Actor)
#[derive(Default)]
pub struct Metrics {
    /// Number of attempts started
    pub attempts: Counter,
    /// Number of attempts that failed
    pub failures: Counter,
    /// Number of pairs delivered
    pub pairs: Counter,
    /// Number of requests matched between both endpoints
    pub requests_matched: Counter,
    /// Number of requests that failed
    pub requests_failed: Counter,
    /// Number of requests waiting for their peer
    pub pending: Gauge,
}

impl Metrics {
    /// Create and return a new set of metrics, registered with the given context.
    pub fn init<E: RuntimeMetrics>(context: E) -> Self {
        let metrics = Metrics::default();
        context.register(
            "attempts",
            "Number of attempts started",
            metrics.attempts.clone(),
        );
        context.register(
            "failures",
            "Number of attempts that failed",
            metrics.failures.clone(),
        );
        context.register("pairs", "Number of pairs delivered", metrics.pairs.clone());
        context.register(
            "requests_matched",
            "Number of requests matched between both endpoints",
            metrics.requests_matched.clone(),
        );
        context.register(
            "requests_failed",
            "Number of requests that failed",
            metrics.requests_failed.clone(),
        );
        context.register(
            "pending",
            "Number of requests waiting for their peer",
            metrics.pending.clone(),
        );
        metrics
    }
}
