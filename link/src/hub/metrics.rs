use prometheus_client::metrics::counter::Counter;
use qnet_runtime::Metrics as RuntimeMetrics;

/// Metrics for the [`Actor`](super::Actor)
#[derive(Default)]
pub struct Metrics {
    /// Number of windows opened
    pub windows: Counter,
    /// Number of starvation warnings
    pub starvation: Counter,
}

impl Metrics {
    /// Create and return a new set of metrics, registered with the given context.
    pub fn init<E: RuntimeMetrics>(context: E) -> Self {
        let metrics = Metrics::default();
        context.register("windows", "Number of windows opened", metrics.windows.clone());
        context.register(
            "starvation",
            "Number of starvation warnings",
            metrics.starvation.clone(),
        );
        metrics
    }
}
