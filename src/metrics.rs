//! Prometheus metrics for the cache driver

use prometheus::{Histogram, HistogramOpts, IntCounter, Registry};

/// Driver metrics, one registry per instance
pub struct Metrics {
    pub registry: Registry,

    // Command counters
    pub cmd_get: IntCounter,
    pub cmd_set: IntCounter,
    pub cmd_add: IntCounter,
    pub cmd_delete: IntCounter,
    pub cmd_clear: IntCounter,
    pub cmd_compare_set: IntCounter,
    pub cmd_compare_delete: IntCounter,

    // Hit/miss counters
    pub get_hits: IntCounter,
    pub get_misses: IntCounter,

    // Compare outcomes
    pub compare_mismatches: IntCounter,
    pub cas_conflicts: IntCounter,

    // Latency histograms
    pub cmd_latency: Histogram,

    // Error counters
    pub decode_errors: IntCounter,
    pub encode_errors: IntCounter,
    pub store_errors: IntCounter,
}

fn counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).expect("valid metric definition");
    registry
        .register(Box::new(counter.clone()))
        .expect("metric registered once");
    counter
}

impl Metrics {
    /// Create a new metrics instance
    pub fn new() -> Self {
        let registry = Registry::new();

        let cmd_get = counter(&registry, "mcdriver_cmd_get_total", "Total get calls");
        let cmd_set = counter(&registry, "mcdriver_cmd_set_total", "Total set calls");
        let cmd_add = counter(&registry, "mcdriver_cmd_add_total", "Total add calls");
        let cmd_delete = counter(&registry, "mcdriver_cmd_delete_total", "Total delete calls");
        let cmd_clear = counter(&registry, "mcdriver_cmd_clear_total", "Total clear calls");
        let cmd_compare_set = counter(
            &registry,
            "mcdriver_cmd_compare_set_total",
            "Total compare_set calls",
        );
        let cmd_compare_delete = counter(
            &registry,
            "mcdriver_cmd_compare_delete_total",
            "Total compare_delete calls",
        );

        let get_hits = counter(&registry, "mcdriver_get_hits_total", "Total get hits");
        let get_misses = counter(&registry, "mcdriver_get_misses_total", "Total get misses");

        let compare_mismatches = counter(
            &registry,
            "mcdriver_compare_mismatches_total",
            "Compare primitives that found a different current value",
        );
        let cas_conflicts = counter(
            &registry,
            "mcdriver_cas_conflicts_total",
            "CAS writes rejected because the item changed after it was read",
        );

        let cmd_latency = Histogram::with_opts(
            HistogramOpts::new("mcdriver_cmd_latency_seconds", "Driver call latency in seconds")
                .buckets(vec![
                    0.0001, 0.0005, 0.001, 0.002, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
                ]),
        )
        .expect("valid histogram definition");
        registry
            .register(Box::new(cmd_latency.clone()))
            .expect("metric registered once");

        let decode_errors = counter(
            &registry,
            "mcdriver_decode_errors_total",
            "Entries read as a miss because they could not be decoded",
        );
        let encode_errors = counter(
            &registry,
            "mcdriver_encode_errors_total",
            "Values that could not be serialized",
        );
        let store_errors = counter(
            &registry,
            "mcdriver_store_errors_total",
            "Store operations that failed (timeouts, IO, server errors)",
        );

        Self {
            registry,
            cmd_get,
            cmd_set,
            cmd_add,
            cmd_delete,
            cmd_clear,
            cmd_compare_set,
            cmd_compare_delete,
            get_hits,
            get_misses,
            compare_mismatches,
            cas_conflicts,
            cmd_latency,
            decode_errors,
            encode_errors,
            store_errors,
        }
    }

    /// Get Prometheus formatted metrics
    pub fn gather(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if encoder.encode(&metric_families, &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("cmd_get", &self.cmd_get.get())
            .field("get_hits", &self.get_hits.get())
            .field("get_misses", &self.get_misses.get())
            .field("store_errors", &self.store_errors.get())
            .finish_non_exhaustive()
    }
}
