use prometheus::{Encoder, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Metrics surfaced at `/_debug/metrics`, grounded in the ambient-stack
/// supplement of `SPEC_FULL.md` §1: request counts by outcome, resolver
/// call counts and latency, snapshot probe latency, and the active mapping
/// count (read from `MappingStore::get_all().len()` by the caller, not
/// tracked here — it is a gauge on somebody else's state, not a counter
/// this collector owns).
pub struct Metrics {
    registry: Registry,

    /// Requests by outcome: "hit" (mapping already present), "miss"
    /// (cold hostname, resolver invoked), "error" (any non-2xx/101 result).
    pub requests_total: IntCounterVec,

    /// Resolver (LLM judge) calls by result: "ok" or "error".
    pub resolver_calls_total: IntCounterVec,

    /// Resolver call latency, successes and failures alike.
    pub resolver_duration_seconds: HistogramVec,

    /// Discovery probe latency by kind ("process" / "container").
    pub probe_duration_seconds: HistogramVec,

    /// Count of hostnames currently in the mapping store.
    pub mappings_active: IntGauge,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("driftproxy_requests_total", "Total proxied requests by outcome")
                .namespace("driftproxy"),
            &["outcome"],
        )?;

        let resolver_calls_total = IntCounterVec::new(
            Opts::new(
                "driftproxy_resolver_calls_total",
                "Total LLM judge calls by result",
            )
            .namespace("driftproxy"),
            &["result"],
        )?;

        let resolver_duration_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "driftproxy_resolver_duration_seconds",
                "LLM judge call latency",
            )
            .namespace("driftproxy")
            .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0]),
            &["result"],
        )?;

        let probe_duration_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "driftproxy_probe_duration_seconds",
                "Discovery probe latency",
            )
            .namespace("driftproxy")
            .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["kind"],
        )?;

        let mappings_active = IntGauge::new(
            "driftproxy_mappings_active",
            "Number of hostnames currently in the mapping store",
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(resolver_calls_total.clone()))?;
        registry.register(Box::new(resolver_duration_seconds.clone()))?;
        registry.register(Box::new(probe_duration_seconds.clone()))?;
        registry.register(Box::new(mappings_active.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            resolver_calls_total,
            resolver_duration_seconds,
            probe_duration_seconds,
            mappings_active,
        })
    }

    pub fn record_request(&self, outcome: &str) {
        self.requests_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_resolver_call(&self, result: &str, duration_secs: f64) {
        self.resolver_calls_total.with_label_values(&[result]).inc();
        self.resolver_duration_seconds
            .with_label_values(&[result])
            .observe(duration_secs);
    }

    pub fn record_probe(&self, kind: &str, duration_secs: f64) {
        self.probe_duration_seconds
            .with_label_values(&[kind])
            .observe(duration_secs);
    }

    pub fn set_mappings_active(&self, count: i64) {
        self.mappings_active.set(count);
    }

    /// Prometheus text exposition, served at `/_debug/metrics`.
    pub fn gather_text(&self) -> String {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&families, &mut buffer).unwrap_or_default();
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("failed to construct metrics registry")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_request_increments_outcome_counter() {
        let metrics = Metrics::new().unwrap();
        metrics.record_request("hit");
        metrics.record_request("hit");
        metrics.record_request("miss");
        let text = metrics.gather_text();
        assert!(text.contains("driftproxy_requests_total"));
    }

    #[test]
    fn set_mappings_active_reflects_in_gather() {
        let metrics = Metrics::new().unwrap();
        metrics.set_mappings_active(7);
        let text = metrics.gather_text();
        assert!(text.contains("driftproxy_mappings_active 7"));
    }

    #[test]
    fn record_resolver_call_tracks_latency() {
        let metrics = Metrics::new().unwrap();
        metrics.record_resolver_call("ok", 1.2);
        metrics.record_resolver_call("error", 30.0);
        let text = metrics.gather_text();
        assert!(text.contains("driftproxy_resolver_duration_seconds"));
    }
}
