use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

// ============================================================================
// Metrics Module - Prometheus metrics for the order pipeline
// ============================================================================
//
// Covers:
// - Ingestion outcomes per message
// - Persistence latency and retry attempts
// - Cache hit/miss ratio and size
// - Dead-letter volume and the dead-letter circuit breaker
//
// Everything is registered on a private registry exposed at GET /metrics.
// ============================================================================

pub struct Metrics {
    registry: Registry,

    // Ingestion
    pub orders_ingested: IntCounterVec,
    pub persist_duration: Histogram,
    pub persist_retry_attempts: IntCounter,

    // Cache
    pub cache_lookups: IntCounterVec,
    pub cache_size: IntGauge,

    // Dead letters
    pub dead_letter_messages: IntCounterVec,
    pub circuit_breaker_state: IntGauge,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let orders_ingested = IntCounterVec::new(
            Opts::new("orders_ingested_total", "Feed messages by ingestion outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(orders_ingested.clone()))?;

        let persist_duration = Histogram::with_opts(
            HistogramOpts::new(
                "orders_persist_duration_seconds",
                "Time spent persisting one order, retries included",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )?;
        registry.register(Box::new(persist_duration.clone()))?;

        let persist_retry_attempts = IntCounter::new(
            "persist_retry_attempts_total",
            "Persistence attempts beyond the first one",
        )?;
        registry.register(Box::new(persist_retry_attempts.clone()))?;

        let cache_lookups = IntCounterVec::new(
            Opts::new("order_cache_lookups_total", "Order cache lookups by result"),
            &["result"],
        )?;
        registry.register(Box::new(cache_lookups.clone()))?;

        let cache_size = IntGauge::new("order_cache_size", "Orders held in the cache")?;
        registry.register(Box::new(cache_size.clone()))?;

        let dead_letter_messages = IntCounterVec::new(
            Opts::new("dead_letter_messages_total", "Messages routed to the dead-letter topic"),
            &["reason"],
        )?;
        registry.register(Box::new(dead_letter_messages.clone()))?;

        let circuit_breaker_state = IntGauge::new(
            "circuit_breaker_state",
            "Dead-letter producer circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)",
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        Ok(Self {
            registry,
            orders_ingested,
            persist_duration,
            persist_retry_attempts,
            cache_lookups,
            cache_size,
            dead_letter_messages,
            circuit_breaker_state,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Outcome label: saved, decode_error, validation_error, persistence_error
    pub fn record_ingested(&self, outcome: &str) {
        self.orders_ingested.with_label_values(&[outcome]).inc();
    }

    pub fn record_persist(&self, duration_secs: f64, attempts: u32) {
        self.persist_duration.observe(duration_secs);
        if attempts > 1 {
            self.persist_retry_attempts.inc_by(u64::from(attempts - 1));
        }
    }

    pub fn record_cache_lookup(&self, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        self.cache_lookups.with_label_values(&[result]).inc();
    }

    pub fn set_cache_size(&self, size: usize) {
        self.cache_size.set(size as i64);
    }

    pub fn record_dead_letter(&self, reason: &str) {
        self.dead_letter_messages.with_label_values(&[reason]).inc();
    }

    pub fn update_circuit_breaker_state(&self, state: i64) {
        self.circuit_breaker_state.set(state);
    }

    /// Prometheus text exposition of every registered metric
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        metrics.record_ingested("saved");
        assert!(!metrics.registry.gather().is_empty());
    }

    #[test]
    fn test_record_ingested() {
        let metrics = Metrics::new().unwrap();
        metrics.record_ingested("saved");
        metrics.record_ingested("saved");
        metrics.record_ingested("validation_error");

        let gathered = metrics.registry.gather();
        let ingested = gathered.iter().find(|m| m.name() == "orders_ingested_total").unwrap();
        assert_eq!(ingested.metric.len(), 2); // Two different outcome labels
    }

    #[test]
    fn test_record_persist_counts_only_retries() {
        let metrics = Metrics::new().unwrap();
        metrics.record_persist(0.01, 1);
        metrics.record_persist(0.2, 3);

        assert_eq!(metrics.persist_retry_attempts.get(), 2);
        assert_eq!(metrics.persist_duration.get_sample_count(), 2);
    }

    #[test]
    fn test_cache_lookup_labels() {
        let metrics = Metrics::new().unwrap();
        metrics.record_cache_lookup(true);
        metrics.record_cache_lookup(false);
        metrics.record_cache_lookup(false);

        assert_eq!(metrics.cache_lookups.with_label_values(&["hit"]).get(), 1);
        assert_eq!(metrics.cache_lookups.with_label_values(&["miss"]).get(), 2);
    }

    #[test]
    fn test_encode_text_format() {
        let metrics = Metrics::new().unwrap();
        metrics.record_dead_letter("validation");
        metrics.set_cache_size(42);

        let body = String::from_utf8(metrics.encode().unwrap()).unwrap();
        assert!(body.contains("dead_letter_messages_total{reason=\"validation\"} 1"));
        assert!(body.contains("order_cache_size 42"));
    }
}
