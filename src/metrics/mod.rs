/// Best-effort metric recording
///
/// Recording must never influence routing: sinks swallow their own failures.
use parking_lot::Mutex;
use prometheus::{Encoder, Gauge, Registry, TextEncoder};
use std::collections::HashMap;

/// Gauge reporting how many replicas the host pool currently manages
pub const HOST_COUNT_GAUGE: &str = "db_load_balancing_hosts";

/// Destination for gauge updates
pub trait MetricsSink: Send + Sync {
    fn gauge(&self, name: &str, value: f64);
}

/// Sink that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn gauge(&self, _name: &str, _value: f64) {}
}

/// Sink that publishes gauges to a Prometheus registry
pub struct PrometheusMetrics {
    registry: Registry,
    gauges: Mutex<HashMap<String, Gauge>>,
}

impl PrometheusMetrics {
    pub fn new() -> Self {
        Self::with_registry(Registry::new())
    }

    pub fn with_registry(registry: Registry) -> Self {
        Self {
            registry,
            gauges: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render all registered metrics in the Prometheus text format
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::debug!("Failed to encode metrics: {}", e);
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }

    fn register_gauge(&self, name: &str) -> Option<Gauge> {
        let gauge = match Gauge::new(name, format!("balanza gauge {}", name)) {
            Ok(gauge) => gauge,
            Err(e) => {
                tracing::debug!("Invalid gauge {}: {}", name, e);
                return None;
            }
        };
        if let Err(e) = self.registry.register(Box::new(gauge.clone())) {
            tracing::debug!("Failed to register gauge {}: {}", name, e);
            return None;
        }
        Some(gauge)
    }
}

impl Default for PrometheusMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSink for PrometheusMetrics {
    fn gauge(&self, name: &str, value: f64) {
        let mut gauges = self.gauges.lock();
        if let Some(gauge) = gauges.get(name) {
            gauge.set(value);
            return;
        }
        if let Some(gauge) = self.register_gauge(name) {
            gauge.set(value);
            gauges.insert(name.to_string(), gauge);
        }
    }
}
