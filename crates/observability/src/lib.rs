// crates/observability/src/lib.rs

use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

pub mod metrics;

use metrics::{MetricType, Metrics};

/// Metrics collector shared across orchestrator components.
pub struct MetricsCollector {
    metrics: Arc<Metrics>,
    registry: Registry,
    gauges: GaugeVec,
    start_time: Instant,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        let registry = Registry::new();
        let gauges = GaugeVec::new(
            Opts::new("lotse_metric", "LOTSE orchestrator counters and gauges"),
            &["name"],
        )
        .expect("static metric options are valid");
        registry
            .register(Box::new(gauges.clone()))
            .expect("metric family registers once");

        Self {
            metrics: Arc::new(Metrics::new()),
            registry,
            gauges,
            start_time: Instant::now(),
        }
    }

    pub fn record(&self, metric: MetricType, value: f64) {
        self.metrics.record(metric, value);
        self.gauges.with_label_values(&[metric.name()]).set(value);
    }

    pub fn add(&self, metric: MetricType, value: f64) {
        self.metrics.add(metric, value);
        self.gauges.with_label_values(&[metric.name()]).add(value);
    }

    pub fn increment(&self, metric: MetricType) {
        self.add(metric, 1.0);
    }

    pub fn get(&self, metric: MetricType) -> Option<f64> {
        self.metrics.get(metric)
    }

    pub fn get_prometheus_metrics(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = vec![];
        if encoder.encode(&metric_families, &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }

    pub fn get_health_status(&self) -> HealthStatus {
        HealthStatus {
            healthy: true,
            uptime_seconds: self.start_time.elapsed().as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            metrics: self.metrics.get_summary(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub uptime_seconds: u64,
    pub version: String,
    pub metrics: MetricsSummary,
}

#[derive(Debug, Serialize)]
pub struct MetricsSummary {
    pub frames_evaluated: u64,
    pub frames_sent: u64,
    pub events_dispatched: u64,
    pub request_timeouts: u64,
    pub utterances_composed: u64,
    pub barge_ins: u64,
    pub errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let collector = MetricsCollector::new();
        collector.increment(MetricType::FramesEvaluated);
        collector.increment(MetricType::FramesEvaluated);
        collector.add(MetricType::FramesSent, 3.0);

        let summary = collector.get_health_status().metrics;
        assert_eq!(summary.frames_evaluated, 2);
        assert_eq!(summary.frames_sent, 3);
    }

    #[test]
    fn exposition_includes_recorded_metric() {
        let collector = MetricsCollector::new();
        collector.record(MetricType::PlaybackDurationMs, 420.0);

        let text = collector.get_prometheus_metrics();
        assert!(text.contains("lotse_metric"));
        assert!(text.contains("playback_duration_ms"));
    }
}
