// crates/observability/src/metrics.rs
use crate::MetricsSummary;
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricType {
    FramesEvaluated,
    FramesSent,
    FramesSuppressed,
    ForcedSends,
    SensorFaults,
    ProbesSent,
    ProbeFailures,
    ConnectivityTransitions,
    EventsDispatched,
    RequestsIssued,
    RequestsRetried,
    RequestTimeouts,
    RequestErrors,
    UtterancesComposed,
    FallbackUtterances,
    RepeatsSuppressed,
    BargeIns,
    PlaybackDurationMs,
    Errors,
}

impl MetricType {
    pub fn name(&self) -> &'static str {
        match self {
            MetricType::FramesEvaluated => "frames_evaluated",
            MetricType::FramesSent => "frames_sent",
            MetricType::FramesSuppressed => "frames_suppressed",
            MetricType::ForcedSends => "forced_sends",
            MetricType::SensorFaults => "sensor_faults",
            MetricType::ProbesSent => "probes_sent",
            MetricType::ProbeFailures => "probe_failures",
            MetricType::ConnectivityTransitions => "connectivity_transitions",
            MetricType::EventsDispatched => "events_dispatched",
            MetricType::RequestsIssued => "requests_issued",
            MetricType::RequestsRetried => "requests_retried",
            MetricType::RequestTimeouts => "request_timeouts",
            MetricType::RequestErrors => "request_errors",
            MetricType::UtterancesComposed => "utterances_composed",
            MetricType::FallbackUtterances => "fallback_utterances",
            MetricType::RepeatsSuppressed => "repeats_suppressed",
            MetricType::BargeIns => "barge_ins",
            MetricType::PlaybackDurationMs => "playback_duration_ms",
            MetricType::Errors => "errors",
        }
    }
}

#[derive(Default)]
pub struct Metrics {
    values: RwLock<HashMap<MetricType, f64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, metric: MetricType, value: f64) {
        let mut values = self.values.write();
        values.insert(metric, value);
    }

    pub fn add(&self, metric: MetricType, value: f64) {
        let mut values = self.values.write();
        *values.entry(metric).or_insert(0.0) += value;
    }

    pub fn increment(&self, metric: MetricType) {
        self.add(metric, 1.0);
    }

    pub fn get(&self, metric: MetricType) -> Option<f64> {
        let values = self.values.read();
        values.get(&metric).copied()
    }

    pub fn get_summary(&self) -> MetricsSummary {
        let values = self.values.read();
        let read = |metric: MetricType| values.get(&metric).copied().unwrap_or_default() as u64;

        MetricsSummary {
            frames_evaluated: read(MetricType::FramesEvaluated),
            frames_sent: read(MetricType::FramesSent),
            events_dispatched: read(MetricType::EventsDispatched),
            request_timeouts: read(MetricType::RequestTimeouts),
            utterances_composed: read(MetricType::UtterancesComposed),
            barge_ins: read(MetricType::BargeIns),
            errors: read(MetricType::Errors),
        }
    }

    pub fn snapshot(&self) -> Vec<(MetricType, f64)> {
        let values = self.values.read();
        values.iter().map(|(k, v)| (*k, *v)).collect()
    }
}
