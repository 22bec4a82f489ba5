// crates/dispatch/src/lib.rs

use std::sync::Arc;
use std::time::{Duration, Instant};

use lotse_config::{DegradedPolicy, DispatchConfig};
use lotse_core::{
    Capability, ConnectivityState, InferenceOutcome, InferenceRequest, InferenceResult,
    LotseError, SensingEvent, SensingTrigger, Target,
};
use lotse_observability::metrics::MetricType;
use lotse_observability::MetricsCollector;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

pub mod local;
pub mod provider;
pub mod remote;

pub use local::LocalProvider;
pub use provider::{CapabilityProvider, RequestPayload};
pub use remote::RemoteProvider;

/// Fans one sensing event out into concurrent capability calls, each with
/// its own deadline and at most one timeout retry, and guarantees exactly
/// one terminal `InferenceResult` per capability no matter how the targets
/// behave.
pub struct RequestDispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    config: DispatchConfig,
    remote: Arc<dyn CapabilityProvider>,
    local: Arc<dyn CapabilityProvider>,
    connectivity: watch::Receiver<ConnectivityState>,
    metrics: Option<Arc<MetricsCollector>>,
}

enum Attempt {
    Ok(InferenceOutcome),
    Failed(LotseError),
    TimedOut,
    Cancelled,
}

impl RequestDispatcher {
    pub fn new(
        config: DispatchConfig,
        remote: Arc<dyn CapabilityProvider>,
        local: Arc<dyn CapabilityProvider>,
        connectivity: watch::Receiver<ConnectivityState>,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                config,
                remote,
                local,
                connectivity,
                metrics,
            }),
        }
    }

    /// Issue all capability requests for one event concurrently. The
    /// returned stream yields exactly one result per requested capability
    /// and closes once the event is resolved.
    pub fn submit(
        &self,
        event: &SensingEvent,
        cancel: &CancellationToken,
    ) -> mpsc::Receiver<InferenceResult> {
        let capacity = event.capabilities.len().max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let semaphore = Arc::new(Semaphore::new(self.inner.config.fan_out_limit));

        if let Some(metrics) = &self.inner.metrics {
            metrics.increment(MetricType::EventsDispatched);
        }

        for capability in event.capabilities.clone() {
            let inner = Arc::clone(&self.inner);
            let tx = tx.clone();
            let cancel = cancel.clone();
            let semaphore = Arc::clone(&semaphore);
            let event_id = event.id;
            let payload = payload_for(&event.trigger, capability);

            tokio::spawn(async move {
                let result = match payload {
                    Some(payload) => {
                        let _permit = match semaphore.acquire_owned().await {
                            Ok(permit) => permit,
                            Err(_) => return,
                        };
                        inner.execute(event_id, capability, payload, cancel).await
                    }
                    None => {
                        warn!(
                            %capability,
                            "Capability has no payload for this trigger; emitting synthetic error"
                        );
                        InferenceResult::failed(event_id, capability, Duration::ZERO)
                    }
                };

                let _ = tx.send(result).await;
            });
        }

        rx
    }

    /// Single-capability request through the same routing, deadline, and
    /// retry machinery; used for dialogue replies and speech synthesis.
    pub async fn request(
        &self,
        event_id: Uuid,
        capability: Capability,
        payload: RequestPayload,
        cancel: &CancellationToken,
    ) -> InferenceResult {
        self.inner
            .execute(event_id, capability, payload, cancel.clone())
            .await
    }

    /// Collect the full result set for one event.
    pub async fn resolve(
        &self,
        event: &SensingEvent,
        cancel: &CancellationToken,
    ) -> Vec<InferenceResult> {
        let expected = event.capabilities.len();
        let mut rx = self.submit(event, cancel);
        let mut results = Vec::with_capacity(expected);

        while results.len() < expected {
            match rx.recv().await {
                Some(result) => results.push(result),
                None => break,
            }
        }

        results
    }
}

impl DispatcherInner {
    fn route(&self, state: ConnectivityState, capability: Capability) -> (Target, Duration) {
        let configured = Duration::from_millis(self.deadline_ms(capability));
        let budget = Duration::from_millis(self.config.event_budget_ms);
        let deadline = configured.min(budget);

        match state {
            ConnectivityState::Online => (Target::Remote, deadline),
            ConnectivityState::Offline => (Target::Local, deadline),
            ConnectivityState::Degraded => match self.config.degraded_policy {
                DegradedPolicy::PreferRemote => (
                    Target::Remote,
                    deadline.mul_f64(self.config.degraded_deadline_factor.max(0.01)),
                ),
                DegradedPolicy::PreferLocal => (Target::Local, deadline),
            },
        }
    }

    fn deadline_ms(&self, capability: Capability) -> u64 {
        let deadlines = &self.config.deadlines;
        match capability {
            Capability::Detection => deadlines.detection_ms,
            Capability::Caption => deadlines.caption_ms,
            Capability::Ocr => deadlines.ocr_ms,
            Capability::Transcription => deadlines.transcription_ms,
            Capability::Dialogue => deadlines.dialogue_ms,
            Capability::Speech => deadlines.speech_ms,
        }
    }

    async fn execute(
        &self,
        event_id: Uuid,
        capability: Capability,
        payload: RequestPayload,
        cancel: CancellationToken,
    ) -> InferenceResult {
        let state = *self.connectivity.borrow();
        let (target, deadline) = self.route(state, capability);
        let request = InferenceRequest {
            event_id,
            capability,
            target,
            deadline,
        };
        let provider = match target {
            Target::Remote => Arc::clone(&self.remote),
            Target::Local => Arc::clone(&self.local),
        };

        self.count(MetricType::RequestsIssued);
        let started = Instant::now();

        debug!(
            %capability,
            ?target,
            deadline_ms = deadline.as_millis() as u64,
            connectivity = %state,
            "Dispatching inference request"
        );

        match attempt(provider.as_ref(), &request, &payload, deadline, &cancel).await {
            Attempt::Ok(outcome) => {
                InferenceResult::ok(event_id, capability, outcome, started.elapsed())
            }
            Attempt::Failed(err) => {
                // Explicit service errors are terminal; only timeouts retry.
                self.count(MetricType::RequestErrors);
                warn!(%capability, provider = provider.name(), "Inference failed: {err}");
                InferenceResult::failed(event_id, capability, started.elapsed())
            }
            Attempt::Cancelled => InferenceResult::failed(event_id, capability, started.elapsed()),
            Attempt::TimedOut => {
                self.count(MetricType::RequestTimeouts);
                self.count(MetricType::RequestsRetried);
                warn!(
                    %capability,
                    provider = provider.name(),
                    deadline_ms = deadline.as_millis() as u64,
                    "Inference timed out; retrying once"
                );

                let backoff = Duration::from_millis(self.config.retry_backoff_ms);
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return InferenceResult::failed(event_id, capability, started.elapsed());
                    }
                    _ = time::sleep(backoff) => {}
                }

                // The retry never pushes the event past its overall budget
                // plus one backoff.
                let budget = Duration::from_millis(self.config.event_budget_ms);
                let retry_deadline = deadline.min(budget.saturating_sub(started.elapsed()));
                if retry_deadline.is_zero() {
                    self.count(MetricType::RequestTimeouts);
                    return InferenceResult::timed_out(event_id, capability, started.elapsed());
                }

                match attempt(provider.as_ref(), &request, &payload, retry_deadline, &cancel).await {
                    Attempt::Ok(outcome) => {
                        InferenceResult::ok(event_id, capability, outcome, started.elapsed())
                    }
                    Attempt::Failed(err) => {
                        self.count(MetricType::RequestErrors);
                        warn!(%capability, "Inference retry failed: {err}");
                        InferenceResult::failed(event_id, capability, started.elapsed())
                    }
                    Attempt::Cancelled => {
                        InferenceResult::failed(event_id, capability, started.elapsed())
                    }
                    Attempt::TimedOut => {
                        self.count(MetricType::RequestTimeouts);
                        InferenceResult::timed_out(event_id, capability, started.elapsed())
                    }
                }
            }
        }
    }

    fn count(&self, metric: MetricType) {
        if let Some(metrics) = &self.metrics {
            metrics.increment(metric);
        }
    }
}

async fn attempt(
    provider: &dyn CapabilityProvider,
    request: &InferenceRequest,
    payload: &RequestPayload,
    deadline: Duration,
    cancel: &CancellationToken,
) -> Attempt {
    if cancel.is_cancelled() {
        return Attempt::Cancelled;
    }

    tokio::select! {
        _ = cancel.cancelled() => Attempt::Cancelled,
        invoked = time::timeout(deadline, provider.invoke(request, payload)) => {
            match invoked {
                Ok(Ok(outcome)) => Attempt::Ok(outcome),
                Ok(Err(err)) => Attempt::Failed(err),
                Err(_) => Attempt::TimedOut,
            }
        }
    }
}

fn payload_for(trigger: &SensingTrigger, capability: Capability) -> Option<RequestPayload> {
    match (trigger, capability) {
        (
            SensingTrigger::Frame(frame),
            Capability::Detection | Capability::Caption | Capability::Ocr,
        ) => Some(RequestPayload::from_frame(frame)),
        (SensingTrigger::Voice { segment, .. }, Capability::Transcription) => {
            Some(RequestPayload::from_audio(segment))
        }
        _ => None,
    }
}
