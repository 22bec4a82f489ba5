// crates/dialogue/src/lib.rs

use std::sync::Arc;

use lotse_core::{ConversationState, LotseResult, SensingEvent, SpeechAudio};
use lotse_observability::metrics::MetricType;
use lotse_observability::MetricsCollector;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub mod sink;

pub use sink::{AudioSink, PlaybackOutcome, SimulatedSink};

#[cfg(feature = "hardware-audio")]
pub use sink::HardwareSink;

/// What happened to an utterance handed to `speak`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakOutcome {
    Played(PlaybackOutcome),
    /// The event lost the active slot before its audio reached the sink.
    Discarded,
}

struct ActiveEvent {
    id: Uuid,
    cancel: CancellationToken,
}

/// Owns the conversational state machine and the single-playback
/// invariant. Only this component mutates `ConversationState`; everyone
/// else reads snapshots. At most one sensing event holds the
/// thinking/speaking slot; activating a newer one cancels the older one's
/// in-flight work (last-wins), and entering listening while speaking is a
/// barge-in that hard-stops the sink.
pub struct TurnCoordinator {
    state: Arc<RwLock<ConversationState>>,
    sink: Arc<dyn AudioSink>,
    playback: Arc<Semaphore>,
    active: Mutex<Option<ActiveEvent>>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl TurnCoordinator {
    pub fn new(sink: Arc<dyn AudioSink>, metrics: Option<Arc<MetricsCollector>>) -> Self {
        Self {
            state: Arc::new(RwLock::new(ConversationState::Idle)),
            sink,
            playback: Arc::new(Semaphore::new(1)),
            active: Mutex::new(None),
            metrics,
        }
    }

    pub fn snapshot(&self) -> ConversationState {
        *self.state.read()
    }

    /// Claim the active slot for an event, cancelling whichever event held
    /// it before. Returns the cancellation token to thread through the
    /// event's inference requests.
    pub fn activate(&self, event: &SensingEvent) -> CancellationToken {
        let token = CancellationToken::new();
        let mut active = self.active.lock();

        if let Some(previous) = active.take() {
            debug!(
                superseded = %previous.id,
                by = %event.id,
                "Newer sensing event supersedes the active one"
            );
            previous.cancel.cancel();
        }

        *active = Some(ActiveEvent {
            id: event.id,
            cancel: token.clone(),
        });
        token
    }

    pub fn is_active(&self, event_id: Uuid) -> bool {
        self.active
            .lock()
            .as_ref()
            .is_some_and(|active| active.id == event_id)
    }

    /// Wake-signal entry point. Barge-in: if speech output is in progress
    /// it is stopped immediately (not drained) and the event composing it
    /// is discarded.
    pub fn begin_listening(&self) {
        let was_speaking = self.snapshot() == ConversationState::Speaking;

        if was_speaking {
            info!("Barge-in: stopping active speech output");
            self.sink.stop();
            if let Some(metrics) = &self.metrics {
                metrics.increment(MetricType::BargeIns);
            }
        }

        if let Some(previous) = self.active.lock().take() {
            previous.cancel.cancel();
        }

        self.set_state(ConversationState::Listening);
    }

    /// The captured audio is on its way through transcription and
    /// dialogue; only the event holding the slot may enter thinking.
    pub fn begin_thinking(&self, event_id: Uuid) -> bool {
        if !self.is_active(event_id) {
            return false;
        }
        self.set_state(ConversationState::Thinking);
        true
    }

    /// Play a composed utterance for the given event. Stale events are
    /// discarded rather than spoken; the sink is a strict mutual-exclusion
    /// resource, acquired for the whole playback.
    pub async fn speak(&self, event_id: Uuid, audio: SpeechAudio) -> LotseResult<SpeakOutcome> {
        if !self.is_active(event_id) {
            debug!(event = %event_id, "Dropping utterance for superseded event");
            return Ok(SpeakOutcome::Discarded);
        }

        let permit = self
            .playback
            .acquire()
            .await
            .map_err(|_| lotse_core::LotseError::Audio("Playback semaphore closed".to_string()))?;

        // The slot may have changed hands while we waited for the sink.
        if !self.is_active(event_id) {
            drop(permit);
            debug!(event = %event_id, "Event superseded while waiting for the sink");
            return Ok(SpeakOutcome::Discarded);
        }

        self.set_state(ConversationState::Speaking);
        let duration = audio.playback_duration();
        let outcome = self.sink.play(audio).await;
        drop(permit);

        match outcome {
            Ok(playback) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record(MetricType::PlaybackDurationMs, duration.as_millis() as f64);
                }

                if playback == PlaybackOutcome::Completed {
                    self.release(event_id);
                    if self.snapshot() == ConversationState::Speaking {
                        self.set_state(ConversationState::Idle);
                    }
                }
                // On Stopped the barge-in path has already moved the state
                // to Listening and cleared the slot.

                Ok(SpeakOutcome::Played(playback))
            }
            Err(err) => {
                warn!(event = %event_id, "Playback failed: {err}");
                self.release(event_id);
                if self.snapshot() == ConversationState::Speaking {
                    self.set_state(ConversationState::Idle);
                }
                Err(err)
            }
        }
    }

    /// Release the slot for an event that resolved without speech (for
    /// example a suppressed repeat). A stale event id leaves both the slot
    /// and the state alone.
    pub fn finish(&self, event_id: Uuid) {
        {
            let mut active = self.active.lock();
            if !active.as_ref().is_some_and(|a| a.id == event_id) {
                return;
            }
            *active = None;
        }

        let state = self.snapshot();
        if state == ConversationState::Thinking || state == ConversationState::Speaking {
            self.set_state(ConversationState::Idle);
        }
    }

    fn release(&self, event_id: Uuid) {
        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|a| a.id == event_id) {
            *active = None;
        }
    }

    fn set_state(&self, next: ConversationState) {
        let mut state = self.state.write();
        if *state != next {
            debug!(from = %*state, to = %next, "Conversation state changed");
            *state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lotse_core::Frame;
    use std::time::{Duration, Instant};

    fn scene_event() -> SensingEvent {
        SensingEvent::scene(
            Frame::new(0, 8, 8, vec![0u8; 64]),
            vec![lotse_core::Capability::Caption],
        )
    }

    fn speech(ms: u64) -> SpeechAudio {
        let bytes = (16 * 2 * ms) as usize; // 16kHz mono s16le
        SpeechAudio::new(vec![0u8; bytes], 16_000)
    }

    fn coordinator() -> TurnCoordinator {
        TurnCoordinator::new(Arc::new(SimulatedSink::new()), None)
    }

    #[tokio::test]
    async fn full_turn_walks_the_state_machine() {
        let coordinator = coordinator();
        assert_eq!(coordinator.snapshot(), ConversationState::Idle);

        coordinator.begin_listening();
        assert_eq!(coordinator.snapshot(), ConversationState::Listening);

        let event = scene_event();
        coordinator.activate(&event);
        assert!(coordinator.begin_thinking(event.id));
        assert_eq!(coordinator.snapshot(), ConversationState::Thinking);

        let outcome = coordinator
            .speak(event.id, speech(20))
            .await
            .expect("speak succeeds");
        assert_eq!(outcome, SpeakOutcome::Played(PlaybackOutcome::Completed));
        assert_eq!(coordinator.snapshot(), ConversationState::Idle);
        assert!(!coordinator.is_active(event.id));
    }

    #[tokio::test]
    async fn barge_in_stops_playback_within_a_quantum() {
        let coordinator = Arc::new(coordinator());
        let event = scene_event();
        coordinator.activate(&event);

        let speaker = Arc::clone(&coordinator);
        let event_id = event.id;
        let handle = tokio::spawn(async move { speaker.speak(event_id, speech(2_000)).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(coordinator.snapshot(), ConversationState::Speaking);

        let started = Instant::now();
        coordinator.begin_listening();

        let outcome = handle
            .await
            .expect("speak task joins")
            .expect("speak result");
        assert_eq!(outcome, SpeakOutcome::Played(PlaybackOutcome::Stopped));
        assert!(started.elapsed() < Duration::from_millis(200));
        assert_eq!(coordinator.snapshot(), ConversationState::Listening);
    }

    #[tokio::test]
    async fn stale_event_output_is_discarded() {
        let coordinator = coordinator();

        let first = scene_event();
        let first_token = coordinator.activate(&first);

        let second = scene_event();
        coordinator.activate(&second);

        // Activating the newer event cancelled the older one.
        assert!(first_token.is_cancelled());
        let outcome = coordinator
            .speak(first.id, speech(20))
            .await
            .expect("speak resolves");
        assert_eq!(outcome, SpeakOutcome::Discarded);

        // The newer event still speaks.
        let outcome = coordinator
            .speak(second.id, speech(20))
            .await
            .expect("speak resolves");
        assert_eq!(outcome, SpeakOutcome::Played(PlaybackOutcome::Completed));
    }

    #[tokio::test]
    async fn playback_is_strictly_serialized() {
        let coordinator = Arc::new(coordinator());

        let first = scene_event();
        coordinator.activate(&first);
        let speaker = Arc::clone(&coordinator);
        let first_id = first.id;
        let first_play = tokio::spawn(async move { speaker.speak(first_id, speech(150)).await });

        tokio::time::sleep(Duration::from_millis(30)).await;

        // A later event must wait for the sink; its playback starts only
        // after the first one finishes.
        let second = scene_event();
        coordinator.activate(&second);
        let started = Instant::now();
        let outcome = coordinator
            .speak(second.id, speech(20))
            .await
            .expect("speak resolves");

        assert_eq!(outcome, SpeakOutcome::Played(PlaybackOutcome::Completed));
        assert!(started.elapsed() >= Duration::from_millis(100));

        first_play.await.expect("first playback joins").ok();
    }

    #[tokio::test]
    async fn finish_releases_the_slot_without_speaking() {
        let coordinator = coordinator();
        let event = scene_event();
        coordinator.activate(&event);
        coordinator.begin_thinking(event.id);

        coordinator.finish(event.id);
        assert_eq!(coordinator.snapshot(), ConversationState::Idle);
        assert!(!coordinator.is_active(event.id));
    }
}
