use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lotse::{Orchestrator, SilentAudioSource, SimulatedAudioSource, SimulatedFrameSource};
use lotse_config::LotseConfig;
use lotse_core::{
    AudioSegment, Capability, ConnectivityState, ConversationState, InferenceOutcome,
    InferenceRequest, LabeledBox, LotseResult, SpeechAudio,
};
use lotse_dialogue::SimulatedSink;
use lotse_dispatch::{CapabilityProvider, RequestPayload};
use lotse_observability::metrics::MetricType;
use lotse_observability::MetricsCollector;
use tokio::sync::watch;
use tokio::time::timeout;

/// Deterministic stand-in for both the cloud services and the local
/// runner. Captions depend on frame brightness so distinct scenes compose
/// distinct utterances.
struct StubProvider {
    speech_ms: u64,
}

#[async_trait]
impl CapabilityProvider for StubProvider {
    async fn invoke(
        &self,
        request: &InferenceRequest,
        payload: &RequestPayload,
    ) -> LotseResult<InferenceOutcome> {
        Ok(match request.capability {
            Capability::Detection => InferenceOutcome::Detections(vec![LabeledBox {
                label: "door".to_string(),
                confidence: 0.9,
                x: 0.0,
                y: 0.0,
                width: 1.0,
                height: 1.0,
            }]),
            Capability::Caption => {
                let luma = match payload {
                    RequestPayload::Image(bytes) => bytes.first().copied().unwrap_or(0),
                    _ => 0,
                };
                if luma < 128 {
                    InferenceOutcome::Caption("a dark room".to_string())
                } else {
                    InferenceOutcome::Caption("a bright hallway".to_string())
                }
            }
            Capability::Ocr => InferenceOutcome::OcrText {
                text: String::new(),
                regions: Vec::new(),
            },
            Capability::Transcription => InferenceOutcome::Transcript("what do you see".to_string()),
            Capability::Dialogue => InferenceOutcome::Reply("There is a door ahead.".to_string()),
            Capability::Speech => {
                let bytes = (16 * 2 * self.speech_ms) as usize; // 16kHz mono s16le
                InferenceOutcome::Speech(SpeechAudio::new(vec![0u8; bytes], 16_000))
            }
        })
    }

    fn name(&self) -> &str {
        "stub"
    }
}

fn orchestrator(
    speech_ms: u64,
) -> (
    Orchestrator,
    Arc<MetricsCollector>,
    watch::Sender<ConnectivityState>,
) {
    let provider = Arc::new(StubProvider { speech_ms });
    let metrics = Arc::new(MetricsCollector::new());
    // The monitor is exercised in its own crate; a pinned state is enough
    // here.
    let (connectivity_tx, connectivity_rx) = watch::channel(ConnectivityState::Online);

    let orchestrator = Orchestrator::new(
        LotseConfig::default(),
        Arc::clone(&provider) as Arc<dyn CapabilityProvider>,
        provider,
        connectivity_rx,
        Arc::new(SimulatedSink::new()),
        Arc::clone(&metrics),
    );
    (orchestrator, metrics, connectivity_tx)
}

#[tokio::test]
async fn starts_and_stops_cleanly() {
    let (mut orchestrator, _metrics, _connectivity) = orchestrator(20);
    orchestrator
        .start(
            Box::new(SimulatedFrameSource::new(vec![], Duration::from_millis(5))),
            Box::new(SilentAudioSource),
        )
        .expect("orchestrator starts");

    tokio::time::sleep(Duration::from_millis(50)).await;
    orchestrator.stop().await.expect("orchestrator stops");
}

#[tokio::test]
async fn distinct_scenes_are_described_and_repeats_suppressed() {
    let (mut orchestrator, metrics, _connectivity) = orchestrator(20);
    let mut utterances = orchestrator
        .take_utterance_receiver()
        .expect("utterance receiver available");

    // Two dwells on a dark scene (second frame suppressed), then a bright
    // one. The interval is comfortably longer than playback so each scene
    // finishes speaking before the next frame can supersede it.
    let frames = SimulatedFrameSource::new(vec![40, 40, 230], Duration::from_millis(150));
    orchestrator
        .start(Box::new(frames), Box::new(SilentAudioSource))
        .expect("orchestrator starts");

    let first = timeout(Duration::from_secs(2), utterances.recv())
        .await
        .expect("first utterance in time")
        .expect("channel open");
    assert!(first.text.contains("a dark room"), "{}", first.text);
    assert!(first.text.contains("door"), "{}", first.text);
    assert!(first.played);

    let second = timeout(Duration::from_secs(2), utterances.recv())
        .await
        .expect("second utterance in time")
        .expect("channel open");
    assert!(second.text.contains("a bright hallway"), "{}", second.text);

    orchestrator.stop().await.expect("orchestrator stops");

    assert_eq!(metrics.get(MetricType::FramesEvaluated), Some(3.0));
    assert_eq!(metrics.get(MetricType::FramesSent), Some(2.0));
    assert_eq!(metrics.get(MetricType::FramesSuppressed), Some(1.0));
}

#[tokio::test]
async fn voice_turn_barges_in_and_gets_a_grounded_reply() {
    // Long scene speech so the voice turn lands mid-playback.
    let (mut orchestrator, metrics, _connectivity) = orchestrator(2_000);
    let mut utterances = orchestrator
        .take_utterance_receiver()
        .expect("utterance receiver available");

    let frames = SimulatedFrameSource::new(vec![40], Duration::from_millis(5));
    let audio = SimulatedAudioSource::new(vec![(
        Duration::from_millis(300),
        AudioSegment::new(16_000, vec![0u8; 16_000]),
    )]);

    orchestrator
        .start(Box::new(frames), Box::new(audio))
        .expect("orchestrator starts");

    let scene = timeout(Duration::from_secs(3), utterances.recv())
        .await
        .expect("scene utterance in time")
        .expect("channel open");
    assert!(scene.text.contains("a dark room"));

    let reply = timeout(Duration::from_secs(6), utterances.recv())
        .await
        .expect("reply in time")
        .expect("channel open");
    assert_eq!(reply.text, "There is a door ahead.");
    assert!(reply.played);

    orchestrator.stop().await.expect("orchestrator stops");

    assert_eq!(metrics.get(MetricType::BargeIns), Some(1.0));
    assert_eq!(orchestrator.conversation_state(), ConversationState::Idle);
}

#[tokio::test]
async fn every_event_yields_spoken_feedback_even_when_services_fail() {
    struct BrokenProvider;

    #[async_trait]
    impl CapabilityProvider for BrokenProvider {
        async fn invoke(
            &self,
            request: &InferenceRequest,
            _payload: &RequestPayload,
        ) -> LotseResult<InferenceOutcome> {
            match request.capability {
                // Speech still works; everything upstream is down.
                Capability::Speech => Ok(InferenceOutcome::Speech(SpeechAudio::new(
                    vec![0u8; 640],
                    16_000,
                ))),
                _ => Err(lotse_core::LotseError::Dispatch("service down".to_string())),
            }
        }

        fn name(&self) -> &str {
            "broken"
        }
    }

    let provider = Arc::new(BrokenProvider);
    let metrics = Arc::new(MetricsCollector::new());
    let (_connectivity, rx) = watch::channel(ConnectivityState::Online);

    let config = LotseConfig::default();
    let fallback = config.fusion.fallback_utterance.clone();

    let mut orchestrator = Orchestrator::new(
        config,
        Arc::clone(&provider) as Arc<dyn CapabilityProvider>,
        provider,
        rx,
        Arc::new(SimulatedSink::new()),
        Arc::clone(&metrics),
    );
    let mut utterances = orchestrator
        .take_utterance_receiver()
        .expect("utterance receiver available");

    let frames = SimulatedFrameSource::new(vec![40], Duration::from_millis(5));
    orchestrator
        .start(Box::new(frames), Box::new(SilentAudioSource))
        .expect("orchestrator starts");

    let utterance = timeout(Duration::from_secs(3), utterances.recv())
        .await
        .expect("fallback utterance in time")
        .expect("channel open");
    assert_eq!(utterance.text, fallback);
    assert!(utterance.played);

    orchestrator.stop().await.expect("orchestrator stops");
    assert_eq!(metrics.get(MetricType::FallbackUtterances), Some(1.0));
}
