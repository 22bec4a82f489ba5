// src/pipeline.rs

use std::sync::Arc;

use lotse_config::LotseConfig;
use lotse_core::{
    Capability, ConnectivityState, ConversationState, InferenceOutcome, InferenceResult,
    LotseError, LotseResult, SendReason, SensingEvent,
};
use lotse_acquisition::AcquisitionEngine;
use lotse_dialogue::{AudioSink, SpeakOutcome, TurnCoordinator};
use lotse_dispatch::{CapabilityProvider, RequestDispatcher, RequestPayload};
use lotse_fusion::ResponseComposer;
use lotse_observability::metrics::MetricType;
use lotse_observability::MetricsCollector;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::sources::{AudioSegmentSource, FrameSource};

/// Everything the orchestrator said (or decided not to play), for
/// observers and tests.
#[derive(Debug, Clone)]
pub struct SpokenUtterance {
    pub event_id: Uuid,
    pub text: String,
    pub played: bool,
}

/// Scene context remembered for conversational grounding: the latest
/// caption and detection labels, combined into dialogue prompts so replies
/// can reference what the camera currently sees.
#[derive(Debug, Default, Clone)]
struct SceneMemory {
    caption: Option<String>,
    labels: Vec<String>,
}

#[derive(Debug)]
enum ControlMessage {
    Shutdown { ack: oneshot::Sender<()> },
}

#[derive(Clone)]
struct OrchestratorContext {
    config: Arc<LotseConfig>,
    dispatcher: Arc<RequestDispatcher>,
    coordinator: Arc<TurnCoordinator>,
    composer: Arc<Mutex<ResponseComposer>>,
    scene: Arc<Mutex<SceneMemory>>,
    metrics: Arc<MetricsCollector>,
    utterance_tx: mpsc::UnboundedSender<SpokenUtterance>,
}

/// The perception-and-dispatch loop: frames go through the acquisition
/// gate into fan-out inference and composed speech; voice turns barge in,
/// get transcribed, and come back as scene-grounded replies. One sensing
/// event owns the response slot at a time; newer events win.
pub struct Orchestrator {
    config: Arc<LotseConfig>,
    dispatcher: Arc<RequestDispatcher>,
    coordinator: Arc<TurnCoordinator>,
    composer: Arc<Mutex<ResponseComposer>>,
    scene: Arc<Mutex<SceneMemory>>,
    metrics: Arc<MetricsCollector>,
    control_tx: Option<mpsc::Sender<ControlMessage>>,
    task: Option<JoinHandle<()>>,
    utterance_rx: Option<mpsc::UnboundedReceiver<SpokenUtterance>>,
    utterance_tx: Option<mpsc::UnboundedSender<SpokenUtterance>>,
}

impl Orchestrator {
    pub fn new(
        config: LotseConfig,
        remote: Arc<dyn CapabilityProvider>,
        local: Arc<dyn CapabilityProvider>,
        connectivity: watch::Receiver<ConnectivityState>,
        sink: Arc<dyn AudioSink>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        let dispatcher = Arc::new(RequestDispatcher::new(
            config.dispatch.clone(),
            remote,
            local,
            connectivity,
            Some(Arc::clone(&metrics)),
        ));
        let coordinator = Arc::new(TurnCoordinator::new(sink, Some(Arc::clone(&metrics))));
        let composer = Arc::new(Mutex::new(ResponseComposer::new(config.fusion.clone())));
        let (utterance_tx, utterance_rx) = mpsc::unbounded_channel();

        Self {
            config: Arc::new(config),
            dispatcher,
            coordinator,
            composer,
            scene: Arc::new(Mutex::new(SceneMemory::default())),
            metrics,
            control_tx: None,
            task: None,
            utterance_rx: Some(utterance_rx),
            utterance_tx: Some(utterance_tx),
        }
    }

    pub fn start(
        &mut self,
        frames: Box<dyn FrameSource>,
        audio: Box<dyn AudioSegmentSource>,
    ) -> LotseResult<()> {
        if self.task.is_some() {
            return Err(LotseError::Unknown(
                "Orchestrator already running".to_string(),
            ));
        }

        let utterance_tx = self
            .utterance_tx
            .take()
            .ok_or_else(|| LotseError::Unknown("Orchestrator cannot be restarted".to_string()))?;

        let (control_tx, control_rx) = mpsc::channel(1);
        let context = OrchestratorContext {
            config: Arc::clone(&self.config),
            dispatcher: Arc::clone(&self.dispatcher),
            coordinator: Arc::clone(&self.coordinator),
            composer: Arc::clone(&self.composer),
            scene: Arc::clone(&self.scene),
            metrics: Arc::clone(&self.metrics),
            utterance_tx,
        };
        let acquisition = AcquisitionEngine::new(self.config.acquisition.clone());

        let task = tokio::spawn(run_orchestrator(
            control_rx, context, acquisition, frames, audio,
        ));

        self.control_tx = Some(control_tx);
        self.task = Some(task);
        info!("Orchestrator started");
        Ok(())
    }

    pub async fn stop(&mut self) -> LotseResult<()> {
        let tx = self
            .control_tx
            .take()
            .ok_or_else(|| LotseError::Unknown("Orchestrator not running".to_string()))?;
        let task = self
            .task
            .take()
            .ok_or_else(|| LotseError::Unknown("Orchestrator not running".to_string()))?;

        let (ack_tx, ack_rx) = oneshot::channel();
        tx.send(ControlMessage::Shutdown { ack: ack_tx })
            .await
            .map_err(|err| LotseError::Unknown(err.to_string()))?;

        if ack_rx.await.is_err() {
            warn!("Orchestrator shutdown acknowledgement was dropped");
        }

        task.await.map_err(|err| LotseError::Unknown(err.to_string()))?;

        let summary = self.metrics.get_health_status().metrics;
        info!(
            frames_evaluated = summary.frames_evaluated,
            frames_sent = summary.frames_sent,
            events_dispatched = summary.events_dispatched,
            utterances_composed = summary.utterances_composed,
            barge_ins = summary.barge_ins,
            "Orchestrator stopped"
        );
        Ok(())
    }

    pub fn conversation_state(&self) -> ConversationState {
        self.coordinator.snapshot()
    }

    pub fn take_utterance_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<SpokenUtterance>> {
        self.utterance_rx.take()
    }
}

async fn run_orchestrator(
    mut control_rx: mpsc::Receiver<ControlMessage>,
    context: OrchestratorContext,
    mut acquisition: AcquisitionEngine,
    mut frames: Box<dyn FrameSource>,
    mut audio: Box<dyn AudioSegmentSource>,
) {
    let mut frames_done = false;
    let mut audio_done = false;
    let mut latest_frame: Option<lotse_core::Frame> = None;

    loop {
        tokio::select! {
            control = control_rx.recv() => {
                match control {
                    Some(ControlMessage::Shutdown { ack }) => {
                        info!("Shutting down orchestrator loop");
                        let _ = ack.send(());
                    }
                    None => {
                        info!("Orchestrator control channel closed");
                    }
                }
                break;
            }
            frame = frames.next_frame(), if !frames_done => {
                match frame {
                    Some(frame) => {
                        latest_frame = Some(frame.clone());

                        // A user turn in progress outranks scene changes;
                        // the frame is dropped before the gate so the
                        // reference frame stays on the last described
                        // scene.
                        let conversation = context.coordinator.snapshot();
                        if matches!(
                            conversation,
                            ConversationState::Listening | ConversationState::Thinking
                        ) {
                            debug!(seq = frame.seq, "User turn in progress; frame dropped");
                            continue;
                        }

                        context.metrics.increment(MetricType::FramesEvaluated);
                        let score = acquisition.evaluate(&frame);

                        match score.decision {
                            lotse_core::GateDecision::Send(reason) => {
                                context.metrics.increment(MetricType::FramesSent);
                                if reason == SendReason::MaxSilenceElapsed {
                                    context.metrics.increment(MetricType::ForcedSends);
                                }

                                let event = SensingEvent::scene(
                                    frame,
                                    vec![Capability::Detection, Capability::Caption, Capability::Ocr],
                                );
                                let token = context.coordinator.activate(&event);
                                let forced = reason == SendReason::MaxSilenceElapsed;
                                tokio::spawn(handle_scene_event(
                                    context.clone(),
                                    event,
                                    token,
                                    forced,
                                ));
                            }
                            lotse_core::GateDecision::Suppress => {
                                context.metrics.increment(MetricType::FramesSuppressed);
                            }
                        }
                    }
                    None => {
                        debug!("Frame source exhausted");
                        frames_done = true;
                    }
                }
            }
            segment = audio.next_segment(), if !audio_done => {
                match segment {
                    Some(segment) => {
                        // User speech interrupts whatever is playing.
                        context.coordinator.begin_listening();

                        let event = SensingEvent::voice(segment, latest_frame.clone());
                        let token = context.coordinator.activate(&event);
                        context.coordinator.begin_thinking(event.id);
                        tokio::spawn(handle_voice_event(context.clone(), event, token));
                    }
                    None => {
                        debug!("Audio source exhausted");
                        audio_done = true;
                    }
                }
            }
        }
    }
}

async fn handle_scene_event(
    context: OrchestratorContext,
    event: SensingEvent,
    token: CancellationToken,
    forced: bool,
) {
    let results = context.dispatcher.resolve(&event, &token).await;

    if token.is_cancelled() || !context.coordinator.is_active(event.id) {
        debug!(event = %event.id, "Scene event superseded before composition; discarding");
        return;
    }

    update_scene_memory(&context, &results);

    let composed = {
        let mut composer = context.composer.lock();
        composer.compose_scene(&results, forced)
    };

    if composed.is_repeat {
        context.metrics.increment(MetricType::RepeatsSuppressed);
        context.coordinator.finish(event.id);
        return;
    }

    context.metrics.increment(MetricType::UtterancesComposed);
    if composed.is_fallback {
        context.metrics.increment(MetricType::FallbackUtterances);
    }

    speak_utterance(context, event.id, composed.text, token).await;
}

async fn handle_voice_event(
    context: OrchestratorContext,
    event: SensingEvent,
    token: CancellationToken,
) {
    let results = context.dispatcher.resolve(&event, &token).await;

    if token.is_cancelled() || !context.coordinator.is_active(event.id) {
        debug!(event = %event.id, "Voice event superseded; discarding");
        return;
    }

    let transcription = results
        .iter()
        .find(|result| result.capability == Capability::Transcription);

    let transcript = match transcription {
        Some(result) if result.is_ok() => match &result.outcome {
            Some(InferenceOutcome::Transcript(text)) if !text.trim().is_empty() => {
                text.trim().to_string()
            }
            _ => {
                // The microphone triggered on something that was not
                // speech; return to idle without bothering the user.
                debug!(event = %event.id, "Empty transcript; no reply needed");
                context.coordinator.finish(event.id);
                return;
            }
        },
        _ => {
            // Transcription itself failed, which is the voice event's
            // total-failure case: say so instead of going silent.
            context.metrics.increment(MetricType::UtterancesComposed);
            context.metrics.increment(MetricType::FallbackUtterances);
            let fallback = context.config.fusion.fallback_utterance.clone();
            speak_utterance(context, event.id, fallback, token).await;
            return;
        }
    };

    info!(event = %event.id, transcript = %transcript, "User turn transcribed");

    // The original turn loop captioned the frame captured at command time;
    // a fresh caption beats whatever the scene memory still holds.
    if let lotse_core::SensingTrigger::Voice {
        context_frame: Some(frame),
        ..
    } = &event.trigger
    {
        let caption = context
            .dispatcher
            .request(
                event.id,
                Capability::Caption,
                RequestPayload::from_frame(frame),
                &token,
            )
            .await;
        if let (true, Some(InferenceOutcome::Caption(text))) = (caption.is_ok(), &caption.outcome) {
            if !text.trim().is_empty() {
                context.scene.lock().caption = Some(text.trim().to_string());
            }
        }
    }

    let prompt = {
        let scene = context.scene.lock().clone();
        prepare_prompt(&transcript, &scene)
    };

    let reply = context
        .dispatcher
        .request(
            event.id,
            Capability::Dialogue,
            RequestPayload::Text(prompt),
            &token,
        )
        .await;

    let text = match (&reply.status, &reply.outcome) {
        (lotse_core::ResultStatus::Ok, Some(InferenceOutcome::Reply(text)))
            if !text.trim().is_empty() =>
        {
            text.trim().to_string()
        }
        _ => context.config.fusion.fallback_utterance.clone(),
    };

    context.metrics.increment(MetricType::UtterancesComposed);

    if !context.coordinator.is_active(event.id) {
        return;
    }

    speak_utterance(context, event.id, text, token).await;
}

/// Synthesize and play one utterance; reports the outcome on the
/// utterance channel either way.
async fn speak_utterance(
    context: OrchestratorContext,
    event_id: Uuid,
    text: String,
    token: CancellationToken,
) {
    let speech = context
        .dispatcher
        .request(
            event_id,
            Capability::Speech,
            RequestPayload::Text(text.clone()),
            &token,
        )
        .await;

    let played = match speech.outcome {
        Some(InferenceOutcome::Speech(audio)) if speech.is_ok() => {
            match context.coordinator.speak(event_id, audio).await {
                Ok(SpeakOutcome::Played(_)) => true,
                Ok(SpeakOutcome::Discarded) => false,
                Err(err) => {
                    warn!(event = %event_id, "Playback failed: {err}");
                    false
                }
            }
        }
        _ => {
            warn!(event = %event_id, "Speech synthesis unavailable; utterance dropped");
            context.coordinator.finish(event_id);
            false
        }
    };

    let _ = context.utterance_tx.send(SpokenUtterance {
        event_id,
        text,
        played,
    });
}

fn update_scene_memory(context: &OrchestratorContext, results: &[InferenceResult]) {
    let mut caption = None;
    let mut labels = Vec::new();

    for result in results.iter().filter(|result| result.is_ok()) {
        match &result.outcome {
            Some(InferenceOutcome::Caption(text)) if !text.trim().is_empty() => {
                caption = Some(text.trim().to_string());
            }
            Some(InferenceOutcome::Detections(boxes)) => {
                for detection in boxes {
                    if !detection.label.trim().is_empty()
                        && !labels.contains(&detection.label)
                    {
                        labels.push(detection.label.clone());
                    }
                }
            }
            _ => {}
        }
    }

    if caption.is_some() || !labels.is_empty() {
        let mut scene = context.scene.lock();
        if caption.is_some() {
            scene.caption = caption;
        }
        if !labels.is_empty() {
            scene.labels = labels;
        }
    }
}

/// Combine the user's words with the remembered scene so the dialogue
/// service can answer about what the camera sees.
fn prepare_prompt(transcript: &str, scene: &SceneMemory) -> String {
    let mut prompt = transcript.to_string();

    if let Some(caption) = &scene.caption {
        prompt.push_str(&format!("\n\nScene: \"{}\"", caption));
    }
    if !scene.labels.is_empty() {
        prompt.push_str(&format!("\nVisible objects: {}", scene.labels.join(", ")));
    }
    prompt.push_str(
        "\n\nAnswer using the scene context above where it is relevant. Be clear and concise.",
    );

    prompt
}
