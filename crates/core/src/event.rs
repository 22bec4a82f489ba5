// crates/core/src/event.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::frame::{AudioSegment, Frame, SpeechAudio};

/// Why the acquisition gate let a frame through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SendReason {
    HistogramChange,
    PixelChange,
    MaxSilenceElapsed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GateDecision {
    Send(SendReason),
    Suppress,
}

/// Gate verdict for one candidate frame. Not persisted beyond the decision.
#[derive(Debug, Clone, Copy)]
pub struct ChangeScore {
    pub frame_seq: u64,
    pub histogram_delta: f32,
    pub pixel_delta: f32,
    pub decision: GateDecision,
}

impl ChangeScore {
    pub fn is_send(&self) -> bool {
        matches!(self.decision, GateDecision::Send(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Detection,
    Caption,
    Ocr,
    Transcription,
    Dialogue,
    Speech,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Detection => "detection",
            Capability::Caption => "caption",
            Capability::Ocr => "ocr",
            Capability::Transcription => "transcription",
            Capability::Dialogue => "dialogue",
            Capability::Speech => "speech",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What triggered a sensing event.
#[derive(Debug, Clone)]
pub enum SensingTrigger {
    Frame(Frame),
    Voice {
        segment: AudioSegment,
        context_frame: Option<Frame>,
    },
}

/// One gated frame or voice turn, plus the capabilities it needs. Lives
/// until every capability has produced a result or timed out.
#[derive(Debug, Clone)]
pub struct SensingEvent {
    pub id: Uuid,
    pub trigger: SensingTrigger,
    pub capabilities: Vec<Capability>,
    pub created_at: DateTime<Utc>,
}

impl SensingEvent {
    pub fn scene(frame: Frame, capabilities: Vec<Capability>) -> Self {
        Self {
            id: Uuid::new_v4(),
            trigger: SensingTrigger::Frame(frame),
            capabilities,
            created_at: Utc::now(),
        }
    }

    pub fn voice(segment: AudioSegment, context_frame: Option<Frame>) -> Self {
        Self {
            id: Uuid::new_v4(),
            trigger: SensingTrigger::Voice {
                segment,
                context_frame,
            },
            capabilities: vec![Capability::Transcription],
            created_at: Utc::now(),
        }
    }

    pub fn is_voice(&self) -> bool {
        matches!(self.trigger, SensingTrigger::Voice { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    Remote,
    Local,
}

/// One capability call issued for an event; owned by the dispatcher.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub event_id: Uuid,
    pub capability: Capability,
    pub target: Target,
    pub deadline: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabeledBox {
    pub label: String,
    pub confidence: f32,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextRegion {
    pub text: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone)]
pub enum InferenceOutcome {
    Detections(Vec<LabeledBox>),
    Caption(String),
    OcrText {
        text: String,
        regions: Vec<TextRegion>,
    },
    Transcript(String),
    Reply(String),
    Speech(SpeechAudio),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Ok,
    Timeout,
    Error,
}

/// Terminal outcome for one capability of one event. The dispatcher emits
/// exactly one of these per requested capability, synthetic on failure.
#[derive(Debug, Clone)]
pub struct InferenceResult {
    pub event_id: Uuid,
    pub capability: Capability,
    pub status: ResultStatus,
    pub outcome: Option<InferenceOutcome>,
    pub latency: Duration,
}

impl InferenceResult {
    pub fn ok(
        event_id: Uuid,
        capability: Capability,
        outcome: InferenceOutcome,
        latency: Duration,
    ) -> Self {
        Self {
            event_id,
            capability,
            status: ResultStatus::Ok,
            outcome: Some(outcome),
            latency,
        }
    }

    pub fn timed_out(event_id: Uuid, capability: Capability, latency: Duration) -> Self {
        Self {
            event_id,
            capability,
            status: ResultStatus::Timeout,
            outcome: None,
            latency,
        }
    }

    pub fn failed(event_id: Uuid, capability: Capability, latency: Duration) -> Self {
        Self {
            event_id,
            capability,
            status: ResultStatus::Error,
            outcome: None,
            latency,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ResultStatus::Ok
    }
}
