// crates/dispatch/src/provider.rs

use std::sync::Arc;

use async_trait::async_trait;
use lotse_core::{AudioSegment, Frame, InferenceOutcome, InferenceRequest, LotseResult};

/// Capability-specific request body, derived from the sensing trigger or
/// composed upstream (dialogue prompts, speech text).
#[derive(Debug, Clone)]
pub enum RequestPayload {
    Image(Arc<[u8]>),
    Audio { pcm: Arc<[u8]>, sample_rate: u32 },
    Text(String),
}

impl RequestPayload {
    pub fn from_frame(frame: &Frame) -> Self {
        RequestPayload::Image(Arc::clone(&frame.pixels))
    }

    pub fn from_audio(segment: &AudioSegment) -> Self {
        RequestPayload::Audio {
            pcm: Arc::clone(&segment.pcm),
            sample_rate: segment.sample_rate,
        }
    }
}

/// Common interface for both routing targets: the remote RPC client and
/// the local fallback runner. The dispatcher picks one per connectivity
/// state at dispatch time.
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    async fn invoke(
        &self,
        request: &InferenceRequest,
        payload: &RequestPayload,
    ) -> LotseResult<InferenceOutcome>;

    fn name(&self) -> &str;
}
