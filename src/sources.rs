// src/sources.rs

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use lotse_config::SimulationConfig;
use lotse_core::{AudioSegment, Frame};
use tokio::time;

/// Camera-side collaborator: yields timestamped frames until the device
/// shuts down. Hardware integrations live outside this crate; the
/// orchestrator only depends on this seam.
#[async_trait]
pub trait FrameSource: Send {
    async fn next_frame(&mut self) -> Option<Frame>;
}

/// Microphone-side collaborator: yields voice-activity-gated segments, one
/// per user turn.
#[async_trait]
pub trait AudioSegmentSource: Send {
    async fn next_segment(&mut self) -> Option<AudioSegment>;
}

/// Scripted frame source: each entry is a uniform luma level held for one
/// frame interval. Good enough to exercise the acquisition gate, which
/// only looks at histograms and pixel deltas.
pub struct SimulatedFrameSource {
    scenes: VecDeque<u8>,
    interval: Duration,
    width: u32,
    height: u32,
    seq: u64,
}

impl SimulatedFrameSource {
    pub fn new(scenes: Vec<u8>, interval: Duration) -> Self {
        Self {
            scenes: scenes.into_iter().collect(),
            interval,
            width: 64,
            height: 64,
            seq: 0,
        }
    }

    pub fn from_config(config: &SimulationConfig) -> Self {
        // A default walk through three distinct scenes with dwell time on
        // each, so a dev run produces a few descriptions and plenty of
        // suppressed frames.
        let scenes = vec![40, 40, 40, 40, 160, 160, 160, 160, 230, 230, 230, 230];
        Self::new(scenes, Duration::from_millis(config.frame_interval_ms))
    }
}

#[async_trait]
impl FrameSource for SimulatedFrameSource {
    async fn next_frame(&mut self) -> Option<Frame> {
        let luma = self.scenes.pop_front()?;
        time::sleep(self.interval).await;

        let pixels = vec![luma; (self.width * self.height) as usize];
        let frame = Frame::new(self.seq, self.width, self.height, pixels);
        self.seq += 1;
        Some(frame)
    }
}

/// Scripted voice turns: each entry becomes one audio segment after its
/// delay. The payload is synthetic PCM; what the user "said" is decided by
/// whichever transcription backend receives it.
pub struct SimulatedAudioSource {
    turns: VecDeque<(Duration, AudioSegment)>,
}

impl SimulatedAudioSource {
    pub fn new(turns: Vec<(Duration, AudioSegment)>) -> Self {
        Self {
            turns: turns.into_iter().collect(),
        }
    }

    pub fn from_config(config: &SimulationConfig) -> Self {
        let turns = config
            .scripted_utterances
            .iter()
            .enumerate()
            .map(|(index, _)| {
                let delay = Duration::from_millis(1_000 + index as u64 * 2_000);
                // Half a second of silence stands in for the recorded turn.
                (delay, AudioSegment::new(16_000, vec![0u8; 16_000]))
            })
            .collect();
        Self::new(turns)
    }
}

#[async_trait]
impl AudioSegmentSource for SimulatedAudioSource {
    async fn next_segment(&mut self) -> Option<AudioSegment> {
        let (delay, segment) = self.turns.pop_front()?;
        time::sleep(delay).await;
        Some(segment)
    }
}

/// A source that never yields; used when a deployment has no microphone.
pub struct SilentAudioSource;

#[async_trait]
impl AudioSegmentSource for SilentAudioSource {
    async fn next_segment(&mut self) -> Option<AudioSegment> {
        std::future::pending().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn simulated_frames_run_out() {
        let mut source = SimulatedFrameSource::new(vec![10, 200], Duration::from_millis(1));
        assert!(source.next_frame().await.is_some());
        assert!(source.next_frame().await.is_some());
        assert!(source.next_frame().await.is_none());
    }

    #[tokio::test]
    async fn simulated_turns_arrive_after_their_delay() {
        let segment = AudioSegment::new(16_000, vec![0u8; 320]);
        let mut source =
            SimulatedAudioSource::new(vec![(Duration::from_millis(10), segment)]);

        let started = std::time::Instant::now();
        assert!(source.next_segment().await.is_some());
        assert!(started.elapsed() >= Duration::from_millis(10));
        assert!(source.next_segment().await.is_none());
    }
}
