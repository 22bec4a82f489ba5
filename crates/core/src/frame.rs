// crates/core/src/frame.rs

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const HISTOGRAM_BINS: usize = 32;

/// A captured camera frame. Immutable once constructed; the luma histogram
/// is derived at capture time so the acquisition gate never touches the
/// pixel buffer twice.
#[derive(Debug, Clone)]
pub struct Frame {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub width: u32,
    pub height: u32,
    pub pixels: Arc<[u8]>,
    pub histogram: Vec<f32>,
}

impl Frame {
    pub fn new(seq: u64, width: u32, height: u32, pixels: Vec<u8>) -> Self {
        let histogram = normalized_histogram(&pixels);
        Self {
            seq,
            timestamp: Utc::now(),
            width,
            height,
            pixels: Arc::from(pixels.into_boxed_slice()),
            histogram,
        }
    }

    /// A frame whose buffer does not match its reported geometry is a
    /// sensor fault, not a candidate for scoring.
    pub fn is_well_formed(&self) -> bool {
        !self.pixels.is_empty() && self.pixels.len() == (self.width as usize * self.height as usize)
    }
}

fn normalized_histogram(pixels: &[u8]) -> Vec<f32> {
    let mut bins = vec![0f32; HISTOGRAM_BINS];
    if pixels.is_empty() {
        return bins;
    }

    let bin_width = 256 / HISTOGRAM_BINS;
    for value in pixels {
        bins[(*value as usize) / bin_width] += 1.0;
    }

    let total = pixels.len() as f32;
    for bin in &mut bins {
        *bin /= total;
    }
    bins
}

/// A voice-activity-gated microphone capture.
#[derive(Debug, Clone)]
pub struct AudioSegment {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub duration: Duration,
    pub sample_rate: u32,
    pub pcm: Arc<[u8]>,
}

impl AudioSegment {
    pub fn new(sample_rate: u32, pcm: Vec<u8>) -> Self {
        let samples = pcm.len() / 2;
        let duration = if sample_rate == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(samples as f64 / sample_rate as f64)
        };

        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            duration,
            sample_rate,
            pcm: Arc::from(pcm.into_boxed_slice()),
        }
    }
}

/// Synthesized speech ready for the output sink.
#[derive(Debug, Clone)]
pub struct SpeechAudio {
    pub pcm: Arc<[u8]>,
    pub sample_rate: u32,
}

impl SpeechAudio {
    pub fn new(pcm: Vec<u8>, sample_rate: u32) -> Self {
        Self {
            pcm: Arc::from(pcm.into_boxed_slice()),
            sample_rate,
        }
    }

    pub fn playback_duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let samples = self.pcm.len() / 2;
        Duration::from_secs_f64(samples as f64 / self.sample_rate as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn histogram_is_normalized() {
        let frame = Frame::new(0, 4, 4, vec![0u8; 16]);
        let sum: f32 = frame.histogram.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(frame.is_well_formed());
    }

    #[test]
    fn geometry_mismatch_is_malformed() {
        let frame = Frame::new(0, 4, 4, vec![0u8; 15]);
        assert!(!frame.is_well_formed());
    }

    #[test]
    fn speech_duration_follows_sample_rate() {
        let audio = SpeechAudio::new(vec![0u8; 32_000], 16_000);
        assert_eq!(audio.playback_duration(), Duration::from_secs(1));
    }
}
