// crates/acquisition/src/lib.rs

use std::time::{Duration, Instant};

use lotse_config::AcquisitionConfig;
use lotse_core::{ChangeScore, Frame, GateDecision, SendReason};
use tracing::{debug, warn};

/// Variational acquisition gate. Scores each candidate frame against the
/// last frame that was actually sent onward; a frame passes when either
/// distance metric crosses its threshold, or when nothing has been sent for
/// `max_silence_ms` so the scene context gets re-confirmed periodically.
pub struct AcquisitionEngine {
    config: AcquisitionConfig,
    reference: Option<Frame>,
    last_sent_at: Option<Instant>,
    metrics: AcquisitionMetrics,
}

#[derive(Debug, Default, Clone)]
pub struct AcquisitionMetrics {
    pub evaluated: u64,
    pub sent: u64,
    pub suppressed: u64,
    pub forced_sends: u64,
    pub sensor_faults: u64,
}

impl AcquisitionEngine {
    pub fn new(config: AcquisitionConfig) -> Self {
        Self {
            config,
            reference: None,
            last_sent_at: None,
            metrics: AcquisitionMetrics::default(),
        }
    }

    pub fn evaluate(&mut self, frame: &Frame) -> ChangeScore {
        self.evaluate_at(frame, Instant::now())
    }

    fn evaluate_at(&mut self, frame: &Frame, now: Instant) -> ChangeScore {
        self.metrics.evaluated += 1;

        if !frame.is_well_formed() {
            self.metrics.sensor_faults += 1;
            self.metrics.suppressed += 1;
            warn!(
                seq = frame.seq,
                len = frame.pixels.len(),
                width = frame.width,
                height = frame.height,
                "Dropping malformed frame"
            );
            return ChangeScore {
                frame_seq: frame.seq,
                histogram_delta: 0.0,
                pixel_delta: 0.0,
                decision: GateDecision::Suppress,
            };
        }

        let (histogram_delta, pixel_delta, decision) = match &self.reference {
            None => (1.0, 1.0, GateDecision::Send(SendReason::HistogramChange)),
            Some(reference) => {
                let histogram_delta = bhattacharyya_distance(&reference.histogram, &frame.histogram);
                let pixel_delta = grid_pixel_delta(reference, frame, self.config.grid_size);

                let decision = if histogram_delta > self.config.histogram_threshold {
                    GateDecision::Send(SendReason::HistogramChange)
                } else if pixel_delta > self.config.pixel_threshold {
                    GateDecision::Send(SendReason::PixelChange)
                } else if self.silence_elapsed(now) {
                    GateDecision::Send(SendReason::MaxSilenceElapsed)
                } else {
                    GateDecision::Suppress
                };

                (histogram_delta, pixel_delta, decision)
            }
        };

        match decision {
            GateDecision::Send(reason) => {
                self.metrics.sent += 1;
                if reason == SendReason::MaxSilenceElapsed {
                    self.metrics.forced_sends += 1;
                }
                self.reference = Some(frame.clone());
                self.last_sent_at = Some(now);
                debug!(
                    seq = frame.seq,
                    histogram_delta,
                    pixel_delta,
                    ?reason,
                    "Frame gated through"
                );
            }
            GateDecision::Suppress => {
                self.metrics.suppressed += 1;
            }
        }

        ChangeScore {
            frame_seq: frame.seq,
            histogram_delta,
            pixel_delta,
            decision,
        }
    }

    fn silence_elapsed(&self, now: Instant) -> bool {
        match self.last_sent_at {
            Some(sent_at) => {
                now.duration_since(sent_at) >= Duration::from_millis(self.config.max_silence_ms)
            }
            None => true,
        }
    }

    pub fn metrics(&self) -> AcquisitionMetrics {
        self.metrics.clone()
    }
}

/// Bhattacharyya distance between two normalized histograms, 0.0 for
/// identical distributions, 1.0 for disjoint ones.
fn bhattacharyya_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 1.0;
    }

    let coefficient: f32 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (x * y).sqrt())
        .sum::<f32>()
        .clamp(0.0, 1.0);

    (1.0 - coefficient).sqrt()
}

/// Mean absolute pixel difference over a down-sampled grid, normalized to
/// 0..1. Sampling the grid keeps the comparison cheap regardless of sensor
/// resolution.
fn grid_pixel_delta(reference: &Frame, candidate: &Frame, grid_size: u32) -> f32 {
    if reference.width != candidate.width || reference.height != candidate.height {
        return 1.0;
    }

    let grid = grid_size.max(1);
    let cols = grid.min(candidate.width);
    let rows = grid.min(candidate.height);

    let mut total = 0u64;
    let mut samples = 0u64;

    for row in 0..rows {
        let y = (row as u64 * candidate.height as u64 / rows as u64) as u32;
        for col in 0..cols {
            let x = (col as u64 * candidate.width as u64 / cols as u64) as u32;
            let index = (y * candidate.width + x) as usize;
            let a = reference.pixels[index] as i32;
            let b = candidate.pixels[index] as i32;
            total += (a - b).unsigned_abs() as u64;
            samples += 1;
        }
    }

    if samples == 0 {
        return 0.0;
    }

    (total as f32 / samples as f32) / 255.0
}
