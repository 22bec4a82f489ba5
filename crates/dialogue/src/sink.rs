// crates/dialogue/src/sink.rs

use async_trait::async_trait;
use lotse_core::{LotseResult, SpeechAudio};
use parking_lot::Mutex;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Completed,
    Stopped,
}

/// The speech output transport. `play` runs to completion unless `stop`
/// interrupts it; `stop` is a hard cancel, never a drain.
#[async_trait]
pub trait AudioSink: Send + Sync {
    async fn play(&self, audio: SpeechAudio) -> LotseResult<PlaybackOutcome>;
    fn stop(&self);
}

/// Default sink: plays in real time without touching audio hardware, so
/// turn-taking behaves identically in tests and headless deployments.
pub struct SimulatedSink {
    current: Mutex<Option<CancellationToken>>,
}

impl Default for SimulatedSink {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedSink {
    pub fn new() -> Self {
        info!("Audio sink running in simulation mode; no audio will be emitted");
        Self {
            current: Mutex::new(None),
        }
    }
}

#[async_trait]
impl AudioSink for SimulatedSink {
    async fn play(&self, audio: SpeechAudio) -> LotseResult<PlaybackOutcome> {
        let token = CancellationToken::new();
        *self.current.lock() = Some(token.clone());

        let duration = audio.playback_duration();
        let outcome = tokio::select! {
            _ = token.cancelled() => PlaybackOutcome::Stopped,
            _ = time::sleep(duration) => PlaybackOutcome::Completed,
        };

        *self.current.lock() = None;

        debug!(
            duration_ms = duration.as_millis() as u64,
            ?outcome,
            "Simulated playback finished"
        );
        Ok(outcome)
    }

    fn stop(&self) {
        if let Some(token) = self.current.lock().as_ref() {
            token.cancel();
        }
    }
}

#[cfg(feature = "hardware-audio")]
pub use hardware::HardwareSink;

#[cfg(feature = "hardware-audio")]
mod hardware {
    use super::*;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use lotse_core::LotseError;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::Notify;
    use tracing::warn;

    /// CPAL-backed sink. Samples are drained by the device callback; `stop`
    /// flushes the queue so playback halts within one buffer period.
    pub struct HardwareSink {
        state: Arc<SinkState>,
        _stream: cpal::Stream,
        device_rate: u32,
    }

    struct SinkState {
        buffer: std::sync::Mutex<VecDeque<i16>>,
        pending: AtomicUsize,
        stopped: AtomicBool,
        notify: Notify,
    }

    impl HardwareSink {
        pub fn new(preferred_device: Option<&str>) -> LotseResult<Self> {
            let host = cpal::default_host();
            let device = match preferred_device {
                Some(name) => host
                    .output_devices()
                    .map_err(|e| LotseError::Audio(e.to_string()))?
                    .find(|d| {
                        d.name()
                            .map(|n| n.to_ascii_lowercase().contains(&name.to_ascii_lowercase()))
                            .unwrap_or(false)
                    })
                    .or_else(|| host.default_output_device()),
                None => host.default_output_device(),
            }
            .ok_or_else(|| LotseError::Audio("No audio output device available".to_string()))?;

            let config = device
                .default_output_config()
                .map_err(|e| LotseError::Audio(format!("Failed to query device config: {e}")))?
                .config();
            let device_rate = config.sample_rate.0;

            let state = Arc::new(SinkState {
                buffer: std::sync::Mutex::new(VecDeque::new()),
                pending: AtomicUsize::new(0),
                stopped: AtomicBool::new(false),
                notify: Notify::new(),
            });

            let callback_state = Arc::clone(&state);
            let stream = device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _| {
                        let mut consumed = 0usize;
                        {
                            let mut buffer = callback_state
                                .buffer
                                .lock()
                                .expect("sink buffer mutex poisoned");
                            for sample in data.iter_mut() {
                                *sample = match buffer.pop_front() {
                                    Some(value) => {
                                        consumed += 1;
                                        value as f32 / i16::MAX as f32
                                    }
                                    None => 0.0,
                                };
                            }
                        }
                        if consumed > 0 {
                            let previous =
                                callback_state.pending.fetch_sub(consumed, Ordering::SeqCst);
                            if previous <= consumed {
                                callback_state.notify.notify_waiters();
                            }
                        }
                    },
                    |err| warn!("Audio stream error: {err}"),
                    None,
                )
                .map_err(|e| LotseError::Audio(format!("Failed to build stream: {e}")))?;

            stream
                .play()
                .map_err(|e| LotseError::Audio(format!("Failed to start stream: {e}")))?;

            info!(sample_rate = device_rate, "Hardware audio sink started");

            Ok(Self {
                state,
                _stream: stream,
                device_rate,
            })
        }

        fn enqueue(&self, audio: &SpeechAudio) -> usize {
            let samples: Vec<i16> = audio
                .pcm
                .chunks_exact(2)
                .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
                .collect();

            let resampled = if audio.sample_rate == self.device_rate || audio.sample_rate == 0 {
                samples
            } else {
                resample_linear(&samples, audio.sample_rate, self.device_rate)
            };

            let count = resampled.len();
            let mut buffer = self.state.buffer.lock().expect("sink buffer mutex poisoned");
            buffer.extend(resampled);
            self.state.pending.fetch_add(count, Ordering::SeqCst);
            count
        }
    }

    #[async_trait]
    impl AudioSink for HardwareSink {
        async fn play(&self, audio: SpeechAudio) -> LotseResult<PlaybackOutcome> {
            self.state.stopped.store(false, Ordering::SeqCst);
            if self.enqueue(&audio) == 0 {
                return Ok(PlaybackOutcome::Completed);
            }

            loop {
                let notified = self.state.notify.notified();
                if self.state.stopped.load(Ordering::SeqCst) {
                    return Ok(PlaybackOutcome::Stopped);
                }
                if self.state.pending.load(Ordering::SeqCst) == 0 {
                    return Ok(PlaybackOutcome::Completed);
                }
                notified.await;
            }
        }

        fn stop(&self) {
            self.state.stopped.store(true, Ordering::SeqCst);
            self.state
                .buffer
                .lock()
                .expect("sink buffer mutex poisoned")
                .clear();
            self.state.pending.store(0, Ordering::SeqCst);
            self.state.notify.notify_waiters();
        }
    }

    fn resample_linear(input: &[i16], input_rate: u32, output_rate: u32) -> Vec<i16> {
        if input.is_empty() || input_rate == 0 || output_rate == 0 {
            return Vec::new();
        }
        if input_rate == output_rate {
            return input.to_vec();
        }

        let output_len = ((input.len() as f64) * output_rate as f64 / input_rate as f64)
            .round()
            .max(1.0) as usize;
        let ratio = input_rate as f64 / output_rate as f64;
        let mut output = Vec::with_capacity(output_len);

        for index in 0..output_len {
            let position = index as f64 * ratio;
            let base = position.floor() as usize;
            let next = (base + 1).min(input.len() - 1);
            let fraction = (position - base as f64) as f32;
            let interpolated =
                input[base] as f32 * (1.0 - fraction) + input[next] as f32 * fraction;
            output.push(interpolated as i16);
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn playback_completes_in_real_time() {
        let sink = SimulatedSink::new();
        let audio = SpeechAudio::new(vec![0u8; 3_200], 16_000); // 100ms

        let started = Instant::now();
        let outcome = sink.play(audio).await.expect("playback succeeds");
        assert_eq!(outcome, PlaybackOutcome::Completed);
        assert!(started.elapsed() >= Duration::from_millis(90));
    }

    #[tokio::test]
    async fn stop_interrupts_playback_promptly() {
        let sink = Arc::new(SimulatedSink::new());
        let audio = SpeechAudio::new(vec![0u8; 64_000], 16_000); // 2s

        let player = Arc::clone(&sink);
        let handle = tokio::spawn(async move { player.play(audio).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let started = Instant::now();
        sink.stop();

        let outcome = handle
            .await
            .expect("playback task joins")
            .expect("playback result");
        assert_eq!(outcome, PlaybackOutcome::Stopped);
        assert!(started.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn stop_without_playback_is_a_no_op() {
        let sink = SimulatedSink::new();
        sink.stop();

        let audio = SpeechAudio::new(vec![0u8; 320], 16_000); // 10ms
        let outcome = sink.play(audio).await.expect("playback succeeds");
        assert_eq!(outcome, PlaybackOutcome::Completed);
    }
}
