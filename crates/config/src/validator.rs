// crates/config/src/validator.rs

use lotse_core::{LotseError, LotseResult};
use tracing::warn;

use crate::LotseConfig;

pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(config: &LotseConfig) -> LotseResult<()> {
        // Acquisition gate
        if !(0.0..=1.0).contains(&config.acquisition.histogram_threshold) {
            return Err(LotseError::Config(
                "Histogram threshold must be within 0.0-1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&config.acquisition.pixel_threshold) {
            return Err(LotseError::Config(
                "Pixel threshold must be within 0.0-1.0".to_string(),
            ));
        }
        if config.acquisition.max_silence_ms == 0 {
            return Err(LotseError::Config(
                "Max silence interval must be > 0".to_string(),
            ));
        }
        if config.acquisition.grid_size == 0 {
            return Err(LotseError::Config("Grid size must be > 0".to_string()));
        }

        // Connectivity monitor
        if config.connectivity.probe_interval_ms == 0 {
            return Err(LotseError::Config("Probe interval must be > 0".to_string()));
        }
        if config.connectivity.window == 0 {
            return Err(LotseError::Config("Probe window must be > 0".to_string()));
        }
        if !(0.0..=1.0).contains(&config.connectivity.degraded_success_rate) {
            return Err(LotseError::Config(
                "Degraded success rate must be within 0.0-1.0".to_string(),
            ));
        }
        if config.connectivity.offline_failure_count == 0
            || config.connectivity.recovery_hold_count == 0
        {
            return Err(LotseError::Config(
                "Hysteresis counts must be > 0".to_string(),
            ));
        }

        // Dispatcher budgets
        if config.dispatch.event_budget_ms == 0 {
            return Err(LotseError::Config("Event budget must be > 0".to_string()));
        }
        if config.dispatch.fan_out_limit == 0 {
            return Err(LotseError::Config("Fan-out limit must be > 0".to_string()));
        }
        if !(0.0..=1.0).contains(&config.dispatch.degraded_deadline_factor) {
            return Err(LotseError::Config(
                "Degraded deadline factor must be within 0.0-1.0".to_string(),
            ));
        }
        let deadlines = [
            config.dispatch.deadlines.detection_ms,
            config.dispatch.deadlines.caption_ms,
            config.dispatch.deadlines.ocr_ms,
            config.dispatch.deadlines.transcription_ms,
            config.dispatch.deadlines.dialogue_ms,
            config.dispatch.deadlines.speech_ms,
        ];
        if deadlines.iter().any(|ms| *ms == 0) {
            return Err(LotseError::Config(
                "Capability deadlines must be > 0".to_string(),
            ));
        }
        if deadlines
            .iter()
            .any(|ms| *ms > config.dispatch.event_budget_ms)
        {
            warn!(
                event_budget_ms = config.dispatch.event_budget_ms,
                "A capability deadline exceeds the event budget; it will be capped at dispatch"
            );
        }

        // Fusion
        if config.fusion.fallback_utterance.trim().is_empty() {
            return Err(LotseError::Config(
                "Fallback utterance must not be empty".to_string(),
            ));
        }

        // Dialogue
        if config.dialogue.speech_sample_rate == 0 {
            return Err(LotseError::Config("Invalid speech sample rate".to_string()));
        }

        Ok(())
    }
}
