// crates/config/src/lib.rs

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub mod loader;
pub mod validator;

pub use loader::ConfigLoader;
pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LotseConfig {
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    #[serde(default)]
    pub connectivity: ConnectivityConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub fusion: FusionConfig,
    #[serde(default)]
    pub dialogue: DialogueConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_language() -> String {
    "en".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            language: default_language(),
        }
    }
}

/// Acquisition gate thresholds. They trade bandwidth for responsiveness
/// per deployment, so none of them are constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    #[serde(default = "default_histogram_threshold")]
    pub histogram_threshold: f32,
    #[serde(default = "default_pixel_threshold")]
    pub pixel_threshold: f32,
    #[serde(default = "default_max_silence_ms")]
    pub max_silence_ms: u64,
    #[serde(default = "default_grid_size")]
    pub grid_size: u32,
}

fn default_histogram_threshold() -> f32 {
    0.05
}

fn default_pixel_threshold() -> f32 {
    0.10
}

fn default_max_silence_ms() -> u64 {
    10_000
}

fn default_grid_size() -> u32 {
    32
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            histogram_threshold: default_histogram_threshold(),
            pixel_threshold: default_pixel_threshold(),
            max_silence_ms: default_max_silence_ms(),
            grid_size: default_grid_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectivityConfig {
    #[serde(default = "default_probe_url")]
    pub probe_url: String,
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_probe_window")]
    pub window: usize,
    #[serde(default = "default_degraded_success_rate")]
    pub degraded_success_rate: f64,
    #[serde(default = "default_degraded_latency_ms")]
    pub degraded_latency_ms: u64,
    #[serde(default = "default_offline_failure_count")]
    pub offline_failure_count: usize,
    #[serde(default = "default_recovery_hold_count")]
    pub recovery_hold_count: usize,
}

fn default_probe_url() -> String {
    "http://127.0.0.1:8000/health".to_string()
}

fn default_probe_interval_ms() -> u64 {
    1_000
}

fn default_probe_timeout_ms() -> u64 {
    500
}

fn default_probe_window() -> usize {
    10
}

fn default_degraded_success_rate() -> f64 {
    0.8
}

fn default_degraded_latency_ms() -> u64 {
    400
}

fn default_offline_failure_count() -> usize {
    3
}

fn default_recovery_hold_count() -> usize {
    3
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            probe_url: default_probe_url(),
            probe_interval_ms: default_probe_interval_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            window: default_probe_window(),
            degraded_success_rate: default_degraded_success_rate(),
            degraded_latency_ms: default_degraded_latency_ms(),
            offline_failure_count: default_offline_failure_count(),
            recovery_hold_count: default_recovery_hold_count(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DegradedPolicy {
    #[default]
    PreferRemote,
    PreferLocal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_event_budget_ms")]
    pub event_budget_ms: u64,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_fan_out_limit")]
    pub fan_out_limit: usize,
    #[serde(default)]
    pub degraded_policy: DegradedPolicy,
    #[serde(default = "default_degraded_deadline_factor")]
    pub degraded_deadline_factor: f64,
    #[serde(default)]
    pub deadlines: CapabilityDeadlines,
    #[serde(default)]
    pub remote: RemoteEndpoints,
    #[serde(default)]
    pub local: LocalRunnerConfig,
}

fn default_event_budget_ms() -> u64 {
    2_000
}

fn default_retry_backoff_ms() -> u64 {
    200
}

fn default_fan_out_limit() -> usize {
    4
}

fn default_degraded_deadline_factor() -> f64 {
    0.5
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            event_budget_ms: default_event_budget_ms(),
            retry_backoff_ms: default_retry_backoff_ms(),
            fan_out_limit: default_fan_out_limit(),
            degraded_policy: DegradedPolicy::default(),
            degraded_deadline_factor: default_degraded_deadline_factor(),
            deadlines: CapabilityDeadlines::default(),
            remote: RemoteEndpoints::default(),
            local: LocalRunnerConfig::default(),
        }
    }
}

/// Per-capability deadlines in milliseconds. Independent budgets for the
/// parallel fan-out; never summed into a serial chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityDeadlines {
    #[serde(default = "default_detection_deadline_ms")]
    pub detection_ms: u64,
    #[serde(default = "default_caption_deadline_ms")]
    pub caption_ms: u64,
    #[serde(default = "default_ocr_deadline_ms")]
    pub ocr_ms: u64,
    #[serde(default = "default_transcription_deadline_ms")]
    pub transcription_ms: u64,
    #[serde(default = "default_dialogue_deadline_ms")]
    pub dialogue_ms: u64,
    #[serde(default = "default_speech_deadline_ms")]
    pub speech_ms: u64,
}

fn default_detection_deadline_ms() -> u64 {
    800
}

fn default_caption_deadline_ms() -> u64 {
    1_500
}

fn default_ocr_deadline_ms() -> u64 {
    1_200
}

fn default_transcription_deadline_ms() -> u64 {
    2_000
}

fn default_dialogue_deadline_ms() -> u64 {
    2_000
}

fn default_speech_deadline_ms() -> u64 {
    2_000
}

impl Default for CapabilityDeadlines {
    fn default() -> Self {
        Self {
            detection_ms: default_detection_deadline_ms(),
            caption_ms: default_caption_deadline_ms(),
            ocr_ms: default_ocr_deadline_ms(),
            transcription_ms: default_transcription_deadline_ms(),
            dialogue_ms: default_dialogue_deadline_ms(),
            speech_ms: default_speech_deadline_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteEndpoints {
    #[serde(default = "default_remote_base_url")]
    pub base_url: String,
    #[serde(default = "default_detection_path")]
    pub detection_path: String,
    #[serde(default = "default_caption_path")]
    pub caption_path: String,
    #[serde(default = "default_ocr_path")]
    pub ocr_path: String,
    #[serde(default = "default_transcription_path")]
    pub transcription_path: String,
    #[serde(default = "default_dialogue_path")]
    pub dialogue_path: String,
    #[serde(default = "default_speech_path")]
    pub speech_path: String,
}

fn default_remote_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_detection_path() -> String {
    "/detect".to_string()
}

fn default_caption_path() -> String {
    "/caption".to_string()
}

fn default_ocr_path() -> String {
    "/ocr".to_string()
}

fn default_transcription_path() -> String {
    "/asr".to_string()
}

fn default_dialogue_path() -> String {
    "/chat".to_string()
}

fn default_speech_path() -> String {
    "/tts".to_string()
}

impl Default for RemoteEndpoints {
    fn default() -> Self {
        Self {
            base_url: default_remote_base_url(),
            detection_path: default_detection_path(),
            caption_path: default_caption_path(),
            ocr_path: default_ocr_path(),
            transcription_path: default_transcription_path(),
            dialogue_path: default_dialogue_path(),
            speech_path: default_speech_path(),
        }
    }
}

/// Local fallback runner: an on-device model server spoken to over a
/// line-oriented JSON protocol on stdin/stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalRunnerConfig {
    #[serde(default = "default_runner_executable")]
    pub executable: PathBuf,
    #[serde(default = "default_runner_script")]
    pub script: PathBuf,
    #[serde(default)]
    pub extra_args: Vec<String>,
    #[serde(default)]
    pub env: Vec<(String, String)>,
}

fn default_runner_executable() -> PathBuf {
    PathBuf::from("python3")
}

fn default_runner_script() -> PathBuf {
    PathBuf::from("scripts/local_models.py")
}

impl Default for LocalRunnerConfig {
    fn default() -> Self {
        Self {
            executable: default_runner_executable(),
            script: default_runner_script(),
            extra_args: Vec::new(),
            env: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionConfig {
    #[serde(default = "default_ocr_coverage_chars")]
    pub ocr_coverage_chars: usize,
    #[serde(default = "default_max_detections")]
    pub max_detections: usize,
    #[serde(default = "default_fallback_utterance")]
    pub fallback_utterance: String,
}

fn default_ocr_coverage_chars() -> usize {
    24
}

fn default_max_detections() -> usize {
    3
}

fn default_fallback_utterance() -> String {
    "I could not process that, please try again.".to_string()
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            ocr_coverage_chars: default_ocr_coverage_chars(),
            max_detections: default_max_detections(),
            fallback_utterance: default_fallback_utterance(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueConfig {
    #[serde(default = "default_speech_sample_rate")]
    pub speech_sample_rate: u32,
    #[serde(default)]
    pub device: Option<String>,
}

fn default_speech_sample_rate() -> u32 {
    22_050
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            speech_sample_rate: default_speech_sample_rate(),
            device: None,
        }
    }
}

/// Scripted inputs for development and tests; no camera or microphone
/// required.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SimulationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_sim_frame_interval_ms")]
    pub frame_interval_ms: u64,
    #[serde(default)]
    pub scripted_utterances: Vec<String>,
}

fn default_sim_frame_interval_ms() -> u64 {
    250
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = LotseConfig::default();
        ConfigValidator::validate(&config).expect("defaults must validate");
        assert_eq!(config.acquisition.histogram_threshold, 0.05);
        assert_eq!(config.dispatch.deadlines.detection_ms, 800);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let parsed: LotseConfig = toml::from_str(
            r#"
            [acquisition]
            histogram_threshold = 0.2

            [dispatch]
            event_budget_ms = 900
            "#,
        )
        .expect("partial config parses");

        assert_eq!(parsed.acquisition.histogram_threshold, 0.2);
        assert_eq!(parsed.acquisition.pixel_threshold, 0.10);
        assert_eq!(parsed.dispatch.event_budget_ms, 900);
        assert_eq!(parsed.dispatch.retry_backoff_ms, 200);
    }
}
