// crates/dispatch/src/local.rs

use async_trait::async_trait;
use base64::Engine;
use lotse_config::LocalRunnerConfig;
use lotse_core::{
    Capability, InferenceOutcome, InferenceRequest, LabeledBox, LotseError, LotseResult,
    SpeechAudio,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::provider::{CapabilityProvider, RequestPayload};

/// Offline fallback: the same capability surface served by an on-device
/// model runner process, spoken to over one JSON line per request on
/// stdin/stdout. Spawned lazily on first use and respawned if it exits.
pub struct LocalProvider {
    config: LocalRunnerConfig,
    speech_sample_rate: u32,
    runner: Mutex<RunnerState>,
}

#[derive(Default)]
struct RunnerState {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<BufReader<ChildStdout>>,
}

#[derive(Debug, Serialize)]
struct RunnerRequest<'a> {
    capability: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sample_rate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct RunnerResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    detections: Vec<Value>,
    #[serde(default)]
    caption: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    transcript: Option<String>,
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    audio: Option<String>,
}

impl LocalProvider {
    pub fn new(config: LocalRunnerConfig, speech_sample_rate: u32) -> Self {
        Self {
            config,
            speech_sample_rate,
            runner: Mutex::new(RunnerState::default()),
        }
    }

    async fn ensure_running(&self, state: &mut RunnerState) -> LotseResult<()> {
        let should_spawn = if let Some(child) = state.child.as_mut() {
            match child.try_wait() {
                Ok(Some(_)) => true,
                Ok(None) => false,
                Err(err) => {
                    return Err(LotseError::Dispatch(format!(
                        "Failed to poll local runner: {err}"
                    )))
                }
            }
        } else {
            true
        };

        if should_spawn {
            self.shutdown_state(state);
            self.spawn(state).await?;
        }

        Ok(())
    }

    async fn spawn(&self, state: &mut RunnerState) -> LotseResult<()> {
        let mut command = Command::new(&self.config.executable);
        command
            .arg("-u")
            .arg(&self.config.script)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        for extra in &self.config.extra_args {
            command.arg(extra);
        }

        for (key, value) in &self.config.env {
            command.env(key, value);
        }

        let mut child = command
            .spawn()
            .map_err(|err| LotseError::Dispatch(format!("Failed to spawn local runner: {err}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| LotseError::Dispatch("Local runner stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LotseError::Dispatch("Local runner stdout unavailable".to_string()))?;

        info!(script = %self.config.script.display(), "Local model runner started");

        state.stdin = Some(stdin);
        state.stdout = Some(BufReader::new(stdout));
        state.child = Some(child);
        Ok(())
    }

    fn shutdown_state(&self, state: &mut RunnerState) {
        state.stdin.take();
        state.stdout.take();
        if let Some(mut child) = state.child.take() {
            let _ = child.start_kill();
        }
    }

    pub async fn shutdown(&self) {
        let mut state = self.runner.lock().await;
        self.shutdown_state(&mut state);
    }

    async fn round_trip(&self, line: String) -> LotseResult<RunnerResponse> {
        let mut state = self.runner.lock().await;
        self.ensure_running(&mut state).await?;

        let stdin = state
            .stdin
            .as_mut()
            .ok_or_else(|| LotseError::Dispatch("Local runner stdin not available".to_string()))?;

        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|err| LotseError::Dispatch(format!("Failed to write request: {err}")))?;
        stdin
            .write_all(b"\n")
            .await
            .map_err(|err| LotseError::Dispatch(format!("Failed to write request: {err}")))?;
        stdin
            .flush()
            .await
            .map_err(|err| LotseError::Dispatch(format!("Failed to flush runner stdin: {err}")))?;

        let stdout = state
            .stdout
            .as_mut()
            .ok_or_else(|| LotseError::Dispatch("Local runner stdout not available".to_string()))?;

        let mut response = String::new();
        let read = stdout
            .read_line(&mut response)
            .await
            .map_err(|err| LotseError::Dispatch(format!("Failed to read runner response: {err}")))?;

        if read == 0 {
            self.shutdown_state(&mut state);
            return Err(LotseError::Dispatch(
                "Local runner closed stdout".to_string(),
            ));
        }

        let trimmed = response.trim();
        let parsed: RunnerResponse = serde_json::from_str(trimmed)?;

        if let Some(status) = parsed.status.as_deref() {
            if status != "ok" {
                return Err(LotseError::Dispatch(format!(
                    "Local runner reported: {status}"
                )));
            }
        }

        Ok(parsed)
    }
}

#[async_trait]
impl CapabilityProvider for LocalProvider {
    async fn invoke(
        &self,
        request: &InferenceRequest,
        payload: &RequestPayload,
    ) -> LotseResult<InferenceOutcome> {
        let engine = base64::engine::general_purpose::STANDARD;
        let runner_request = match payload {
            RequestPayload::Image(bytes) => RunnerRequest {
                capability: request.capability.as_str(),
                data: Some(engine.encode(bytes.as_ref())),
                sample_rate: None,
                text: None,
            },
            RequestPayload::Audio { pcm, sample_rate } => RunnerRequest {
                capability: request.capability.as_str(),
                data: Some(engine.encode(pcm.as_ref())),
                sample_rate: Some(*sample_rate),
                text: None,
            },
            RequestPayload::Text(text) => RunnerRequest {
                capability: request.capability.as_str(),
                data: None,
                sample_rate: None,
                text: Some(text.as_str()),
            },
        };

        let line = serde_json::to_string(&runner_request)?;
        debug!(capability = %request.capability, "Invoking local runner");
        let response = self.round_trip(line).await?;

        match request.capability {
            Capability::Detection => {
                let detections = response
                    .detections
                    .iter()
                    .map(|value| LabeledBox {
                        label: value["class_name"]
                            .as_str()
                            .or_else(|| value["label"].as_str())
                            .unwrap_or("object")
                            .to_string(),
                        confidence: value["confidence"].as_f64().unwrap_or(0.0) as f32,
                        x: 0.0,
                        y: 0.0,
                        width: 0.0,
                        height: 0.0,
                    })
                    .collect();
                Ok(InferenceOutcome::Detections(detections))
            }
            Capability::Caption => Ok(InferenceOutcome::Caption(
                response.caption.unwrap_or_default(),
            )),
            Capability::Ocr => Ok(InferenceOutcome::OcrText {
                text: response.text.unwrap_or_default(),
                regions: Vec::new(),
            }),
            Capability::Transcription => Ok(InferenceOutcome::Transcript(
                response.transcript.unwrap_or_default(),
            )),
            Capability::Dialogue => Ok(InferenceOutcome::Reply(
                response.response.unwrap_or_default(),
            )),
            Capability::Speech => {
                let encoded = response.audio.unwrap_or_default();
                let pcm = engine.decode(encoded.as_bytes()).map_err(|err| {
                    LotseError::Dispatch(format!("Invalid audio from local runner: {err}"))
                })?;
                Ok(InferenceOutcome::Speech(SpeechAudio::new(
                    pcm,
                    self.speech_sample_rate,
                )))
            }
        }
    }

    fn name(&self) -> &str {
        "local"
    }
}

impl Drop for LocalProvider {
    fn drop(&mut self) {
        if let Ok(mut state) = self.runner.try_lock() {
            self.shutdown_state(&mut state);
        }
    }
}
