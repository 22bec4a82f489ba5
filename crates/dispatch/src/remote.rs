// crates/dispatch/src/remote.rs

use async_trait::async_trait;
use lotse_config::RemoteEndpoints;
use lotse_core::{
    Capability, InferenceOutcome, InferenceRequest, LabeledBox, LotseError, LotseResult,
    SpeechAudio, TextRegion,
};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use crate::provider::{CapabilityProvider, RequestPayload};

/// RPC client for the cloud inference services, one endpoint per
/// capability. Image and audio payloads travel as octet streams, text
/// payloads as JSON; every call is bounded by the dispatcher's deadline,
/// not by a client-wide timeout.
pub struct RemoteProvider {
    client: Client,
    endpoints: RemoteEndpoints,
    speech_sample_rate: u32,
}

impl RemoteProvider {
    pub fn new(endpoints: RemoteEndpoints, speech_sample_rate: u32) -> LotseResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(2))
            .build()
            .map_err(|e| LotseError::Network(e.to_string()))?;

        Ok(Self {
            client,
            endpoints,
            speech_sample_rate,
        })
    }

    fn url_for(&self, capability: Capability) -> String {
        let base = self.endpoints.base_url.trim_end_matches('/');
        let path = match capability {
            Capability::Detection => &self.endpoints.detection_path,
            Capability::Caption => &self.endpoints.caption_path,
            Capability::Ocr => &self.endpoints.ocr_path,
            Capability::Transcription => &self.endpoints.transcription_path,
            Capability::Dialogue => &self.endpoints.dialogue_path,
            Capability::Speech => &self.endpoints.speech_path,
        };
        format!("{}{}", base, path)
    }

    async fn post(
        &self,
        capability: Capability,
        payload: &RequestPayload,
    ) -> LotseResult<reqwest::Response> {
        let url = self.url_for(capability);

        let request = match payload {
            RequestPayload::Image(bytes) => self
                .client
                .post(&url)
                .header("Content-Type", "application/octet-stream")
                .body(bytes.to_vec()),
            RequestPayload::Audio { pcm, sample_rate } => self
                .client
                .post(&url)
                .header("Content-Type", "application/octet-stream")
                .header("X-Sample-Rate", sample_rate.to_string())
                .body(pcm.to_vec()),
            RequestPayload::Text(text) => match capability {
                Capability::Dialogue => self.client.post(&url).json(&json!({ "prompt": text })),
                _ => self.client.post(&url).json(&json!({ "text": text })),
            },
        };

        let response = request
            .send()
            .await
            .map_err(|e| LotseError::Network(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(LotseError::Dispatch(format!(
                "{} service error {}: {}",
                capability, status, text
            )));
        }

        Ok(response)
    }

    async fn parse_json(&self, response: reqwest::Response) -> LotseResult<Value> {
        response
            .json()
            .await
            .map_err(|e| LotseError::Dispatch(format!("Failed to parse response: {}", e)))
    }
}

#[async_trait]
impl CapabilityProvider for RemoteProvider {
    async fn invoke(
        &self,
        request: &InferenceRequest,
        payload: &RequestPayload,
    ) -> LotseResult<InferenceOutcome> {
        let capability = request.capability;
        let response = self.post(capability, payload).await?;

        match capability {
            Capability::Detection => {
                let json = self.parse_json(response).await?;
                let detections = json["detections"]
                    .as_array()
                    .map(|items| items.iter().map(parse_labeled_box).collect())
                    .unwrap_or_default();
                Ok(InferenceOutcome::Detections(detections))
            }
            Capability::Caption => {
                let json = self.parse_json(response).await?;
                let caption = json["caption"].as_str().unwrap_or("").trim().to_string();
                Ok(InferenceOutcome::Caption(caption))
            }
            Capability::Ocr => {
                let json = self.parse_json(response).await?;
                let text = json["text"].as_str().unwrap_or("").trim().to_string();
                let regions = json["regions"]
                    .as_array()
                    .map(|items| items.iter().map(parse_text_region).collect())
                    .unwrap_or_default();
                Ok(InferenceOutcome::OcrText { text, regions })
            }
            Capability::Transcription => {
                let json = self.parse_json(response).await?;
                let transcript = json["transcript"].as_str().unwrap_or("").trim().to_string();
                Ok(InferenceOutcome::Transcript(transcript))
            }
            Capability::Dialogue => {
                let json = self.parse_json(response).await?;
                let reply = json["response"].as_str().unwrap_or("").trim().to_string();
                Ok(InferenceOutcome::Reply(reply))
            }
            Capability::Speech => {
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| LotseError::Network(format!("Failed to read audio: {}", e)))?;
                Ok(InferenceOutcome::Speech(SpeechAudio::new(
                    bytes.to_vec(),
                    self.speech_sample_rate,
                )))
            }
        }
    }

    fn name(&self) -> &str {
        "remote"
    }
}

fn parse_labeled_box(value: &Value) -> LabeledBox {
    let bbox = value["box"].as_array();
    let coord = |idx: usize| {
        bbox.and_then(|b| b.get(idx))
            .and_then(Value::as_f64)
            .unwrap_or(0.0) as f32
    };

    LabeledBox {
        label: value["class_name"]
            .as_str()
            .or_else(|| value["label"].as_str())
            .unwrap_or("object")
            .to_string(),
        confidence: value["confidence"].as_f64().unwrap_or(0.0) as f32,
        x: coord(0),
        y: coord(1),
        width: coord(2),
        height: coord(3),
    }
}

fn parse_text_region(value: &Value) -> TextRegion {
    let bbox = value["box"].as_array();
    let coord = |idx: usize| {
        bbox.and_then(|b| b.get(idx))
            .and_then(Value::as_f64)
            .unwrap_or(0.0) as f32
    };

    TextRegion {
        text: value["text"].as_str().unwrap_or("").to_string(),
        x: coord(0),
        y: coord(1),
        width: coord(2),
        height: coord(3),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_join_without_double_slash() {
        let mut endpoints = RemoteEndpoints::default();
        endpoints.base_url = "http://cloud.example:8000/".to_string();
        let provider = RemoteProvider::new(endpoints, 22_050).expect("client builds");

        assert_eq!(
            provider.url_for(Capability::Detection),
            "http://cloud.example:8000/detect"
        );
        assert_eq!(
            provider.url_for(Capability::Dialogue),
            "http://cloud.example:8000/chat"
        );
    }

    #[test]
    fn parses_detection_entries() {
        let value = json!({
            "class_name": "person",
            "confidence": 0.92,
            "box": [10.0, 20.0, 30.0, 40.0]
        });

        let parsed = parse_labeled_box(&value);
        assert_eq!(parsed.label, "person");
        assert!((parsed.confidence - 0.92).abs() < 1e-6);
        assert_eq!(parsed.width, 30.0);
    }
}
