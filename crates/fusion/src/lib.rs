// crates/fusion/src/lib.rs

use lotse_config::FusionConfig;
use lotse_core::{InferenceOutcome, InferenceResult, LabeledBox};
use tracing::debug;

/// Merges the (possibly partial) result set of one sensing event into a
/// single utterance. Deterministic: the same result set always composes the
/// same text. Failed capabilities are silently omitted; a fully failed
/// event still yields the configured fallback so the user never gets dead
/// air.
pub struct ResponseComposer {
    config: FusionConfig,
    last_scene_utterance: Option<String>,
}

/// A composed utterance plus the flags the orchestrator acts on.
#[derive(Debug, Clone)]
pub struct ComposedUtterance {
    pub text: String,
    pub is_fallback: bool,
    pub is_repeat: bool,
}

impl ResponseComposer {
    pub fn new(config: FusionConfig) -> Self {
        Self {
            config,
            last_scene_utterance: None,
        }
    }

    /// Pure composition; no repeat-suppression state involved.
    pub fn compose(&self, results: &[InferenceResult]) -> String {
        let mut ocr_text: Option<String> = None;
        let mut caption: Option<String> = None;
        let mut detections: Vec<LabeledBox> = Vec::new();

        for result in results.iter().filter(|result| result.is_ok()) {
            match &result.outcome {
                Some(InferenceOutcome::OcrText { text, .. }) if !text.trim().is_empty() => {
                    ocr_text = Some(text.trim().to_string());
                }
                Some(InferenceOutcome::Caption(text)) if !text.trim().is_empty() => {
                    caption = Some(text.trim().to_string());
                }
                Some(InferenceOutcome::Detections(boxes)) => {
                    detections.extend(boxes.iter().cloned());
                }
                _ => {}
            }
        }

        // Reading text beats describing the scene once there is enough of
        // it to suggest the user is pointing the camera at something
        // written.
        if let Some(text) = &ocr_text {
            if text.chars().count() >= self.config.ocr_coverage_chars {
                return format!("It reads: {}", text);
            }
        }

        let scene = self.describe_scene(caption.as_deref(), &detections);
        if let Some(scene) = scene {
            return scene;
        }

        // Short OCR fragments are still better than nothing.
        if let Some(text) = ocr_text {
            return format!("It reads: {}", text);
        }

        self.config.fallback_utterance.clone()
    }

    fn describe_scene(&self, caption: Option<&str>, detections: &[LabeledBox]) -> Option<String> {
        let mut salient: Vec<&LabeledBox> = detections
            .iter()
            .filter(|detection| !detection.label.trim().is_empty())
            .collect();
        salient.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.label.cmp(&b.label))
        });

        let caption_lower = caption.map(str::to_lowercase).unwrap_or_default();
        let mut extra_labels: Vec<String> = Vec::new();
        for detection in salient {
            if extra_labels.len() >= self.config.max_detections {
                break;
            }
            let label_lower = detection.label.to_lowercase();
            if caption_lower.contains(&label_lower) || extra_labels.contains(&detection.label) {
                continue;
            }
            extra_labels.push(detection.label.clone());
        }

        match (caption, extra_labels.is_empty()) {
            (Some(caption), true) => Some(ensure_period(caption)),
            (Some(caption), false) => Some(format!(
                "{} I can also see {}.",
                ensure_period(caption),
                join_labels(&extra_labels)
            )),
            (None, false) => Some(format!("I can see {}.", join_labels(&extra_labels))),
            (None, true) => None,
        }
    }

    /// Composition with repeat suppression: an unchanged scene description
    /// is flagged so the orchestrator can skip re-speaking it, except when
    /// the acquisition gate forced the send to re-confirm context.
    pub fn compose_scene(
        &mut self,
        results: &[InferenceResult],
        force_speak: bool,
    ) -> ComposedUtterance {
        let text = self.compose(results);
        let is_fallback = text == self.config.fallback_utterance;
        let is_repeat = !is_fallback
            && !force_speak
            && self
                .last_scene_utterance
                .as_deref()
                .is_some_and(|last| last == text);

        if !is_fallback {
            self.last_scene_utterance = Some(text.clone());
        }

        if is_repeat {
            debug!("Scene unchanged since last utterance; flagged as repeat");
        }

        ComposedUtterance {
            text,
            is_fallback,
            is_repeat,
        }
    }
}

fn ensure_period(text: &str) -> String {
    let trimmed = text.trim_end();
    if trimmed.ends_with(['.', '!', '?']) {
        trimmed.to_string()
    } else {
        format!("{}.", trimmed)
    }
}

fn join_labels(labels: &[String]) -> String {
    match labels.len() {
        0 => String::new(),
        1 => labels[0].clone(),
        2 => format!("{} and {}", labels[0], labels[1]),
        _ => {
            let head = labels[..labels.len() - 1].join(", ");
            format!("{} and {}", head, labels[labels.len() - 1])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lotse_core::{Capability, ResultStatus};
    use std::time::Duration;
    use uuid::Uuid;

    fn ok(capability: Capability, outcome: InferenceOutcome) -> InferenceResult {
        InferenceResult::ok(Uuid::nil(), capability, outcome, Duration::from_millis(10))
    }

    fn failed(capability: Capability) -> InferenceResult {
        InferenceResult::failed(Uuid::nil(), capability, Duration::from_millis(10))
    }

    fn timed_out(capability: Capability) -> InferenceResult {
        InferenceResult::timed_out(Uuid::nil(), capability, Duration::from_millis(10))
    }

    fn detection(label: &str, confidence: f32) -> LabeledBox {
        LabeledBox {
            label: label.to_string(),
            confidence,
            x: 0.0,
            y: 0.0,
            width: 1.0,
            height: 1.0,
        }
    }

    fn composer() -> ResponseComposer {
        ResponseComposer::new(FusionConfig::default())
    }

    #[test]
    fn high_coverage_ocr_beats_caption() {
        let results = vec![
            ok(
                Capability::Ocr,
                InferenceOutcome::OcrText {
                    text: "Platform 4, trains to the airport depart here".to_string(),
                    regions: Vec::new(),
                },
            ),
            ok(
                Capability::Caption,
                InferenceOutcome::Caption("a sign hanging in a station".to_string()),
            ),
        ];

        let utterance = composer().compose(&results);
        assert!(utterance.starts_with("It reads:"));
        assert!(utterance.contains("Platform 4"));
    }

    #[test]
    fn caption_is_backbone_with_unmentioned_detections_appended() {
        let results = vec![
            ok(
                Capability::Caption,
                InferenceOutcome::Caption("a woman sitting at a table".to_string()),
            ),
            ok(
                Capability::Detection,
                InferenceOutcome::Detections(vec![
                    detection("woman", 0.95),
                    detection("cup", 0.9),
                    detection("laptop", 0.8),
                ]),
            ),
        ];

        let utterance = composer().compose(&results);
        assert!(utterance.starts_with("a woman sitting at a table."));
        assert!(utterance.contains("cup"));
        assert!(utterance.contains("laptop"));
        // Already implied by the caption.
        assert!(!utterance.contains("also see woman"));
    }

    #[test]
    fn short_ocr_does_not_preempt_the_scene() {
        let results = vec![
            ok(
                Capability::Ocr,
                InferenceOutcome::OcrText {
                    text: "EXIT".to_string(),
                    regions: Vec::new(),
                },
            ),
            ok(
                Capability::Caption,
                InferenceOutcome::Caption("a hallway with a door".to_string()),
            ),
        ];

        let utterance = composer().compose(&results);
        assert!(utterance.starts_with("a hallway"));
    }

    #[test]
    fn failed_capabilities_are_omitted_not_fatal() {
        let results = vec![
            timed_out(Capability::Ocr),
            failed(Capability::Detection),
            ok(
                Capability::Caption,
                InferenceOutcome::Caption("a quiet street".to_string()),
            ),
        ];

        assert_eq!(composer().compose(&results), "a quiet street.");
    }

    #[test]
    fn total_failure_yields_the_fallback_utterance() {
        let results = vec![
            timed_out(Capability::Caption),
            failed(Capability::Detection),
            timed_out(Capability::Ocr),
        ];

        let utterance = composer().compose(&results);
        assert_eq!(utterance, FusionConfig::default().fallback_utterance);
        assert!(!utterance.is_empty());
    }

    #[test]
    fn composition_is_idempotent() {
        let results = vec![
            ok(
                Capability::Caption,
                InferenceOutcome::Caption("a park bench".to_string()),
            ),
            ok(
                Capability::Detection,
                InferenceOutcome::Detections(vec![detection("dog", 0.9)]),
            ),
        ];

        let composer = composer();
        let first = composer.compose(&results);
        let second = composer.compose(&results);
        assert_eq!(first, second);
    }

    #[test]
    fn unchanged_scene_is_flagged_as_repeat() {
        let results = vec![ok(
            Capability::Caption,
            InferenceOutcome::Caption("a kitchen counter".to_string()),
        )];

        let mut composer = composer();
        let first = composer.compose_scene(&results, false);
        assert!(!first.is_repeat);

        let second = composer.compose_scene(&results, false);
        assert!(second.is_repeat);

        // A forced re-confirmation speaks even when nothing changed.
        let forced = composer.compose_scene(&results, true);
        assert!(!forced.is_repeat);
    }

    #[test]
    fn fallback_is_never_suppressed_as_repeat() {
        let results = vec![failed(Capability::Caption)];
        let mut composer = composer();
        assert!(!composer.compose_scene(&results, false).is_repeat);
        assert!(!composer.compose_scene(&results, false).is_repeat);
    }
}
