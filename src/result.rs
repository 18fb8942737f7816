//! Final run result and its flat serializable record.

use crate::aggregate::{ConfidenceTimeline, EmotionSummary};
use crate::scorer::{confidence_percent, Verdict};
use crate::Result;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Outcome of one successful pipeline run. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceResult {
    score: f32,
    verdict: Verdict,
    confidence: f32,
    summary: EmotionSummary,
    timeline: ConfidenceTimeline,
    frames_used: usize,
    artifact: Option<PathBuf>,
}

impl InferenceResult {
    /// Derive verdict and confidence from `score`
    #[must_use]
    pub fn new(
        score: f32,
        summary: EmotionSummary,
        timeline: ConfidenceTimeline,
        frames_used: usize,
        artifact: Option<PathBuf>,
    ) -> Self {
        Self {
            score,
            verdict: Verdict::from_score(score),
            confidence: confidence_percent(score),
            summary,
            timeline,
            frames_used,
            artifact,
        }
    }

    /// Raw deception probability
    #[must_use]
    pub fn score(&self) -> f32 {
        self.score
    }

    #[must_use]
    pub fn verdict(&self) -> Verdict {
        self.verdict
    }

    /// Distance from the decision boundary, 0–100
    #[must_use]
    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    #[must_use]
    pub fn summary(&self) -> &EmotionSummary {
        &self.summary
    }

    #[must_use]
    pub fn timeline(&self) -> &ConfidenceTimeline {
        &self.timeline
    }

    /// Normalized frames that reached the classifier, before length enforcement
    #[must_use]
    pub fn frames_used(&self) -> usize {
        self.frames_used
    }

    /// Directory of exported normalized frames, if any
    #[must_use]
    pub fn artifact(&self) -> Option<&Path> {
        self.artifact.as_deref()
    }

    /// Flatten into the presentation record
    #[must_use]
    pub fn to_record(&self) -> PredictionRecord {
        PredictionRecord {
            result: self.verdict.label().to_string(),
            confidence: format!("{}%", self.confidence.round()),
            prediction: vec![self.score],
            emotions: self
                .summary
                .shares()
                .iter()
                .map(|share| EmotionEntry {
                    name: share.emotion.label().to_string(),
                    value: round2(share.percentage),
                })
                .collect(),
            confidence_timeline: self
                .timeline
                .samples()
                .iter()
                .map(|sample| TimelineEntry {
                    time: sample.time.clone(),
                    confidence: round2(sample.confidence),
                    emotion: sample.emotion.label().to_string(),
                })
                .collect(),
            frames_dir: self.artifact.as_ref().map(|p| p.display().to_string()),
        }
    }
}

fn round2(value: f32) -> f32 {
    (value * 100.0).round() / 100.0
}

/// Emotion share as the presentation layer expects it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmotionEntry {
    pub name: String,
    pub value: f32,
}

/// Timeline sample as the presentation layer expects it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineEntry {
    pub time: String,
    pub confidence: f32,
    pub emotion: String,
}

/// Flat record consumed by the web front-end
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionRecord {
    /// `Truthful` or `Deceptive`
    pub result: String,
    /// Confidence as `"NN%"`
    pub confidence: String,
    /// Raw score, as a one-element list
    pub prediction: Vec<f32>,
    pub emotions: Vec<EmotionEntry>,
    pub confidence_timeline: Vec<TimelineEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frames_dir: Option<String>,
}

impl PredictionRecord {
    /// Pretty-printed JSON
    ///
    /// # Errors
    ///
    /// Returns `Json` if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn result(score: f32) -> InferenceResult {
        let mut probabilities = Array2::zeros((4, 7));
        probabilities[[0, 3]] = 0.9;
        probabilities[[1, 3]] = 0.7;
        probabilities[[2, 6]] = 0.6;
        probabilities[[3, 3]] = 0.55;
        let summary = EmotionSummary::from_probabilities(&probabilities).unwrap();
        let timeline = ConfidenceTimeline::from_probabilities(&probabilities, 6, 30).unwrap();
        InferenceResult::new(score, summary, timeline, 4, None)
    }

    #[test]
    fn test_verdict_and_confidence_derived_from_score() {
        let r = result(0.9);
        assert_eq!(r.verdict(), Verdict::Deceptive);
        assert!((r.confidence() - 80.0).abs() < 1e-3);

        let r = result(0.5);
        assert_eq!(r.verdict(), Verdict::Truthful);
        assert_eq!(r.confidence(), 0.0);
    }

    #[test]
    fn test_record_matches_web_contract() {
        let record = result(0.2).to_record();
        assert_eq!(record.result, "Truthful");
        assert_eq!(record.confidence, "60%");
        assert_eq!(record.prediction, vec![0.2]);
        assert_eq!(record.emotions.len(), 2);
        assert_eq!(record.emotions[0].name, "Happy");
        assert!((record.emotions[0].value - 75.0).abs() < 1e-3);
        assert_eq!(record.confidence_timeline.len(), 4);
        assert_eq!(record.confidence_timeline[2].emotion, "Neutral");

        let json: serde_json::Value = serde_json::from_str(&record.to_json().unwrap()).unwrap();
        assert_eq!(json["result"], "Truthful");
        assert_eq!(json["confidence_timeline"][0]["time"], "0:00");
        assert!(json.get("frames_dir").is_none());
    }
}
