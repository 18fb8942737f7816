//! Deception scoring over a fixed-length feature sequence.

use crate::aggregate::FeatureSequence;
use crate::constants::DECISION_BOUNDARY;
use crate::onnx::OnnxModel;
use crate::stats::load_npy;
use crate::{Error, Result};
use log::debug;
use ndarray::{Array1, Array3};
use ort::Environment;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Sequence model mapping `(1, N, feature_dim)` to a score in `[0, 1]`
pub trait SequenceModel: Send {
    /// Score one sequence batch
    ///
    /// # Errors
    ///
    /// Returns `ModelInference` on any runtime failure.
    fn score(&mut self, sequence: &Array3<f32>) -> Result<f32>;
}

/// Sequence classifier with a single sigmoid output
pub struct OnnxSequenceScorer {
    model: OnnxModel,
}

impl OnnxSequenceScorer {
    /// Load the scorer model
    ///
    /// # Errors
    ///
    /// Returns an error if the model cannot be loaded.
    pub fn new<P: AsRef<Path>>(environment: &Arc<Environment>, model_path: P) -> Result<Self> {
        Ok(Self {
            model: OnnxModel::load(environment, model_path, "sequence scorer")?,
        })
    }
}

impl SequenceModel for OnnxSequenceScorer {
    fn score(&mut self, sequence: &Array3<f32>) -> Result<f32> {
        let outputs = self.model.run(sequence.clone().into_dyn())?;
        match outputs.first() {
            Some(tensor) if tensor.len() == 1 => Ok(tensor.data[0]),
            Some(tensor) => Err(Error::inference(format!(
                "sequence scorer returned shape {:?}, expected a scalar",
                tensor.shape
            ))),
            None => Err(Error::inference("sequence scorer returned no output")),
        }
    }
}

/// Score from distances to the truthful and deceptive prototypes.
///
/// `d_truth / (d_truth + d_lie)`: above 0.5 when the embedding sits closer to
/// the deceptive prototype, exactly 0.5 when equidistant.
///
/// # Errors
///
/// Returns `ModelInference` if the lengths disagree.
#[allow(clippy::similar_names)]
pub fn prototype_score(embedding: &Array1<f32>, truthful: &Array1<f32>, deceptive: &Array1<f32>) -> Result<f32> {
    if embedding.len() != truthful.len() || embedding.len() != deceptive.len() {
        return Err(Error::inference(format!(
            "embedding length {} does not match prototypes ({}, {})",
            embedding.len(),
            truthful.len(),
            deceptive.len()
        )));
    }
    let distance = |p: &Array1<f32>| (embedding - p).mapv(|v| v * v).sum().sqrt();
    let d_truth = distance(truthful);
    let d_lie = distance(deceptive);
    let total = d_truth + d_lie;
    if total <= f32::EPSILON {
        return Ok(DECISION_BOUNDARY);
    }
    Ok(d_truth / total)
}

/// Embedding model compared against stored average truthful/deceptive embeddings
pub struct PrototypeScorer {
    embedder: OnnxModel,
    truthful: Array1<f32>,
    deceptive: Array1<f32>,
}

impl PrototypeScorer {
    /// Load the embedding model and both prototype `.npy` files
    ///
    /// # Errors
    ///
    /// Returns an error if a file is unreadable or the prototypes differ in length.
    pub fn new<P: AsRef<Path>>(
        environment: &Arc<Environment>,
        embedder_path: P,
        truthful_path: P,
        deceptive_path: P,
    ) -> Result<Self> {
        let embedder = OnnxModel::load(environment, embedder_path, "sequence embedder")?;
        let truthful = Array1::from_iter(load_npy(truthful_path)?.iter().copied());
        let deceptive = Array1::from_iter(load_npy(deceptive_path)?.iter().copied());
        if truthful.is_empty() || truthful.len() != deceptive.len() {
            return Err(Error::ModelError(format!(
                "prototype lengths differ or are empty: {} vs {}",
                truthful.len(),
                deceptive.len()
            )));
        }
        debug!("Loaded {}-dimensional prototypes", truthful.len());
        Ok(Self {
            embedder,
            truthful,
            deceptive,
        })
    }
}

impl SequenceModel for PrototypeScorer {
    fn score(&mut self, sequence: &Array3<f32>) -> Result<f32> {
        let outputs = self.embedder.run(sequence.clone().into_dyn())?;
        let embedding = outputs
            .first()
            .map(|t| Array1::from_vec(t.data.clone()))
            .ok_or_else(|| Error::inference("sequence embedder returned no output"))?;
        prototype_score(&embedding, &self.truthful, &self.deceptive)
    }
}

/// Binary outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Truthful,
    Deceptive,
}

impl Verdict {
    /// `Deceptive` strictly above 0.5
    #[must_use]
    pub fn from_score(score: f32) -> Self {
        if score > DECISION_BOUNDARY {
            Self::Deceptive
        } else {
            Self::Truthful
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Truthful => "Truthful",
            Self::Deceptive => "Deceptive",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// `|score - 0.5| * 200`: 0 at the boundary, 100 at either extreme
#[must_use]
pub fn confidence_percent(score: f32) -> f32 {
    (score - DECISION_BOUNDARY).abs() * 2.0 * 100.0
}

/// Validating front-end over a [`SequenceModel`]
pub struct DeceptionScorer {
    model: Box<dyn SequenceModel>,
    sequence_length: usize,
}

impl DeceptionScorer {
    #[must_use]
    pub fn new(model: Box<dyn SequenceModel>, sequence_length: usize) -> Self {
        Self { model, sequence_length }
    }

    /// Sequence length the model requires
    #[must_use]
    pub fn sequence_length(&self) -> usize {
        self.sequence_length
    }

    /// Score a sequence of exactly the required length
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a wrong-length sequence and `ModelInference`
    /// for a model failure or a score outside `[0, 1]`.
    pub fn score(&mut self, sequence: &FeatureSequence) -> Result<f32> {
        if sequence.len() != self.sequence_length {
            return Err(Error::InvalidInput(format!(
                "sequence has {} frames, scorer requires {}",
                sequence.len(),
                self.sequence_length
            )));
        }
        let score = self.model.score(&sequence.to_batch())?;
        if !score.is_finite() || !(0.0..=1.0).contains(&score) {
            return Err(Error::inference(format!("score {score} outside [0, 1]")));
        }
        Ok(score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    struct Fixed(f32);

    impl SequenceModel for Fixed {
        fn score(&mut self, sequence: &Array3<f32>) -> Result<f32> {
            assert_eq!(sequence.shape()[0], 1);
            Ok(self.0)
        }
    }

    fn sequence(frames: usize) -> FeatureSequence {
        FeatureSequence::assemble(&[Array2::ones((frames, 4))]).unwrap()
    }

    #[test]
    fn test_verdict_boundary() {
        assert_eq!(Verdict::from_score(0.5), Verdict::Truthful);
        assert_eq!(Verdict::from_score(0.500_001), Verdict::Deceptive);
        assert_eq!(Verdict::from_score(0.0), Verdict::Truthful);
        assert_eq!(Verdict::from_score(1.0), Verdict::Deceptive);
    }

    #[test]
    fn test_confidence_percent() {
        assert_eq!(confidence_percent(0.5), 0.0);
        assert!((confidence_percent(0.0) - 100.0).abs() < 1e-4);
        assert!((confidence_percent(1.0) - 100.0).abs() < 1e-4);
        assert!((confidence_percent(0.75) - 50.0).abs() < 1e-4);
    }

    #[test]
    fn test_prototype_score() {
        let truthful = array![0.0, 0.0];
        let deceptive = array![4.0, 0.0];
        let near_lie = prototype_score(&array![3.0, 0.0], &truthful, &deceptive).unwrap();
        assert!((near_lie - 0.75).abs() < 1e-6);
        assert_eq!(Verdict::from_score(near_lie), Verdict::Deceptive);

        let middle = prototype_score(&array![2.0, 0.0], &truthful, &deceptive).unwrap();
        assert!((middle - 0.5).abs() < 1e-6);

        let same = prototype_score(&array![1.0, 1.0], &array![1.0, 1.0], &array![1.0, 1.0]).unwrap();
        assert_eq!(same, 0.5);

        assert!(prototype_score(&array![1.0], &truthful, &deceptive).is_err());
    }

    #[test]
    fn test_scorer_checks_length() {
        let mut scorer = DeceptionScorer::new(Box::new(Fixed(0.3)), 300);
        assert!(matches!(scorer.score(&sequence(299)), Err(Error::InvalidInput(_))));
        assert!((scorer.score(&sequence(300)).unwrap() - 0.3).abs() < f32::EPSILON);
    }

    #[test]
    fn test_scorer_rejects_out_of_range() {
        for bad in [f32::NAN, -0.1, 1.5] {
            let mut scorer = DeceptionScorer::new(Box::new(Fixed(bad)), 10);
            assert!(matches!(scorer.score(&sequence(10)), Err(Error::ModelInference(_))));
        }
    }
}
