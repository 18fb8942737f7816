//! Model registry: every model a run needs, loaded once at start-up.

use crate::config::Config;
use crate::emotion::{EmotionClassifier, OnnxEmotionModel, Standardizer};
use crate::enhance::{FrameEnhancer, LanczosResampler, OnnxSuperResolution};
use crate::face_detection::FaceDetector;
use crate::landmarks::{FaceMeshDetector, LandmarkDetector};
use crate::onnx;
use crate::scorer::{DeceptionScorer, OnnxSequenceScorer, PrototypeScorer, SequenceModel};
use crate::{Error, Result};
use log::info;

/// Loaded models, passed by reference into the pipeline.
///
/// Built from a [`Config`] in production or from hand-made trait objects in
/// tests.
pub struct ModelRegistry {
    pub(crate) landmarks: Box<dyn LandmarkDetector>,
    pub(crate) emotion: EmotionClassifier,
    pub(crate) scorer: DeceptionScorer,
    pub(crate) enhancer: Option<Box<dyn FrameEnhancer>>,
}

impl ModelRegistry {
    /// Assemble a registry from already constructed parts
    #[must_use]
    pub fn new(landmarks: Box<dyn LandmarkDetector>, emotion: EmotionClassifier, scorer: DeceptionScorer) -> Self {
        Self {
            landmarks,
            emotion,
            scorer,
            enhancer: None,
        }
    }

    /// Add a crop enhancer
    #[must_use]
    pub fn with_enhancer(mut self, enhancer: Box<dyn FrameEnhancer>) -> Self {
        self.enhancer = Some(enhancer);
        self
    }

    /// Load every model named in `config`
    ///
    /// # Errors
    ///
    /// Returns an error if a model or array cannot be loaded, or the
    /// mean/std arrays do not match the configured classifier input size.
    #[allow(clippy::cast_sign_loss)]
    pub fn from_config(config: &Config) -> Result<Self> {
        let models = &config.models;
        let environment = onnx::environment("deception-detection")?;

        let locator = FaceDetector::new(
            &environment,
            &models.face_detector,
            config.face.confidence_threshold,
            config.face.iou_threshold,
        )?;
        let landmarks = FaceMeshDetector::new(
            &environment,
            locator,
            &models.face_mesh,
            config.face.presence_threshold,
            config.face.bbox_expansion,
        )?;

        let standardizer = Standardizer::load(&models.mean, &models.std)?;
        let side = config.classifier.input_size as usize;
        if standardizer.dim() != (side, side) {
            return Err(Error::ModelError(format!(
                "mean/std arrays are {:?}, classifier input is {side}x{side}",
                standardizer.dim()
            )));
        }
        let classifier = OnnxEmotionModel::new(&environment, &models.emotion_classifier, &models.feature_output)?;
        let emotion = EmotionClassifier::new(Box::new(classifier), standardizer, config.classifier.chunk_size);

        let sequence_model: Box<dyn SequenceModel> = match &models.prototypes {
            Some(prototypes) => {
                info!("Using prototype scoring");
                Box::new(PrototypeScorer::new(
                    &environment,
                    &models.sequence_scorer,
                    &prototypes.truthful,
                    &prototypes.deceptive,
                )?)
            }
            None => Box::new(OnnxSequenceScorer::new(&environment, &models.sequence_scorer)?),
        };
        let scorer = DeceptionScorer::new(sequence_model, config.sampling.target_frames);

        let mut registry = Self::new(Box::new(landmarks), emotion, scorer);
        if config.enhancement.enabled {
            let enhancer: Box<dyn FrameEnhancer> = match &models.enhancer {
                Some(path) => Box::new(OnnxSuperResolution::new(&environment, path)?),
                None => Box::new(LanczosResampler::new(config.enhancement.scale)),
            };
            registry = registry.with_enhancer(enhancer);
        }

        info!("All models loaded");
        Ok(registry)
    }

    /// Sequence length the scorer expects
    #[must_use]
    pub fn sequence_length(&self) -> usize {
        self.scorer.sequence_length()
    }

    #[must_use]
    pub fn has_enhancer(&self) -> bool {
        self.enhancer.is_some()
    }
}
