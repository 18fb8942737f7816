//! Video-to-verdict orchestration.
//!
//! A run moves through `Sampling → EmotionInference → FeatureExtraction →
//! DeceptionScoring → Done`, reporting into its [`ProgressHandle`]. Any
//! failure ends the run at 100% with no partial result.

use crate::aggregate::{ConfidenceTimeline, EmotionSummary, FeatureSequence};
use crate::config::Config;
use crate::enhance::enhance_faces;
use crate::models::ModelRegistry;
use crate::normalizer::{FaceNormalizer, NormalizedFace, NormalizerSettings};
use crate::progress::{ProgressHandle, RunStage};
use crate::result::InferenceResult;
use crate::utils::image_conversion::mat_to_rgb_image;
use crate::video::{FrameSampler, FrameSource, SamplingPolicy, VideoFileSource};
use crate::{Error, Result};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Per-run knobs taken from the configuration
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub policy: SamplingPolicy,
    pub target_frames: usize,
    pub max_consecutive_failures: usize,
    pub normalizer: NormalizerSettings,
    pub timeline_samples: usize,
    pub approximate_fps: usize,
    /// Write the normalized crops here as `frame_0000.png …`
    pub export_dir: Option<PathBuf>,
}

impl PipelineOptions {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            policy: config.sampling.policy,
            target_frames: config.sampling.target_frames,
            max_consecutive_failures: config.sampling.max_consecutive_failures,
            normalizer: config.face.normalizer_settings(),
            timeline_samples: config.aggregation.timeline_samples,
            approximate_fps: config.aggregation.approximate_fps,
            export_dir: None,
        }
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Write crops as numbered PNG files
///
/// # Errors
///
/// Returns an error if the directory cannot be created or a file cannot be written.
pub fn export_frames(faces: &[NormalizedFace], dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    for (i, face) in faces.iter().enumerate() {
        mat_to_rgb_image(&face.image)?.save(dir.join(format!("frame_{i:04}.png")))?;
    }
    info!("Exported {} frames to {}", faces.len(), dir.display());
    Ok(())
}

/// Runs the whole inference chain against a model registry
pub struct Pipeline<'m> {
    models: &'m mut ModelRegistry,
    options: PipelineOptions,
}

impl<'m> Pipeline<'m> {
    #[must_use]
    pub fn new(models: &'m mut ModelRegistry, options: PipelineOptions) -> Self {
        Self { models, options }
    }

    /// Run on a video file
    ///
    /// # Errors
    ///
    /// Returns the first fatal error of any stage; progress still reaches 100.
    pub fn run(&mut self, video: &Path, progress: &ProgressHandle) -> Result<InferenceResult> {
        let mut guard = progress.completion_guard();
        progress.enter(RunStage::Sampling);
        let mut source = VideoFileSource::open(video)?;
        info!(
            "{} reports {} frames at {:.1} fps",
            video.display(),
            source.frame_count()?,
            source.fps()?
        );
        let result = self.execute(&mut source, progress)?;
        guard.succeed();
        Ok(result)
    }

    /// Run on any frame source
    ///
    /// # Errors
    ///
    /// Returns the first fatal error of any stage; progress still reaches 100.
    pub fn run_source(&mut self, source: &mut dyn FrameSource, progress: &ProgressHandle) -> Result<InferenceResult> {
        let mut guard = progress.completion_guard();
        progress.enter(RunStage::Sampling);
        let result = self.execute(source, progress)?;
        guard.succeed();
        Ok(result)
    }

    fn execute(&mut self, source: &mut dyn FrameSource, progress: &ProgressHandle) -> Result<InferenceResult> {
        let started = Instant::now();
        let target = self.options.target_frames;
        if self.models.sequence_length() != target {
            return Err(Error::ConfigError(format!(
                "scorer expects {} frames, pipeline samples {target}",
                self.models.sequence_length()
            )));
        }

        let faces = self.sample_faces(source, progress)?;
        let faces = self.enhance(faces, progress)?;
        info!("{} normalized frames after sampling", faces.len());

        let artifact = match &self.options.export_dir {
            Some(dir) => {
                export_frames(&faces, dir)?;
                Some(dir.clone())
            }
            None => None,
        };

        progress.enter(RunStage::EmotionInference);
        let classifier = &mut self.models.emotion;
        let batch = classifier.prepare(&faces)?;
        // One forward pass per chunk yields both the probabilities and the feature tap
        let analysis = classifier.analyze(&batch, &mut |done, total| progress.report(done, total))?;
        let probabilities = analysis.probabilities;

        progress.enter(RunStage::FeatureExtraction);
        let sequence = FeatureSequence::assemble(&analysis.features)?;
        if sequence.len() != faces.len() {
            return Err(Error::inference(format!(
                "{} feature rows for {} frames",
                sequence.len(),
                faces.len()
            )));
        }
        if sequence.len() != target {
            info!("Resampling feature sequence from {} to {} frames", sequence.len(), target);
        }
        let sequence = sequence.resample(target);
        progress.report(1, 1);

        progress.enter(RunStage::DeceptionScoring);
        let score = self.models.scorer.score(&sequence)?;
        let summary = EmotionSummary::from_probabilities(&probabilities)?;
        let timeline = ConfidenceTimeline::from_probabilities(
            &probabilities,
            self.options.timeline_samples,
            self.options.approximate_fps,
        )?;

        let result = InferenceResult::new(score, summary, timeline, faces.len(), artifact);
        info!(
            "Run finished in {:.2?}: {} (score {:.3}, confidence {:.0}%)",
            started.elapsed(),
            result.verdict(),
            score,
            result.confidence()
        );
        Ok(result)
    }

    /// Sampling stage: produce normalized faces according to the policy
    fn sample_faces(&mut self, source: &mut dyn FrameSource, progress: &ProgressHandle) -> Result<Vec<NormalizedFace>> {
        let sampler = FrameSampler::new(self.options.target_frames, self.options.max_consecutive_failures);
        let mut normalizer = FaceNormalizer::new(self.models.landmarks.as_mut(), self.options.normalizer.clone());
        let mut report = |done: usize, total: usize| progress.report(done, total);

        let faces = match self.options.policy {
            SamplingPolicy::DetectedFace => sampler.sample_detected(source, &mut normalizer, &mut report)?.into_result()?,
            policy => {
                let outcome = if policy == SamplingPolicy::UniformStride {
                    sampler.sample_uniform(source, &mut |_, _| {})?
                } else {
                    sampler.sample_leading(source, &mut |_, _| {})?
                };
                let frames = outcome.into_result()?;
                let faces = normalizer.normalize_all(&frames, &mut report)?;
                if faces.is_empty() {
                    return Err(Error::NoFaceDetected {
                        frames_scanned: frames.len(),
                    });
                }
                faces
            }
        };
        Ok(faces)
    }

    /// Optional enhancement, still within the sampling stage
    fn enhance(&mut self, faces: Vec<NormalizedFace>, progress: &ProgressHandle) -> Result<Vec<NormalizedFace>> {
        let Some(enhancer) = self.models.enhancer.as_mut() else {
            return Ok(faces);
        };
        let scanned = faces.len();
        let faces = enhance_faces(enhancer.as_mut(), faces, &mut |done, total| progress.report(done, total));
        if faces.is_empty() {
            warn!("Every crop failed enhancement");
            return Err(Error::NoFaceDetected {
                frames_scanned: scanned,
            });
        }
        Ok(faces)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_follow_config() {
        let mut config = Config::default();
        config.sampling.policy = SamplingPolicy::Leading;
        config.sampling.target_frames = 120;
        config.aggregation.timeline_samples = 4;
        let options = PipelineOptions::from_config(&config);
        assert_eq!(options.policy, SamplingPolicy::Leading);
        assert_eq!(options.target_frames, 120);
        assert_eq!(options.timeline_samples, 4);
        assert!(options.export_dir.is_none());
    }
}
