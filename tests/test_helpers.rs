//! Helper functions and utilities for tests
#![allow(dead_code)]

use deception_detection::{
    constants::{CLASSIFIER_INPUT_SIZE, MESH_CHIN, MESH_FOREHEAD, MESH_LEFT_EYE, MESH_NUM_LANDMARKS, MESH_RIGHT_EYE},
    emotion::{EmotionClassifier, EmotionModel, Standardizer},
    enhance::FrameEnhancer,
    landmarks::{FaceLandmarks, LandmarkDetector},
    models::ModelRegistry,
    scorer::{DeceptionScorer, SequenceModel},
    video::FrameSource,
    Error, Result,
};
use ndarray::{Array1, Array2, Array3, Array4, ArrayD, Axis, IxDyn};
use opencv::{
    core::{Mat, Point2f, Scalar, Vec3b, CV_8UC1, CV_8UC3},
    prelude::*,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Frame size used by the synthetic videos
pub const FRAME_WIDTH: i32 = 160;
pub const FRAME_HEIGHT: i32 = 120;

/// Create a solid BGR frame
pub fn solid_frame(value: f64) -> Result<Mat> {
    Mat::new_rows_cols_with_default(FRAME_HEIGHT, FRAME_WIDTH, CV_8UC3, Scalar::all(value)).map_err(Into::into)
}

/// Frames alternating between a dark and a bright face, far apart enough to
/// never be treated as near-duplicates
pub fn alternating_frames(count: usize) -> Result<Vec<Mat>> {
    (0..count)
        .map(|i| solid_frame(if i % 2 == 0 { 60.0 } else { 200.0 }))
        .collect()
}

/// Single-channel version of [`alternating_frames`]
pub fn gray_frames(count: usize) -> Result<Vec<Mat>> {
    (0..count)
        .map(|i| {
            let value = if i % 2 == 0 { 60.0 } else { 200.0 };
            Mat::new_rows_cols_with_default(FRAME_HEIGHT, FRAME_WIDTH, CV_8UC1, Scalar::all(value)).map_err(Into::into)
        })
        .collect()
}

/// Black frames, which the mock detector reports as faceless
pub fn faceless_frames(count: usize) -> Result<Vec<Mat>> {
    (0..count).map(|_| solid_frame(0.0)).collect()
}

/// In-memory frame source
pub struct VecSource {
    reported: usize,
    frames: VecDeque<Mat>,
    failing_reads: Vec<usize>,
    reads: Arc<AtomicUsize>,
}

impl VecSource {
    pub fn new(frames: Vec<Mat>) -> Self {
        Self::with_failures(frames, &[])
    }

    /// Source whose reads at `failing_reads` (zero-based) fail to decode
    /// without consuming a frame
    pub fn with_failures(frames: Vec<Mat>, failing_reads: &[usize]) -> Self {
        Self {
            reported: frames.len() + failing_reads.len(),
            frames: frames.into(),
            failing_reads: failing_reads.to_vec(),
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Counter of `next_frame` calls
    pub fn reads(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.reads)
    }
}

impl FrameSource for VecSource {
    fn frame_count(&self) -> Result<usize> {
        Ok(self.reported)
    }

    fn next_frame(&mut self) -> Result<Option<Mat>> {
        let read = self.reads.fetch_add(1, Ordering::SeqCst);
        if self.failing_reads.contains(&read) {
            return Err(Error::FrameDecode { position: read });
        }
        Ok(self.frames.pop_front())
    }
}

/// Landmark detector returning a level face in the middle of every non-black frame
pub struct CenteredFace;

impl LandmarkDetector for CenteredFace {
    fn detect(&mut self, frame: &Mat) -> Result<Option<FaceLandmarks>> {
        let pixel = frame.at_2d::<Vec3b>(0, 0)?;
        if pixel[0] == 0 {
            return Ok(None);
        }
        let mut points = vec![Point2f::new(0.5, 0.5); MESH_NUM_LANDMARKS];
        points[MESH_LEFT_EYE] = Point2f::new(0.35, 0.4);
        points[MESH_RIGHT_EYE] = Point2f::new(0.65, 0.4);
        points[MESH_FOREHEAD] = Point2f::new(0.5, 0.2);
        points[MESH_CHIN] = Point2f::new(0.5, 0.8);
        FaceLandmarks::new(points).map(Some)
    }
}

/// Call counters shared between a test and its mock models
#[derive(Debug, Clone, Default)]
pub struct ModelCalls {
    pub emotions: Arc<AtomicUsize>,
    pub features: Arc<AtomicUsize>,
    pub scores: Arc<AtomicUsize>,
}

impl ModelCalls {
    pub fn total(&self) -> usize {
        self.emotions.load(Ordering::SeqCst) + self.features.load(Ordering::SeqCst) + self.scores.load(Ordering::SeqCst)
    }
}

/// Bright crops are `Happy`, dark crops `Neutral`; the feature is the mean pixel
pub struct BrightnessEmotions {
    calls: ModelCalls,
}

impl BrightnessEmotions {
    pub fn new(calls: ModelCalls) -> Self {
        Self { calls }
    }

    fn means(batch: &Array4<f32>) -> Array1<f32> {
        batch.outer_iter().map(|image| image.mean().unwrap_or(0.0)).collect()
    }
}

impl EmotionModel for BrightnessEmotions {
    fn predict_emotions(&mut self, batch: &Array4<f32>) -> Result<Array2<f32>> {
        self.calls.emotions.fetch_add(1, Ordering::SeqCst);
        let means = Self::means(batch);
        let mut out = Array2::from_elem((means.len(), 7), 0.01);
        for (i, mean) in means.iter().enumerate() {
            if *mean > 127.0 {
                out[[i, 3]] = 0.94;
            } else {
                out[[i, 6]] = 0.8;
            }
        }
        Ok(out)
    }

    fn extract_features(&mut self, batch: &Array4<f32>) -> Result<Array2<f32>> {
        self.calls.features.fetch_add(1, Ordering::SeqCst);
        let means = Self::means(batch);
        let mut out = Array2::zeros((means.len(), 4));
        for (mut row, mean) in out.axis_iter_mut(Axis(0)).zip(means.iter()) {
            row.fill(*mean / 255.0);
        }
        Ok(out)
    }
}

/// Sequence model returning a fixed score
pub struct FixedScore {
    score: f32,
    calls: ModelCalls,
}

impl FixedScore {
    pub fn new(score: f32, calls: ModelCalls) -> Self {
        Self { score, calls }
    }
}

impl SequenceModel for FixedScore {
    fn score(&mut self, sequence: &Array3<f32>) -> Result<f32> {
        self.calls.scores.fetch_add(1, Ordering::SeqCst);
        if sequence.shape()[0] != 1 {
            return Err(Error::inference("expected a single sequence"));
        }
        Ok(self.score)
    }
}

/// Identity standardizer at the classifier input size
pub fn identity_standardizer() -> Result<Standardizer> {
    let side = CLASSIFIER_INPUT_SIZE as usize;
    Standardizer::from_arrays(
        ArrayD::zeros(IxDyn(&[side, side])),
        ArrayD::from_elem(IxDyn(&[side, side]), 1.0),
    )
}

/// Classifier that fails on every batch
pub struct FailingEmotions;

impl EmotionModel for FailingEmotions {
    fn predict_emotions(&mut self, _batch: &Array4<f32>) -> Result<Array2<f32>> {
        Err(Error::inference("classifier session crashed"))
    }

    fn extract_features(&mut self, _batch: &Array4<f32>) -> Result<Array2<f32>> {
        Err(Error::inference("classifier session crashed"))
    }
}

/// Sequence model that fails on every call
pub struct FailingScore;

impl SequenceModel for FailingScore {
    fn score(&mut self, _sequence: &Array3<f32>) -> Result<f32> {
        Err(Error::inference("scorer session crashed"))
    }
}

/// Enhancer that rejects every crop
pub struct FailingEnhancer;

impl FrameEnhancer for FailingEnhancer {
    fn enhance(&mut self, _image: &Mat) -> Result<Mat> {
        Err(Error::Enhancement("upscaler rejected the crop".to_string()))
    }
}

/// Registry around the given classifier and sequence model
pub fn registry_with(
    emotions: Box<dyn EmotionModel>,
    scores: Box<dyn SequenceModel>,
    sequence_length: usize,
) -> Result<ModelRegistry> {
    let emotion = EmotionClassifier::new(emotions, identity_standardizer()?, 30);
    let scorer = DeceptionScorer::new(scores, sequence_length);
    Ok(ModelRegistry::new(Box::new(CenteredFace), emotion, scorer))
}

/// Registry of mock models scoring sequences of `sequence_length` frames
pub fn mock_registry(score: f32, sequence_length: usize) -> Result<(ModelRegistry, ModelCalls)> {
    let calls = ModelCalls::default();
    let registry = registry_with(
        Box::new(BrightnessEmotions::new(calls.clone())),
        Box::new(FixedScore::new(score, calls.clone())),
        sequence_length,
    )?;
    Ok((registry, calls))
}
