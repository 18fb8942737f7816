//! Emotion classifier adapter.
//!
//! Face crops are converted to 48×48 grayscale, standardized per pixel
//! against the training mean/std, and pushed through the classifier in
//! fixed-size chunks. The same network exposes a penultimate-layer feature
//! tap which feeds the sequence scorer.

use crate::constants::{NUM_EMOTIONS, STANDARDIZE_EPSILON};
use crate::normalizer::NormalizedFace;
use crate::onnx::{OnnxModel, OutputTensor};
use crate::stats::load_npy;
use crate::utils::image_conversion::gray_mat_to_array;
use crate::utils::safe_cast::usize_to_i32;
use crate::{Error, Result};
use log::debug;
use ndarray::{s, Array2, Array4, ArrayD, Axis, Ix2};
use opencv::core::{Mat, Size};
use opencv::imgproc::{self, InterpolationFlags};
use opencv::prelude::*;
use ort::Environment;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// The fixed emotion label set, in classifier output order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Emotion {
    Angry,
    Disgust,
    Fear,
    Happy,
    Sad,
    Surprise,
    Neutral,
}

impl Emotion {
    /// All labels in output order
    pub const ALL: [Self; NUM_EMOTIONS] = [
        Self::Angry,
        Self::Disgust,
        Self::Fear,
        Self::Happy,
        Self::Sad,
        Self::Surprise,
        Self::Neutral,
    ];

    /// Label for a classifier output column
    #[must_use]
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Column of this label in the classifier output
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Angry => "Angry",
            Self::Disgust => "Disgust",
            Self::Fear => "Fear",
            Self::Happy => "Happy",
            Self::Sad => "Sad",
            Self::Surprise => "Surprise",
            Self::Neutral => "Neutral",
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Per-pixel standardization with the training-set statistics
#[derive(Debug, Clone)]
pub struct Standardizer {
    mean: Array2<f32>,
    std: Array2<f32>,
}

impl Standardizer {
    /// Build from arrays of shape (H, W) or (H, W, 1)
    ///
    /// # Errors
    ///
    /// Returns `ModelError` if the shapes differ or are not 2-D images.
    pub fn from_arrays(mean: ArrayD<f32>, std: ArrayD<f32>) -> Result<Self> {
        let mean = Self::as_image(mean, "mean")?;
        let std = Self::as_image(std, "std")?;
        if mean.dim() != std.dim() {
            return Err(Error::ModelError(format!(
                "mean {:?} and std {:?} shapes differ",
                mean.dim(),
                std.dim()
            )));
        }
        Ok(Self { mean, std })
    }

    /// Load both arrays from `.npy` files
    ///
    /// # Errors
    ///
    /// Returns an error if either file is unreadable or the shapes are invalid.
    pub fn load<P: AsRef<Path>>(mean_path: P, std_path: P) -> Result<Self> {
        Self::from_arrays(load_npy(mean_path)?, load_npy(std_path)?)
    }

    fn as_image(array: ArrayD<f32>, name: &str) -> Result<Array2<f32>> {
        let array = match array.ndim() {
            3 if array.shape()[2] == 1 => array.index_axis_move(Axis(2), 0),
            4 if array.shape()[0] == 1 && array.shape()[3] == 1 => {
                array.index_axis_move(Axis(3), 0).index_axis_move(Axis(0), 0)
            }
            _ => array,
        };
        array
            .into_dimensionality::<Ix2>()
            .map_err(|e| Error::ModelError(format!("{name} array is not an image: {e}")))
    }

    /// (height, width) the statistics were computed for
    #[must_use]
    pub fn dim(&self) -> (usize, usize) {
        self.mean.dim()
    }

    /// `(pixel - mean) / (std + ε)`
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if `pixels` has a different shape.
    pub fn apply(&self, pixels: &Array2<f32>) -> Result<Array2<f32>> {
        if pixels.dim() != self.dim() {
            return Err(Error::InvalidInput(format!(
                "expected a {:?} image, got {:?}",
                self.dim(),
                pixels.dim()
            )));
        }
        Ok((pixels - &self.mean) / (&self.std + STANDARDIZE_EPSILON))
    }
}

/// Frozen classifier network
pub trait EmotionModel: Send {
    /// Emotion probabilities, one row of `NUM_EMOTIONS` per image
    ///
    /// # Errors
    ///
    /// Returns `ModelInference` on any runtime failure.
    fn predict_emotions(&mut self, batch: &Array4<f32>) -> Result<Array2<f32>>;

    /// Penultimate-layer features, one row per image
    ///
    /// # Errors
    ///
    /// Returns `ModelInference` on any runtime failure.
    fn extract_features(&mut self, batch: &Array4<f32>) -> Result<Array2<f32>>;

    /// Both outputs for one batch.
    ///
    /// Models that produce probabilities and features in a single forward
    /// pass should override this.
    ///
    /// # Errors
    ///
    /// Returns `ModelInference` on any runtime failure.
    fn infer(&mut self, batch: &Array4<f32>) -> Result<ChunkOutputs> {
        Ok(ChunkOutputs {
            probabilities: self.predict_emotions(batch)?,
            features: self.extract_features(batch)?,
        })
    }
}

/// Classifier outputs for one chunk of images
#[derive(Debug, Clone)]
pub struct ChunkOutputs {
    /// `(rows, NUM_EMOTIONS)` probabilities
    pub probabilities: Array2<f32>,
    /// `(rows, D)` penultimate-layer features
    pub features: Array2<f32>,
}

/// Reshape a tensor to `rows` rows, flattening the remaining axes
fn rows_of(tensor: &OutputTensor, rows: usize, what: &str) -> Result<Array2<f32>> {
    if rows == 0 || tensor.is_empty() || tensor.len() % rows != 0 {
        return Err(Error::inference(format!(
            "{what} output of shape {:?} does not split into {rows} rows",
            tensor.shape
        )));
    }
    Array2::from_shape_vec((rows, tensor.len() / rows), tensor.data.clone()).map_err(Error::inference)
}

/// Classifier exported to ONNX with both the softmax output and the feature
/// tap exposed as graph outputs. Input layout is NHWC `(n, 48, 48, 1)`.
pub struct OnnxEmotionModel {
    model: OnnxModel,
    probabilities: usize,
    features: usize,
}

impl OnnxEmotionModel {
    /// Load the classifier; `feature_output` names the tap output
    ///
    /// # Errors
    ///
    /// Returns `ModelError` if the tap is missing or there is no separate probability output.
    pub fn new<P: AsRef<Path>>(environment: &Arc<Environment>, model_path: P, feature_output: &str) -> Result<Self> {
        let model = OnnxModel::load(environment, model_path, "emotion classifier")?;
        let names = model.output_names();
        let features = model.output_index(feature_output).ok_or_else(|| {
            Error::ModelError(format!(
                "emotion classifier has no output named {feature_output:?} (outputs: {names:?})"
            ))
        })?;
        let probabilities = (0..names.len())
            .find(|&i| i != features)
            .ok_or_else(|| Error::ModelError("emotion classifier has no probability output".to_string()))?;
        debug!(
            "Emotion classifier outputs: probabilities {:?}, features {:?}",
            names[probabilities], names[features]
        );
        Ok(Self {
            model,
            probabilities,
            features,
        })
    }

    fn output(outputs: &[OutputTensor], index: usize, rows: usize, what: &str) -> Result<Array2<f32>> {
        let tensor = outputs
            .get(index)
            .ok_or_else(|| Error::inference(format!("emotion classifier returned no {what} output")))?;
        rows_of(tensor, rows, what)
    }
}

impl EmotionModel for OnnxEmotionModel {
    fn predict_emotions(&mut self, batch: &Array4<f32>) -> Result<Array2<f32>> {
        self.infer(batch).map(|outputs| outputs.probabilities)
    }

    fn extract_features(&mut self, batch: &Array4<f32>) -> Result<Array2<f32>> {
        self.infer(batch).map(|outputs| outputs.features)
    }

    fn infer(&mut self, batch: &Array4<f32>) -> Result<ChunkOutputs> {
        let rows = batch.len_of(Axis(0));
        let outputs = self.model.run(batch.clone().into_dyn())?;
        Ok(ChunkOutputs {
            probabilities: Self::output(&outputs, self.probabilities, rows, "probability")?,
            features: Self::output(&outputs, self.features, rows, "feature")?,
        })
    }
}

/// Probabilities and per-chunk features of a whole batch
#[derive(Debug, Clone)]
pub struct EmotionAnalysis {
    /// `(n, NUM_EMOTIONS)` probabilities in frame order
    pub probabilities: Array2<f32>,
    /// Feature matrices per chunk, in frame order
    pub features: Vec<Array2<f32>>,
}

/// Chunked classifier front-end
pub struct EmotionClassifier {
    model: Box<dyn EmotionModel>,
    standardizer: Standardizer,
    chunk_size: usize,
}

impl EmotionClassifier {
    #[must_use]
    pub fn new(model: Box<dyn EmotionModel>, standardizer: Standardizer, chunk_size: usize) -> Self {
        Self {
            model,
            standardizer,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Resize each grayscale crop to the classifier size and standardize it.
    ///
    /// Returns an NHWC batch `(n, H, W, 1)`.
    ///
    /// # Errors
    ///
    /// Returns an error if a crop cannot be resized.
    pub fn prepare(&self, faces: &[NormalizedFace]) -> Result<Array4<f32>> {
        let (height, width) = self.standardizer.dim();
        let mut batch = Array4::<f32>::zeros((faces.len(), height, width, 1));

        for (i, face) in faces.iter().enumerate() {
            let mut resized = Mat::default();
            imgproc::resize(
                &face.gray,
                &mut resized,
                Size::new(usize_to_i32(width)?, usize_to_i32(height)?),
                0.0,
                0.0,
                InterpolationFlags::INTER_LINEAR as i32,
            )?;
            let standardized = self.standardizer.apply(&gray_mat_to_array(&resized)?)?;
            batch.slice_mut(s![i, .., .., 0]).assign(&standardized);
        }
        Ok(batch)
    }

    /// Classify `batch` chunk by chunk, keeping both outputs of every forward pass.
    ///
    /// `on_progress` receives images done and the batch size after each chunk.
    ///
    /// # Errors
    ///
    /// Returns `ModelInference` if the model fails or returns the wrong shape.
    pub fn analyze(
        &mut self,
        batch: &Array4<f32>,
        on_progress: &mut dyn FnMut(usize, usize),
    ) -> Result<EmotionAnalysis> {
        let total = batch.len_of(Axis(0));
        let mut probabilities = Vec::with_capacity(total.div_ceil(self.chunk_size));
        let mut features = Vec::with_capacity(total.div_ceil(self.chunk_size));
        let mut done = 0;

        for chunk in batch.axis_chunks_iter(Axis(0), self.chunk_size) {
            let chunk = chunk.to_owned();
            let rows = chunk.len_of(Axis(0));
            let outputs = self.model.infer(&chunk)?;

            if outputs.probabilities.nrows() != rows || outputs.features.nrows() != rows {
                return Err(Error::inference(format!(
                    "{} probability and {} feature rows returned for a chunk of {rows}",
                    outputs.probabilities.nrows(),
                    outputs.features.nrows()
                )));
            }
            if outputs.probabilities.ncols() != NUM_EMOTIONS {
                return Err(Error::inference(format!(
                    "classifier returned {} emotion columns, expected {NUM_EMOTIONS}",
                    outputs.probabilities.ncols()
                )));
            }

            probabilities.push(outputs.probabilities);
            features.push(outputs.features);
            done += rows;
            on_progress(done, total);
        }

        let probabilities = if probabilities.is_empty() {
            Array2::zeros((0, NUM_EMOTIONS))
        } else {
            let views: Vec<_> = probabilities.iter().map(Array2::view).collect();
            ndarray::concatenate(Axis(0), &views).map_err(Error::inference)?
        };
        debug!("Classified {} images in {} chunks", total, features.len());
        Ok(EmotionAnalysis { probabilities, features })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::CLASSIFIER_INPUT_SIZE;
    use crate::stats::tests::npy_bytes;
    use ndarray::{Array1, IxDyn};
    use opencv::core::{Scalar, CV_8UC3};

    /// Classifier whose outputs are derived from the mean pixel of each image
    struct MeanModel {
        calls: Vec<usize>,
    }

    impl EmotionModel for MeanModel {
        fn predict_emotions(&mut self, batch: &Array4<f32>) -> Result<Array2<f32>> {
            self.calls.push(batch.len_of(Axis(0)));
            let mut out = Array2::zeros((batch.len_of(Axis(0)), NUM_EMOTIONS));
            for (i, image) in batch.outer_iter().enumerate() {
                let mean = image.mean().unwrap_or(0.0);
                out[[i, if mean > 0.0 { 3 } else { 6 }]] = 1.0;
            }
            Ok(out)
        }

        fn extract_features(&mut self, batch: &Array4<f32>) -> Result<Array2<f32>> {
            let means: Array1<f32> = batch.outer_iter().map(|img| img.mean().unwrap_or(0.0)).collect();
            Ok(means.insert_axis(Axis(1)))
        }
    }

    fn standardizer(mean: f32, std: f32) -> Standardizer {
        let size = CLASSIFIER_INPUT_SIZE as usize;
        Standardizer::from_arrays(
            ArrayD::from_elem(IxDyn(&[size, size]), mean),
            ArrayD::from_elem(IxDyn(&[size, size, 1]), std),
        )
        .unwrap()
    }

    fn faces(values: &[f64]) -> Vec<NormalizedFace> {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| {
                let image = Mat::new_rows_cols_with_default(128, 128, CV_8UC3, Scalar::all(v)).unwrap();
                NormalizedFace::from_crop(i, image).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_emotion_labels_follow_output_order() {
        assert_eq!(Emotion::from_index(0), Some(Emotion::Angry));
        assert_eq!(Emotion::from_index(6), Some(Emotion::Neutral));
        assert_eq!(Emotion::from_index(7), None);
        assert_eq!(Emotion::Surprise.index(), 5);
        assert_eq!(Emotion::Happy.to_string(), "Happy");
    }

    #[test]
    fn test_standardizer_formula_and_zero_std() {
        let standardizer = standardizer(100.0, 0.0);
        let pixels = Array2::from_elem((48, 48), 100.0);
        let out = standardizer.apply(&pixels).unwrap();
        assert!(out.iter().all(|v| v.is_finite() && v.abs() < 1e-6));

        let standardizer = self::standardizer(100.0, 10.0);
        let out = standardizer.apply(&Array2::from_elem((48, 48), 120.0)).unwrap();
        assert!((out[[0, 0]] - 2.0).abs() < 1e-5);

        assert!(standardizer.apply(&Array2::zeros((10, 10))).is_err());
    }

    #[test]
    fn test_standardizer_loads_npy() {
        let dir = std::env::temp_dir().join(format!("dd_standardizer_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let mean_path = dir.join("mean.npy");
        let std_path = dir.join("std.npy");
        std::fs::write(&mean_path, npy_bytes(&[48, 48, 1], &vec![1.0; 48 * 48])).unwrap();
        std::fs::write(&std_path, npy_bytes(&[48, 48, 1], &vec![2.0; 48 * 48])).unwrap();

        let standardizer = Standardizer::load(&mean_path, &std_path).unwrap();
        assert_eq!(standardizer.dim(), (48, 48));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_prepare_shapes_batch() {
        let classifier = EmotionClassifier::new(Box::new(MeanModel { calls: Vec::new() }), standardizer(0.0, 1.0), 30);
        let batch = classifier.prepare(&faces(&[10.0, 200.0])).unwrap();
        assert_eq!(batch.dim(), (2, 48, 48, 1));
        assert!((batch[[1, 5, 5, 0]] - 200.0).abs() < 1e-3);
    }

    #[test]
    fn test_chunking_does_not_change_results() {
        let values: Vec<f64> = (0..7).map(|i| if i % 3 == 0 { 10.0 } else { 200.0 }).collect();
        let faces = faces(&values);

        let mut small = EmotionClassifier::new(Box::new(MeanModel { calls: Vec::new() }), standardizer(100.0, 1.0), 3);
        let mut large = EmotionClassifier::new(Box::new(MeanModel { calls: Vec::new() }), standardizer(100.0, 1.0), 30);

        let batch = small.prepare(&faces).unwrap();
        let mut progress = Vec::new();
        let a = small.analyze(&batch, &mut |done, total| progress.push((done, total))).unwrap();
        let b = large.analyze(&batch, &mut |_, _| {}).unwrap();

        assert_eq!(a.probabilities, b.probabilities);
        assert_eq!(a.probabilities.dim(), (7, NUM_EMOTIONS));
        assert_eq!(a.probabilities[[0, 6]], 1.0);
        assert_eq!(a.probabilities[[1, 3]], 1.0);
        assert_eq!(progress, vec![(3, 7), (6, 7), (7, 7)]);
        assert_eq!(a.features.iter().map(Array2::nrows).collect::<Vec<_>>(), vec![3, 3, 1]);
        assert_eq!(b.features.len(), 1);
    }

    #[test]
    fn test_single_pass_model_runs_once_per_chunk() {
        /// Counts forward passes; only `infer` does real work
        struct SinglePass {
            passes: std::sync::Arc<std::sync::atomic::AtomicUsize>,
        }
        impl EmotionModel for SinglePass {
            fn predict_emotions(&mut self, batch: &Array4<f32>) -> Result<Array2<f32>> {
                self.infer(batch).map(|o| o.probabilities)
            }
            fn extract_features(&mut self, batch: &Array4<f32>) -> Result<Array2<f32>> {
                self.infer(batch).map(|o| o.features)
            }
            fn infer(&mut self, batch: &Array4<f32>) -> Result<ChunkOutputs> {
                self.passes.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                let rows = batch.len_of(Axis(0));
                Ok(ChunkOutputs {
                    probabilities: Array2::from_elem((rows, NUM_EMOTIONS), 1.0 / 7.0),
                    features: Array2::zeros((rows, 16)),
                })
            }
        }

        let passes = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let model = SinglePass {
            passes: std::sync::Arc::clone(&passes),
        };
        let mut classifier = EmotionClassifier::new(Box::new(model), standardizer(0.0, 1.0), 4);
        let analysis = classifier.analyze(&Array4::zeros((10, 48, 48, 1)), &mut |_, _| {}).unwrap();

        assert_eq!(passes.load(std::sync::atomic::Ordering::SeqCst), 3);
        assert_eq!(analysis.probabilities.nrows(), 10);
        assert_eq!(analysis.features.len(), 3);
    }

    #[test]
    fn test_empty_batch_yields_empty_analysis() {
        let mut classifier = EmotionClassifier::new(Box::new(MeanModel { calls: Vec::new() }), standardizer(0.0, 1.0), 4);
        let analysis = classifier.analyze(&Array4::zeros((0, 48, 48, 1)), &mut |_, _| {}).unwrap();
        assert_eq!(analysis.probabilities.dim(), (0, NUM_EMOTIONS));
        assert!(analysis.features.is_empty());
    }

    #[test]
    fn test_wrong_output_shapes_are_inference_errors() {
        struct FiveClasses;
        impl EmotionModel for FiveClasses {
            fn predict_emotions(&mut self, batch: &Array4<f32>) -> Result<Array2<f32>> {
                Ok(Array2::zeros((batch.len_of(Axis(0)), 5)))
            }
            fn extract_features(&mut self, batch: &Array4<f32>) -> Result<Array2<f32>> {
                Ok(Array2::zeros((batch.len_of(Axis(0)), 4)))
            }
        }

        struct ExtraFeatureRow;
        impl EmotionModel for ExtraFeatureRow {
            fn predict_emotions(&mut self, batch: &Array4<f32>) -> Result<Array2<f32>> {
                Ok(Array2::zeros((batch.len_of(Axis(0)), NUM_EMOTIONS)))
            }
            fn extract_features(&mut self, batch: &Array4<f32>) -> Result<Array2<f32>> {
                Ok(Array2::zeros((batch.len_of(Axis(0)) + 1, 4)))
            }
        }

        let batch = Array4::zeros((2, 48, 48, 1));
        let mut classifier = EmotionClassifier::new(Box::new(FiveClasses), standardizer(0.0, 1.0), 4);
        assert!(matches!(classifier.analyze(&batch, &mut |_, _| {}), Err(Error::ModelInference(_))));
        let mut classifier = EmotionClassifier::new(Box::new(ExtraFeatureRow), standardizer(0.0, 1.0), 4);
        assert!(matches!(classifier.analyze(&batch, &mut |_, _| {}), Err(Error::ModelInference(_))));
    }
}
