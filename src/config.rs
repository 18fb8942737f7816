//! Configuration management for the deception detection pipeline

use crate::alignment::CropMargins;
use crate::constants::{
    APPROX_FPS, BOX_PADDING_RATIO, CHIN_MARGIN_RATIO, CLASSIFIER_INPUT_SIZE, DEFAULT_CHUNK_SIZE,
    DEFAULT_ENHANCE_SCALE, DEFAULT_SIMILARITY_THRESHOLD, DEFAULT_TARGET_FRAMES, DEFAULT_TIMELINE_SAMPLES,
    FACE_CROP_SIZE, FOREHEAD_MARGIN_RATIO,
};
use crate::normalizer::NormalizerSettings;
use crate::video::SamplingPolicy;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Model file paths
    pub models: ModelConfig,

    /// Frame sampling
    pub sampling: SamplingConfig,

    /// Face detection and normalization
    pub face: FaceConfig,

    /// Emotion classifier batching
    pub classifier: ClassifierConfig,

    /// Optional crop enhancement
    pub enhancement: EnhancementConfig,

    /// Summary and timeline settings
    pub aggregation: AggregationConfig,
}

/// Model file paths configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// SCRFD face detector ONNX model
    pub face_detector: PathBuf,

    /// 468-point face mesh ONNX model
    pub face_mesh: PathBuf,

    /// Emotion classifier ONNX model exposing the feature tap as an output
    pub emotion_classifier: PathBuf,

    /// Name of the classifier output used as the per-frame feature vector
    pub feature_output: String,

    /// Sequence scorer ONNX model (or the embedding model when prototypes are set)
    pub sequence_scorer: PathBuf,

    /// Per-pixel training mean (`.npy`)
    pub mean: PathBuf,

    /// Per-pixel training standard deviation (`.npy`)
    pub std: PathBuf,

    /// Super-resolution ONNX model; the Lanczos resampler is used when unset
    pub enhancer: Option<PathBuf>,

    /// Average embeddings for prototype scoring
    pub prototypes: Option<PrototypeConfig>,
}

/// Average truthful/deceptive embeddings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrototypeConfig {
    pub truthful: PathBuf,
    pub deceptive: PathBuf,
}

/// Frame sampling parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Sampling policy
    pub policy: SamplingPolicy,

    /// Frames per sequence
    pub target_frames: usize,

    /// Consecutive decode failures that end a detected-face scan
    pub max_consecutive_failures: usize,
}

/// Face detection and normalization parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FaceConfig {
    /// Confidence threshold for face detection (0.0-1.0)
    pub confidence_threshold: f32,

    /// IOU threshold for non-maximum suppression (0.0-1.0)
    pub iou_threshold: f32,

    /// Minimum face-mesh presence probability (0.0-1.0)
    pub presence_threshold: f32,

    /// Face region expansion before landmarking
    pub bbox_expansion: f32,

    /// Consecutive crops at or above this SSIM are rejected
    pub similarity_threshold: f64,

    /// Side of the normalized crop
    pub crop_size: i32,

    /// Margin above the forehead, fraction of frame height
    pub forehead_margin: f64,

    /// Margin below the chin, fraction of frame height
    pub chin_margin: f64,

    /// Padding on every side, fraction of frame width/height
    pub padding: f64,
}

/// Classifier parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Expected side of the classifier input (matches the mean/std arrays)
    pub input_size: i32,

    /// Frames per inference batch
    pub chunk_size: usize,
}

/// Enhancement parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhancementConfig {
    /// Run crops through the enhancer
    pub enabled: bool,

    /// Upscale factor of the model-free resampler
    pub scale: i32,
}

/// Aggregation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Maximum confidence timeline samples
    pub timeline_samples: usize,

    /// Frame rate assumed for timeline labels
    pub approximate_fps: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            face_detector: PathBuf::from("assets/face_detector.onnx"),
            face_mesh: PathBuf::from("assets/face_mesh.onnx"),
            emotion_classifier: PathBuf::from("assets/emotion_classifier.onnx"),
            feature_output: "flatten".to_string(),
            sequence_scorer: PathBuf::from("assets/sequence_scorer.onnx"),
            mean: PathBuf::from("assets/mean_x.npy"),
            std: PathBuf::from("assets/std_x.npy"),
            enhancer: None,
            prototypes: None,
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            policy: SamplingPolicy::DetectedFace,
            target_frames: DEFAULT_TARGET_FRAMES,
            max_consecutive_failures: 30,
        }
    }
}

impl Default for FaceConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            iou_threshold: 0.4,
            presence_threshold: 0.5,
            bbox_expansion: 0.25,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            crop_size: FACE_CROP_SIZE,
            forehead_margin: FOREHEAD_MARGIN_RATIO,
            chin_margin: CHIN_MARGIN_RATIO,
            padding: BOX_PADDING_RATIO,
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            input_size: CLASSIFIER_INPUT_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl Default for EnhancementConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            scale: DEFAULT_ENHANCE_SCALE,
        }
    }
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            timeline_samples: DEFAULT_TIMELINE_SAMPLES,
            approximate_fps: APPROX_FPS,
        }
    }
}

impl FaceConfig {
    /// Normalizer settings derived from this section
    #[must_use]
    pub fn normalizer_settings(&self) -> NormalizerSettings {
        NormalizerSettings {
            margins: CropMargins {
                forehead: self.forehead_margin,
                chin: self.chin_margin,
                padding: self.padding,
            },
            crop_size: self.crop_size,
            similarity_threshold: self.similarity_threshold,
        }
    }
}

fn require_file(path: &Path, what: &str) -> Result<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(Error::ConfigError(format!("{what} not found: {}", path.display())))
    }
}

impl Config {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the text is not a valid configuration.
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| Error::ConfigError(format!("Failed to parse config: {e}")))
    }

    /// Save configuration to a YAML file
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check value ranges without touching the filesystem
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` describing the first invalid value.
    pub fn check_ranges(&self) -> Result<()> {
        let unit = |value: f64, name: &str| {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(Error::ConfigError(format!("{name} must be between 0.0 and 1.0")))
            }
        };

        if self.sampling.target_frames == 0 {
            return Err(Error::ConfigError("Target frames must be greater than 0".to_string()));
        }
        unit(f64::from(self.face.confidence_threshold), "Confidence threshold")?;
        unit(f64::from(self.face.iou_threshold), "IOU threshold")?;
        unit(f64::from(self.face.presence_threshold), "Presence threshold")?;
        unit(self.face.similarity_threshold, "Similarity threshold")?;
        unit(self.face.forehead_margin, "Forehead margin")?;
        unit(self.face.chin_margin, "Chin margin")?;
        unit(self.face.padding, "Padding")?;

        if self.face.crop_size < 7 {
            return Err(Error::ConfigError("Crop size must be at least 7 pixels".to_string()));
        }
        if self.classifier.input_size <= 0 {
            return Err(Error::ConfigError("Classifier input size must be positive".to_string()));
        }
        if self.classifier.chunk_size == 0 {
            return Err(Error::ConfigError("Chunk size must be greater than 0".to_string()));
        }
        if self.enhancement.scale < 1 {
            return Err(Error::ConfigError("Enhancement scale must be at least 1".to_string()));
        }
        if self.aggregation.timeline_samples == 0 {
            return Err(Error::ConfigError("Timeline samples must be greater than 0".to_string()));
        }
        if self.aggregation.approximate_fps == 0 {
            return Err(Error::ConfigError("Approximate FPS must be greater than 0".to_string()));
        }
        Ok(())
    }

    /// Validate ranges and model file existence
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        self.check_ranges()?;

        let models = &self.models;
        require_file(&models.face_detector, "Face detector model")?;
        require_file(&models.face_mesh, "Face mesh model")?;
        require_file(&models.emotion_classifier, "Emotion classifier model")?;
        require_file(&models.sequence_scorer, "Sequence scorer model")?;
        require_file(&models.mean, "Mean array")?;
        require_file(&models.std, "Std array")?;
        if let Some(enhancer) = &models.enhancer {
            require_file(enhancer, "Enhancer model")?;
        }
        if let Some(prototypes) = &models.prototypes {
            require_file(&prototypes.truthful, "Truthful prototype")?;
            require_file(&prototypes.deceptive, "Deceptive prototype")?;
        }
        Ok(())
    }
}

/// Example configuration file content
pub const EXAMPLE_CONFIG: &str = r#"# Deception Detection Configuration

# Model paths
models:
  face_detector: "assets/face_detector.onnx"
  face_mesh: "assets/face_mesh.onnx"
  emotion_classifier: "assets/emotion_classifier.onnx"
  feature_output: "flatten"
  sequence_scorer: "assets/sequence_scorer.onnx"
  mean: "assets/mean_x.npy"
  std: "assets/std_x.npy"
  # enhancer: "assets/realesrgan_x2.onnx"
  # prototypes:
  #   truthful: "assets/truth_embedding.npy"
  #   deceptive: "assets/lie_embedding.npy"

# Frame sampling: uniform_stride, detected_face or leading
sampling:
  policy: detected_face
  target_frames: 300
  max_consecutive_failures: 30

# Face detection and normalization
face:
  confidence_threshold: 0.5
  iou_threshold: 0.4
  presence_threshold: 0.5
  bbox_expansion: 0.25
  similarity_threshold: 0.9
  crop_size: 128
  forehead_margin: 0.08
  chin_margin: 0.01
  padding: 0.02

# Emotion classifier
classifier:
  input_size: 48
  chunk_size: 30

# Crop enhancement
enhancement:
  enabled: false
  scale: 2

# Emotion summary and timeline
aggregation:
  timeline_samples: 6
  approximate_fps: 30
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_config_parses_to_defaults() {
        let config = Config::from_yaml(EXAMPLE_CONFIG).unwrap();
        assert_eq!(config.sampling.policy, SamplingPolicy::DetectedFace);
        assert_eq!(config.sampling.target_frames, 300);
        assert_eq!(config.face.crop_size, 128);
        assert_eq!(config.classifier.chunk_size, 30);
        assert!(config.models.enhancer.is_none());
        assert!(config.check_ranges().is_ok());
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config = Config::from_yaml("sampling:\n  policy: uniform_stride\n  target_frames: 120\n").unwrap();
        assert_eq!(config.sampling.policy, SamplingPolicy::UniformStride);
        assert_eq!(config.sampling.target_frames, 120);
        assert_eq!(config.sampling.max_consecutive_failures, 30);
        assert!((config.face.similarity_threshold - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn test_range_checks() {
        let mut config = Config::default();
        config.face.similarity_threshold = 1.5;
        assert!(config.check_ranges().is_err());

        let mut config = Config::default();
        config.classifier.chunk_size = 0;
        assert!(config.check_ranges().is_err());

        let mut config = Config::default();
        config.sampling.target_frames = 0;
        assert!(config.check_ranges().is_err());
    }

    #[test]
    fn test_validate_reports_missing_models() {
        let mut config = Config::default();
        config.models.face_detector = PathBuf::from("/nonexistent/face_detector.onnx");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Face detector model not found"));
    }

    #[test]
    fn test_round_trip_through_file() {
        let path = std::env::temp_dir().join(format!("dd_config_{}.yaml", std::process::id()));
        let mut config = Config::default();
        config.sampling.policy = SamplingPolicy::Leading;
        config.enhancement.enabled = true;
        config.to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.sampling.policy, SamplingPolicy::Leading);
        assert!(loaded.enhancement.enabled);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_normalizer_settings_follow_face_section() {
        let mut face = FaceConfig::default();
        face.crop_size = 96;
        face.forehead_margin = 0.1;
        let settings = face.normalizer_settings();
        assert_eq!(settings.crop_size, 96);
        assert!((settings.margins.forehead - 0.1).abs() < f64::EPSILON);
    }
}
