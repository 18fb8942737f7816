//! Error types for the deception detection pipeline.

use thiserror::Error;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum Error {
    /// Video is shorter than the requested frame count under uniform-stride sampling
    #[error("Insufficient frames: video has {available} decodable frames, {required} required")]
    InsufficientFrames {
        /// Frames the video reports as decodable
        available: usize,
        /// Frames the sampling policy needs
        required: usize,
    },

    /// No usable face crop was produced anywhere in the video
    #[error("No face detected in {frames_scanned} scanned frames")]
    NoFaceDetected {
        /// Frames inspected before giving up
        frames_scanned: usize,
    },

    /// A specific frame position could not be decoded
    #[error("Failed to decode frame at position {position}")]
    FrameDecode {
        /// Zero-based frame position in the source video
        position: usize,
    },

    /// Enhancement of a single face crop failed
    #[error("Enhancement error: {0}")]
    Enhancement(String),

    /// Classifier or scorer inference failed
    #[error("Model inference error: {0}")]
    ModelInference(String),

    /// `OpenCV` operation failed
    #[error("OpenCV error: {0}")]
    OpenCV(#[from] opencv::Error),

    /// `ONNX` Runtime session setup failed
    #[error("ONNX Runtime error: {0}")]
    OnnxRuntime(#[from] ort::OrtError),

    /// File I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image processing operation failed
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Invalid input parameters provided
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Model loading or structure error
    #[error("Model error: {0}")]
    ModelError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// YAML configuration could not be parsed or written
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Result record serialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether a detected-face scan may absorb this error and move on to the next frame.
    ///
    /// Decode misses and per-frame geometry/`OpenCV` failures are local to one frame.
    /// Model inference failures are never absorbed.
    #[must_use]
    pub fn is_per_frame(&self) -> bool {
        matches!(
            self,
            Self::FrameDecode { .. } | Self::OpenCV(_) | Self::InvalidInput(_) | Self::Enhancement(_)
        )
    }

    /// Wrap any displayable failure raised during a model call.
    pub fn inference(err: impl std::fmt::Display) -> Self {
        Self::ModelInference(err.to_string())
    }
}

/// Convenience type alias for Results with our Error type
pub type Result<T> = std::result::Result<T, Error>;
