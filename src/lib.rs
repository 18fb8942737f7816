//! Deception estimation from facial emotion dynamics in a video.
//!
//! This library provides a Rust implementation of a video-to-verdict
//! inference pipeline using:
//! - `OpenCV` for video decoding and face geometry
//! - ONNX Runtime for the face, emotion and sequence models
//! - ndarray for batching and feature sequences
//!
//! The pipeline consists of:
//! 1. Frame sampling (uniform stride, detected-face resample or leading frames)
//! 2. Face normalization: landmarks, eye-level rotation, 128×128 crop, SSIM deduplication
//! 3. Optional crop enhancement
//! 4. Chunked emotion classification with a penultimate-layer feature tap
//! 5. Aggregation into an emotion summary, a confidence timeline and a
//!    fixed-length feature sequence
//! 6. Sequence scoring into a deception probability and verdict
//!
//! # Examples
//!
//! ```no_run
//! use deception_detection::{config::Config, models::ModelRegistry, pipeline::{Pipeline, PipelineOptions},
//!                           progress::ProgressBoard};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_file("config.yaml")?;
//! let mut models = ModelRegistry::from_config(&config)?;
//! let board = ProgressBoard::default();
//!
//! let progress = board.start_run();
//! let mut pipeline = Pipeline::new(&mut models, PipelineOptions::from_config(&config));
//! let result = pipeline.run(Path::new("interview.mp4"), &progress)?;
//!
//! println!("{} ({:.0}%)", result.verdict(), result.confidence());
//! println!("{}", result.to_record().to_json()?);
//! # Ok(())
//! # }
//! ```

/// Error types and result handling
pub mod error;

/// Constants used throughout the pipeline
pub mod constants;

/// Configuration management
pub mod config;

/// Frame sampling from video files
pub mod video;

/// Shared ONNX Runtime session handling
pub mod onnx;

/// Face detection module for locating faces before landmarking
pub mod face_detection;

/// Face mesh landmark detection
pub mod landmarks;

/// Eye-level rotation and face cropping
pub mod alignment;

/// Structural similarity for near-duplicate rejection
pub mod similarity;

/// Per-frame face normalization
pub mod normalizer;

/// Optional crop enhancement
pub mod enhance;

/// Emotion classifier adapter
pub mod emotion;

/// `.npy` array loading
pub mod stats;

/// Emotion summary, confidence timeline and feature sequence assembly
pub mod aggregate;

/// Deception scoring and verdicts
pub mod scorer;

/// Per-run progress tracking
pub mod progress;

/// Model registry
pub mod models;

/// Pipeline orchestration
pub mod pipeline;

/// Inference results and their serializable record
pub mod result;

/// Utility functions for image conversion and numeric casts
pub mod utils;

pub use error::{Error, Result};
