//! Constants used throughout the pipeline

/// Number of emotion classes produced by the classifier
pub const NUM_EMOTIONS: usize = 7;

/// Frames fed to the sequence scorer
pub const DEFAULT_TARGET_FRAMES: usize = 300;

/// Side length of a normalized face crop
pub const FACE_CROP_SIZE: i32 = 128;

/// Side length of the classifier input
pub const CLASSIFIER_INPUT_SIZE: i32 = 48;

/// Frames per classifier batch
pub const DEFAULT_CHUNK_SIZE: usize = 30;

/// Added to the per-pixel std during standardization
pub const STANDARDIZE_EPSILON: f32 = 1e-8;

/// Consecutive crops at or above this similarity are rejected
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.9;

/// Bounding box margins as fractions of the frame size
pub const FOREHEAD_MARGIN_RATIO: f64 = 0.08;
pub const CHIN_MARGIN_RATIO: f64 = 0.01;
pub const BOX_PADDING_RATIO: f64 = 0.02;

/// Face mesh landmark indices
pub const MESH_NUM_LANDMARKS: usize = 468;
pub const MESH_LEFT_EYE: usize = 33;
pub const MESH_RIGHT_EYE: usize = 263;
pub const MESH_NOSE_TIP: usize = 4;
pub const MESH_FOREHEAD: usize = 10;
pub const MESH_CHIN: usize = 152;

/// Image normalization constants for SCRFD face detection
pub const IMAGE_NORMALIZATION_OFFSET: f32 = 127.5;
pub const IMAGE_NORMALIZATION_SCALE: f32 = 128.0;

/// Confidence timeline sample count
pub const DEFAULT_TIMELINE_SAMPLES: usize = 6;

/// Frame rate assumed when synthesizing timeline labels
pub const APPROX_FPS: usize = 30;

/// Scores strictly above this are deceptive
pub const DECISION_BOUNDARY: f32 = 0.5;

/// Structural similarity window and stabilizers
pub const SSIM_WINDOW: i32 = 7;
pub const SSIM_K1: f64 = 0.01;
pub const SSIM_K2: f64 = 0.03;
pub const SSIM_DATA_RANGE: f64 = 255.0;

/// Default integer upscale factor for the enhancer
pub const DEFAULT_ENHANCE_SCALE: i32 = 2;
