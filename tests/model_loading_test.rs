//! Tests for loading the ONNX models and running them on real footage

use deception_detection::{
    config::{Config, EXAMPLE_CONFIG},
    emotion::Standardizer,
    models::ModelRegistry,
    pipeline::{Pipeline, PipelineOptions},
    progress::ProgressBoard,
    Error, Result,
};
use std::path::Path;

#[test]
fn test_missing_models_fail_validation() {
    let mut config = Config::from_yaml(EXAMPLE_CONFIG).unwrap();
    config.models.emotion_classifier = "/nonexistent/emotion.onnx".into();
    config.models.face_detector = "/nonexistent/face_detector.onnx".into();

    match config.validate() {
        Err(Error::ConfigError(message)) => assert!(message.contains("not found")),
        other => panic!("expected a config error, got {other:?}"),
    }
}

#[test]
#[ignore = "Requires ONNX models"]
fn test_load_standardizer_arrays() -> Result<()> {
    let standardizer = Standardizer::load("assets/mean_x.npy", "assets/std_x.npy")?;
    assert_eq!(standardizer.dim(), (48, 48));
    Ok(())
}

#[test]
#[ignore = "Requires ONNX models"]
fn test_load_registry_from_example_config() -> Result<()> {
    let config = Config::from_yaml(EXAMPLE_CONFIG)?;
    config.validate()?;
    let registry = ModelRegistry::from_config(&config)?;
    assert_eq!(registry.sequence_length(), 300);
    assert!(!registry.has_enhancer());
    Ok(())
}

#[test]
#[ignore = "Requires ONNX models and a test video"]
fn test_real_video_end_to_end() -> Result<()> {
    let video = Path::new("test_videos/interview.mp4");
    assert!(video.exists(), "Test video not found");

    let config = Config::from_yaml(EXAMPLE_CONFIG)?;
    let mut registry = ModelRegistry::from_config(&config)?;
    let board = ProgressBoard::default();
    let progress = board.start_run();

    let result = Pipeline::new(&mut registry, PipelineOptions::from_config(&config)).run(video, &progress)?;

    assert!((0.0..=1.0).contains(&result.score()));
    assert!(!result.summary().is_empty());
    assert_eq!(progress.percent(), 100);
    Ok(())
}
