//! Dense face-mesh landmark detection.
//!
//! The detector locates the most confident face with SCRFD, crops a square
//! region around it and runs a 468-point face-mesh model on the crop. Points
//! come back normalized to the full frame (`0..1` on both axes).

use crate::constants::{
    MESH_CHIN, MESH_FOREHEAD, MESH_LEFT_EYE, MESH_NOSE_TIP, MESH_NUM_LANDMARKS, MESH_RIGHT_EYE,
};
use crate::face_detection::FaceDetector;
use crate::onnx::{OnnxModel, OutputTensor};
use crate::utils::image_conversion::to_bgr;
use crate::utils::square_region;
use crate::{Error, Result};
use ndarray::Array4;
use opencv::core::{Mat, Point, Point2f, Size, Vec3b};
use opencv::imgproc::{self, InterpolationFlags};
use opencv::prelude::*;
use ort::Environment;
use std::path::Path;
use std::sync::Arc;

/// Default face-mesh input size
const DEFAULT_MESH_INPUT_SIZE: i32 = 192;

/// Values per mesh landmark (x, y, z)
const MESH_COORDS: usize = 3;

/// Largest landmark index the aligner reads
const MAX_ANCHOR_INDEX: usize = MESH_RIGHT_EYE;

/// Face landmarks normalized to the frame size
#[derive(Debug, Clone, PartialEq)]
pub struct FaceLandmarks {
    points: Vec<Point2f>,
}

impl FaceLandmarks {
    /// Wrap normalized points
    ///
    /// # Errors
    ///
    /// Returns an error if fewer points are given than the anchor indices need.
    pub fn new(points: Vec<Point2f>) -> Result<Self> {
        if points.len() <= MAX_ANCHOR_INDEX {
            return Err(Error::InvalidInput(format!(
                "Expected at least {} landmarks, got {}",
                MAX_ANCHOR_INDEX + 1,
                points.len()
            )));
        }
        Ok(Self { points })
    }

    /// Point `index` scaled to pixels, truncated toward zero
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn pixel(&self, index: usize, width: i32, height: i32) -> Point {
        let p = self.points[index];
        Point::new((p.x * width as f32) as i32, (p.y * height as f32) as i32)
    }

    /// Every point scaled to pixels
    #[must_use]
    pub fn pixels(&self, width: i32, height: i32) -> Vec<Point> {
        (0..self.points.len()).map(|i| self.pixel(i, width, height)).collect()
    }

    /// The five anchors alignment works from, in pixels
    #[must_use]
    pub fn anchors(&self, width: i32, height: i32) -> FaceAnchors {
        FaceAnchors {
            left_eye: self.pixel(MESH_LEFT_EYE, width, height),
            right_eye: self.pixel(MESH_RIGHT_EYE, width, height),
            nose_tip: self.pixel(MESH_NOSE_TIP, width, height),
            forehead_y: self.pixel(MESH_FOREHEAD, width, height).y,
            chin_y: self.pixel(MESH_CHIN, width, height).y,
        }
    }
}

/// Anchor landmarks of one face in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceAnchors {
    /// Left eye outer corner
    pub left_eye: Point,
    /// Right eye outer corner
    pub right_eye: Point,
    pub nose_tip: Point,
    /// Top of the forehead
    pub forehead_y: i32,
    /// Bottom of the chin
    pub chin_y: i32,
}

/// Finds landmarks of a single face in a frame
pub trait LandmarkDetector: Send {
    /// Landmarks of the first face found, `None` when there is no face
    ///
    /// # Errors
    ///
    /// Returns `ModelInference` when the underlying model fails.
    fn detect(&mut self, frame: &Mat) -> Result<Option<FaceLandmarks>>;
}

/// SCRFD + face-mesh landmark detector
pub struct FaceMeshDetector {
    locator: FaceDetector,
    mesh: OnnxModel,
    input_size: i32,
    presence_threshold: f32,
    expansion: f32,
}

impl FaceMeshDetector {
    /// Load the locator and mesh models
    ///
    /// # Errors
    ///
    /// Returns an error if either model cannot be loaded.
    pub fn new<P: AsRef<Path>>(
        environment: &Arc<Environment>,
        locator: FaceDetector,
        mesh_path: P,
        presence_threshold: f32,
        expansion: f32,
    ) -> Result<Self> {
        let mesh = OnnxModel::load(environment, mesh_path, "face mesh")?;

        // [batch, height, width, channels]
        let dims = mesh.input_dimensions();
        let input_size = dims
            .get(1)
            .copied()
            .flatten()
            .map_or(DEFAULT_MESH_INPUT_SIZE, |d| d as i32);

        Ok(Self {
            locator,
            mesh,
            input_size,
            presence_threshold,
            expansion,
        })
    }

    /// Crop to normalized NHWC RGB in `[0, 1]`
    fn preprocess(&self, crop: &Mat) -> Result<Array4<f32>> {
        let mut resized = Mat::default();
        imgproc::resize(
            crop,
            &mut resized,
            Size::new(self.input_size, self.input_size),
            0.0,
            0.0,
            InterpolationFlags::INTER_LINEAR as i32,
        )?;

        let size = self.input_size as usize;
        let mut array = Array4::<f32>::zeros((1, size, size, 3));
        for row in 0..size {
            for col in 0..size {
                let pixel = resized.at_2d::<Vec3b>(row as i32, col as i32)?;
                for ch in 0..3 {
                    array[[0, row, col, ch]] = f32::from(pixel[2 - ch]) / 255.0;
                }
            }
        }
        Ok(array)
    }

    /// Split outputs into landmark coordinates and the optional face-presence logit
    fn split_outputs(outputs: &[OutputTensor]) -> Result<(&OutputTensor, Option<f32>)> {
        let landmarks = outputs
            .iter()
            .find(|o| o.len() >= MESH_NUM_LANDMARKS * 2)
            .ok_or_else(|| Error::inference("face mesh produced no landmark tensor"))?;
        let presence = outputs.iter().find(|o| o.len() == 1).map(|o| o.data[0]);
        Ok((landmarks, presence))
    }
}

impl LandmarkDetector for FaceMeshDetector {
    #[allow(clippy::cast_precision_loss)]
    fn detect(&mut self, frame: &Mat) -> Result<Option<FaceLandmarks>> {
        // Both models take 3-channel input; grayscale and BGRA video is converted once here
        let converted;
        let frame = if frame.channels() == 3 {
            frame
        } else {
            converted = to_bgr(frame)?;
            &converted
        };

        let faces = self.locator.detect(frame)?;
        // Single-face assumption: only the most confident face is used
        let Some(face) = faces.first() else {
            return Ok(None);
        };

        let (width, height) = (frame.cols(), frame.rows());
        let region = square_region(face.bbox, width, height, self.expansion);
        if region.width <= 0 || region.height <= 0 {
            return Ok(None);
        }

        let crop = Mat::roi(frame, region)?.try_clone()?;
        let input = self.preprocess(&crop)?;
        let outputs = self.mesh.run(input.into_dyn())?;
        let (coords, presence) = Self::split_outputs(&outputs)?;

        if let Some(logit) = presence {
            let probability = 1.0 / (1.0 + (-logit).exp());
            if probability < self.presence_threshold {
                log::debug!("Face mesh presence {:.3} below threshold", probability);
                return Ok(None);
            }
        }

        let stride = if coords.len() >= MESH_NUM_LANDMARKS * MESH_COORDS {
            MESH_COORDS
        } else {
            2
        };
        let scale_x = region.width as f32 / self.input_size as f32;
        let scale_y = region.height as f32 / self.input_size as f32;

        let points = (0..MESH_NUM_LANDMARKS)
            .map(|i| {
                let x = region.x as f32 + coords.data[i * stride] * scale_x;
                let y = region.y as f32 + coords.data[i * stride + 1] * scale_y;
                Point2f::new(x / width as f32, y / height as f32)
            })
            .collect();

        FaceLandmarks::new(points).map(Some)
    }
}
