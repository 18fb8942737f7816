//! Face alignment geometry: eye-levelling rotation and forehead/chin bounded crop.

use crate::constants::{BOX_PADDING_RATIO, CHIN_MARGIN_RATIO, FOREHEAD_MARGIN_RATIO};
use crate::landmarks::FaceLandmarks;
use crate::{Error, Result};
use log::trace;
use opencv::core::{Mat, Point, Rect, Scalar, Size, BORDER_CONSTANT};
use opencv::imgproc::{self, InterpolationFlags};
use opencv::prelude::*;

/// Crop margins as fractions of the frame size
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropMargins {
    /// Added above the forehead landmark, fraction of frame height
    pub forehead: f64,
    /// Added below the chin landmark, fraction of frame height
    pub chin: f64,
    /// Added on every side after the margins, fraction of width/height
    pub padding: f64,
}

impl Default for CropMargins {
    fn default() -> Self {
        Self {
            forehead: FOREHEAD_MARGIN_RATIO,
            chin: CHIN_MARGIN_RATIO,
            padding: BOX_PADDING_RATIO,
        }
    }
}

/// 2×3 affine rotation about a center, as built by `OpenCV`'s `getRotationMatrix2D` with scale 1
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rotation {
    matrix: [[f64; 3]; 2],
    angle_degrees: f64,
}

impl Rotation {
    /// Rotation by `angle_degrees` (counter-clockwise on screen) about `center`
    #[must_use]
    pub fn about(center: (f64, f64), angle_degrees: f64) -> Self {
        let (sin, cos) = angle_degrees.to_radians().sin_cos();
        let (cx, cy) = center;
        Self {
            matrix: [
                [cos, sin, (1.0 - cos) * cx - sin * cy],
                [-sin, cos, sin * cx + (1.0 - cos) * cy],
            ],
            angle_degrees,
        }
    }

    /// Rotation that brings the eye-to-eye line horizontal, about the image center
    #[must_use]
    pub fn level_eyes(left_eye: Point, right_eye: Point, width: i32, height: i32) -> Self {
        let dx = f64::from(right_eye.x - left_eye.x);
        let dy = f64::from(right_eye.y - left_eye.y);
        let angle = dy.atan2(dx).to_degrees();
        let center = (f64::from(width / 2), f64::from(height / 2));
        Self::about(center, angle)
    }

    /// Rotation angle in degrees
    #[must_use]
    pub fn angle_degrees(&self) -> f64 {
        self.angle_degrees
    }

    /// Transform a point in homogeneous coordinates, truncating toward zero
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn apply(&self, p: Point) -> Point {
        let (x, y) = (f64::from(p.x), f64::from(p.y));
        let m = &self.matrix;
        Point::new(
            (m[0][0] * x + m[0][1] * y + m[0][2]) as i32,
            (m[1][0] * x + m[1][1] * y + m[1][2]) as i32,
        )
    }

    /// The matrix as a 2×3 `CV_64F` `Mat` for `warp_affine`
    ///
    /// # Errors
    ///
    /// Returns an error if the `Mat` cannot be allocated.
    pub fn to_mat(&self) -> Result<Mat> {
        Ok(Mat::from_slice_2d(&self.matrix)?)
    }
}

/// Crop box from rotated landmark x-extent and forehead/chin y values.
///
/// Margins are truncated to whole pixels before being applied; the final
/// box is clamped to the frame.
///
/// # Errors
///
/// Returns `InvalidInput` when the clamped box is empty.
#[allow(clippy::cast_possible_truncation)]
pub fn face_bounds(
    rotated: &[Point],
    forehead_y: i32,
    chin_y: i32,
    width: i32,
    height: i32,
    margins: &CropMargins,
) -> Result<Rect> {
    let x_min = rotated.iter().map(|p| p.x).min();
    let x_max = rotated.iter().map(|p| p.x).max();
    let (Some(x_min), Some(x_max)) = (x_min, x_max) else {
        return Err(Error::InvalidInput("No landmarks to bound".to_string()));
    };

    let forehead_margin = (margins.forehead * f64::from(height)) as i32;
    let chin_margin = (margins.chin * f64::from(height)) as i32;
    let pad_x = (margins.padding * f64::from(width)) as i32;
    let pad_y = (margins.padding * f64::from(height)) as i32;

    let y_min = (forehead_y - forehead_margin).max(0);
    let y_max = (chin_y + chin_margin).min(height);

    let x_min = (x_min - pad_x).max(0);
    let x_max = (x_max + pad_x).min(width);
    let y_min = (y_min - pad_y).max(0);
    let y_max = (y_max + pad_y).min(height);

    if x_max <= x_min || y_max <= y_min {
        return Err(Error::InvalidInput(format!(
            "Degenerate face box x {x_min}..{x_max}, y {y_min}..{y_max}"
        )));
    }

    Ok(Rect::new(x_min, y_min, x_max - x_min, y_max - y_min))
}

/// Rotate `frame` so the eyes are level, crop the face and resize it to `crop_size` square.
///
/// # Errors
///
/// Returns `InvalidInput` for a degenerate box and `OpenCV` errors from warping or resizing.
pub fn align_and_crop(frame: &Mat, landmarks: &FaceLandmarks, margins: &CropMargins, crop_size: i32) -> Result<Mat> {
    let (width, height) = (frame.cols(), frame.rows());
    if width <= 0 || height <= 0 {
        return Err(Error::InvalidInput("Empty frame".to_string()));
    }

    let anchors = landmarks.anchors(width, height);
    let rotation = Rotation::level_eyes(anchors.left_eye, anchors.right_eye, width, height);
    trace!(
        "Levelling by {:.2} degrees, nose tip {:?} -> {:?}",
        rotation.angle_degrees(),
        anchors.nose_tip,
        rotation.apply(anchors.nose_tip)
    );

    let mut aligned = Mat::default();
    imgproc::warp_affine(
        frame,
        &mut aligned,
        &rotation.to_mat()?,
        Size::new(width, height),
        InterpolationFlags::INTER_LINEAR as i32,
        BORDER_CONSTANT,
        Scalar::default(),
    )?;

    let rotated: Vec<Point> = landmarks
        .pixels(width, height)
        .into_iter()
        .map(|p| rotation.apply(p))
        .collect();

    let bounds = face_bounds(&rotated, anchors.forehead_y, anchors.chin_y, width, height, margins)?;

    let crop = Mat::roi(&aligned, bounds)?;
    let mut resized = Mat::default();
    imgproc::resize(
        &crop,
        &mut resized,
        Size::new(crop_size, crop_size),
        0.0,
        0.0,
        InterpolationFlags::INTER_LINEAR as i32,
    )?;

    Ok(resized)
}
