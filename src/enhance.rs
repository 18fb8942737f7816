//! Optional face-crop enhancement.
//!
//! An enhancer upsamples a crop and brings it back to its original size with a
//! Lanczos filter, so downstream stages always see the same dimensions.
//! Failures are per-frame: the crop is dropped and the run continues.

use crate::normalizer::NormalizedFace;
use crate::onnx::OnnxModel;
use crate::utils::image_conversion::{mat_to_rgb_image, rgb_image_to_mat};
use crate::{Error, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;
use log::{debug, warn};
use ndarray::Array4;
use opencv::core::{Mat, Size, Vec3b};
use opencv::imgproc::{self, InterpolationFlags};
use opencv::prelude::*;
use ort::Environment;
use std::path::Path;
use std::sync::Arc;

/// Post-processor that returns a crop of the same pixel dimensions
pub trait FrameEnhancer: Send {
    /// Enhance one crop
    ///
    /// # Errors
    ///
    /// Returns `Enhancement` when the crop cannot be processed.
    fn enhance(&mut self, image: &Mat) -> Result<Mat>;
}

#[allow(clippy::cast_sign_loss)]
fn downsample_to(upscaled: &RgbImage, width: i32, height: i32) -> Result<Mat> {
    let resized = imageops::resize(upscaled, width as u32, height as u32, FilterType::Lanczos3);
    rgb_image_to_mat(&resized)
}

/// Super-resolution network (e.g. Real-ESRGAN ×2) exported to ONNX.
///
/// Input is NCHW RGB in `[0, 1]`; the output is expected in the same layout
/// at a larger size.
pub struct OnnxSuperResolution {
    model: OnnxModel,
}

impl OnnxSuperResolution {
    /// Load the super-resolution model
    ///
    /// # Errors
    ///
    /// Returns an error if the model cannot be loaded.
    pub fn new<P: AsRef<Path>>(environment: &Arc<Environment>, model_path: P) -> Result<Self> {
        Ok(Self {
            model: OnnxModel::load(environment, model_path, "enhancer")?,
        })
    }

    #[allow(clippy::cast_sign_loss)]
    fn preprocess(image: &Mat) -> Result<Array4<f32>> {
        let (rows, cols) = (image.rows() as usize, image.cols() as usize);
        let mut array = Array4::<f32>::zeros((1, 3, rows, cols));
        for row in 0..rows {
            for col in 0..cols {
                let pixel = image.at_2d::<Vec3b>(row as i32, col as i32)?;
                for ch in 0..3 {
                    array[[0, ch, row, col]] = f32::from(pixel[2 - ch]) / 255.0;
                }
            }
        }
        Ok(array)
    }
}

impl FrameEnhancer for OnnxSuperResolution {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn enhance(&mut self, image: &Mat) -> Result<Mat> {
        if image.channels() != 3 {
            return Err(Error::Enhancement(format!(
                "expected a 3-channel crop, got {}",
                image.channels()
            )));
        }
        let input = Self::preprocess(image)?;
        let outputs = self
            .model
            .run(input.into_dyn())
            .map_err(|e| Error::Enhancement(e.to_string()))?;
        let output = outputs
            .first()
            .ok_or_else(|| Error::Enhancement("enhancer produced no output".to_string()))?;

        let [1, 3, height, width] = output.shape[..] else {
            return Err(Error::Enhancement(format!("unexpected output shape {:?}", output.shape)));
        };
        if width == 0 || height == 0 {
            return Err(Error::Enhancement("enhancer produced an empty image".to_string()));
        }

        let plane = height * width;
        let upscaled = RgbImage::from_fn(width as u32, height as u32, |x, y| {
            let offset = y as usize * width + x as usize;
            let channel = |c: usize| (output.data[c * plane + offset].clamp(0.0, 1.0) * 255.0).round() as u8;
            image::Rgb([channel(0), channel(1), channel(2)])
        });

        downsample_to(&upscaled, image.cols(), image.rows())
    }
}

/// Model-free enhancer: bicubic upscale followed by a Lanczos downscale.
///
/// Mostly a smoothing pass; useful when no super-resolution model is available.
pub struct LanczosResampler {
    scale: i32,
}

impl LanczosResampler {
    #[must_use]
    pub fn new(scale: i32) -> Self {
        Self { scale: scale.max(1) }
    }
}

impl FrameEnhancer for LanczosResampler {
    fn enhance(&mut self, image: &Mat) -> Result<Mat> {
        let (cols, rows) = (image.cols(), image.rows());
        if cols <= 0 || rows <= 0 {
            return Err(Error::Enhancement("empty crop".to_string()));
        }
        let mut upscaled = Mat::default();
        imgproc::resize(
            image,
            &mut upscaled,
            Size::new(cols * self.scale, rows * self.scale),
            0.0,
            0.0,
            InterpolationFlags::INTER_CUBIC as i32,
        )
        .map_err(|e| Error::Enhancement(e.to_string()))?;

        let rgb = mat_to_rgb_image(&upscaled).map_err(|e| Error::Enhancement(e.to_string()))?;
        downsample_to(&rgb, cols, rows)
    }
}

/// Enhance every crop, dropping the ones that fail
pub fn enhance_faces(
    enhancer: &mut dyn FrameEnhancer,
    faces: Vec<NormalizedFace>,
    on_progress: &mut dyn FnMut(usize, usize),
) -> Vec<NormalizedFace> {
    let total = faces.len();
    let mut enhanced = Vec::with_capacity(total);

    for (done, face) in faces.into_iter().enumerate() {
        let position = face.position;
        match enhancer
            .enhance(&face.image)
            .and_then(|image| NormalizedFace::from_crop(position, image))
        {
            Ok(face) => enhanced.push(face),
            Err(e) => warn!("Enhancement failed for frame {}, skipping: {}", position, e),
        }
        on_progress(done + 1, total);
    }

    debug!("Enhanced {} of {} crops", enhanced.len(), total);
    enhanced
}
