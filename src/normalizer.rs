//! Per-frame face normalization: landmark detection, alignment and
//! near-duplicate rejection against the last accepted crop.

use crate::alignment::{align_and_crop, CropMargins};
use crate::constants::{DEFAULT_SIMILARITY_THRESHOLD, FACE_CROP_SIZE};
use crate::landmarks::LandmarkDetector;
use crate::similarity::structural_similarity;
use crate::utils::image_conversion::{to_bgr, to_gray};
use crate::video::RawFrame;
use crate::Result;
use log::{debug, info};
use opencv::core::Mat;
use opencv::prelude::*;

/// An aligned face crop of a fixed square size
#[derive(Debug)]
pub struct NormalizedFace {
    /// Position of the source frame in the video
    pub position: usize,
    /// Aligned color crop, `crop_size` × `crop_size`
    pub image: Mat,
    /// Grayscale version of `image`
    pub gray: Mat,
}

impl NormalizedFace {
    /// Build from a color crop, deriving the grayscale copy
    ///
    /// # Errors
    ///
    /// Returns an error if the grayscale conversion fails.
    pub fn from_crop(position: usize, image: Mat) -> Result<Self> {
        let gray = to_gray(&image)?;
        Ok(Self { position, image, gray })
    }

    /// Deep copy of both images
    ///
    /// # Errors
    ///
    /// Returns an error if `OpenCV` cannot allocate the copies.
    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            position: self.position,
            image: self.image.try_clone()?,
            gray: self.gray.try_clone()?,
        })
    }
}

/// What happened to one frame
#[derive(Debug)]
pub enum NormalizeOutcome {
    /// A new face crop was accepted
    Accepted(NormalizedFace),
    /// The crop was too similar to the previously accepted one
    Duplicate {
        /// Frame position
        position: usize,
        /// SSIM against the last accepted crop
        similarity: f64,
    },
    /// The landmark detector found no face
    NoFace,
}

/// Tunables of the normalizer
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizerSettings {
    pub margins: CropMargins,
    pub crop_size: i32,
    /// Crops with SSIM at or above this against the last accepted crop are rejected
    pub similarity_threshold: f64,
}

impl Default for NormalizerSettings {
    fn default() -> Self {
        Self {
            margins: CropMargins::default(),
            crop_size: FACE_CROP_SIZE,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
        }
    }
}

/// Stateful face normalizer for a single run.
///
/// Holds the grayscale crop of the last accepted face so consecutive
/// near-identical detections can be dropped. A fresh normalizer is built per
/// run; the first face it sees is always accepted.
pub struct FaceNormalizer<'a> {
    detector: &'a mut dyn LandmarkDetector,
    settings: NormalizerSettings,
    last_accepted: Option<Mat>,
    accepted: usize,
    duplicates: usize,
}

impl<'a> FaceNormalizer<'a> {
    pub fn new(detector: &'a mut dyn LandmarkDetector, settings: NormalizerSettings) -> Self {
        Self {
            detector,
            settings,
            last_accepted: None,
            accepted: 0,
            duplicates: 0,
        }
    }

    /// Crops accepted so far
    #[must_use]
    pub fn accepted(&self) -> usize {
        self.accepted
    }

    /// Crops rejected as near-duplicates so far
    #[must_use]
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    /// Normalize one frame.
    ///
    /// # Errors
    ///
    /// Landmark model failures are fatal; degenerate geometry surfaces as
    /// `InvalidInput` and `OpenCV` errors, which callers may treat as per-frame.
    pub fn normalize(&mut self, position: usize, frame: &Mat) -> Result<NormalizeOutcome> {
        // Crops are always BGR, whatever the source video decodes to
        let converted;
        let frame = if frame.channels() == 3 {
            frame
        } else {
            converted = to_bgr(frame)?;
            &converted
        };

        let Some(landmarks) = self.detector.detect(frame)? else {
            debug!("No face in frame {}", position);
            return Ok(NormalizeOutcome::NoFace);
        };

        let crop = align_and_crop(frame, &landmarks, &self.settings.margins, self.settings.crop_size)?;
        let face = NormalizedFace::from_crop(position, crop)?;

        if let Some(previous) = &self.last_accepted {
            let similarity = structural_similarity(previous, &face.gray)?;
            if similarity >= self.settings.similarity_threshold {
                debug!("Frame {} is a near-duplicate (SSIM {:.3})", position, similarity);
                self.duplicates += 1;
                return Ok(NormalizeOutcome::Duplicate { position, similarity });
            }
        }

        self.last_accepted = Some(face.gray.try_clone()?);
        self.accepted += 1;
        Ok(NormalizeOutcome::Accepted(face))
    }

    /// Normalize already sampled frames, keeping accepted crops in order.
    ///
    /// Frames without a face, duplicates, and per-frame geometry failures are
    /// dropped.
    ///
    /// # Errors
    ///
    /// Propagates fatal errors such as landmark model failures.
    pub fn normalize_all(
        &mut self,
        frames: &[RawFrame],
        on_progress: &mut dyn FnMut(usize, usize),
    ) -> Result<Vec<NormalizedFace>> {
        let mut faces = Vec::with_capacity(frames.len());
        for (done, frame) in frames.iter().enumerate() {
            match self.normalize(frame.position, &frame.image) {
                Ok(NormalizeOutcome::Accepted(face)) => faces.push(face),
                Ok(_) => {}
                Err(e) if e.is_per_frame() => debug!("Skipping frame {}: {}", frame.position, e),
                Err(e) => return Err(e),
            }
            on_progress(done + 1, frames.len());
        }
        info!(
            "Normalized {} of {} sampled frames ({} near-duplicates)",
            faces.len(),
            frames.len(),
            self.duplicates
        );
        Ok(faces)
    }
}
