//! Frame sampling: turning an arbitrary-length video into a fixed-length frame set.
//!
//! Three policies are supported:
//! - [`SamplingPolicy::UniformStride`] picks every `floor(total / N)`-th frame and
//!   requires the video to hold at least `N` frames.
//! - [`SamplingPolicy::DetectedFace`] scans the whole video through the face
//!   normalizer and resamples the accepted crops to exactly `N`.
//! - [`SamplingPolicy::Leading`] takes the first `N` frames, repeating the last
//!   one when the video is shorter.

use crate::normalizer::{FaceNormalizer, NormalizeOutcome, NormalizedFace};
use crate::{Error, Result};
use log::{debug, info, warn};
use opencv::core::Mat;
use opencv::prelude::*;
use opencv::videoio::{self, VideoCapture, CAP_PROP_FRAME_COUNT, CAP_PROP_FPS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// How the pipeline turns a video into `N` frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingPolicy {
    /// Every `floor(total / N)`-th frame; fails on short videos
    UniformStride,
    /// Every frame with an accepted face, resampled to `N`
    DetectedFace,
    /// The first `N` frames, padded with the last frame
    Leading,
}

impl FromStr for SamplingPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "uniform" | "uniform_stride" => Ok(Self::UniformStride),
            "detected" | "detected_face" | "face" => Ok(Self::DetectedFace),
            "leading" | "first" => Ok(Self::Leading),
            _ => Err(Error::ConfigError(format!("Unknown sampling policy: {s}"))),
        }
    }
}

/// A decoded video frame and its position in the source
#[derive(Debug)]
pub struct RawFrame {
    /// Zero-based frame index in the video
    pub position: usize,
    /// Decoded BGR or grayscale image at native resolution
    pub image: Mat,
}

/// Result of a sampling pass.
///
/// "Too short" and "no face" are ordinary outcomes here; the pipeline decides
/// how each one surfaces to its caller.
#[derive(Debug)]
pub enum SampleOutcome<T> {
    /// Sampling produced frames
    Frames(Vec<T>),
    /// The video holds fewer frames than the policy requires
    TooShort {
        /// Frames available
        available: usize,
        /// Frames required
        required: usize,
    },
    /// No frame yielded an accepted face crop
    NoFace {
        /// Frames inspected
        frames_scanned: usize,
    },
}

impl<T> SampleOutcome<T> {
    /// Convert the failure variants into their error counterparts
    ///
    /// # Errors
    ///
    /// Returns `InsufficientFrames` or `NoFaceDetected` for the matching variants.
    pub fn into_result(self) -> Result<Vec<T>> {
        match self {
            Self::Frames(frames) => Ok(frames),
            Self::TooShort { available, required } => Err(Error::InsufficientFrames { available, required }),
            Self::NoFace { frames_scanned } => Err(Error::NoFaceDetected { frames_scanned }),
        }
    }
}

/// Sequential source of decoded frames
pub trait FrameSource {
    /// Total frames the source reports
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot report a count.
    fn frame_count(&self) -> Result<usize>;

    /// Decode the next frame, `Ok(None)` at end of stream
    ///
    /// # Errors
    ///
    /// Returns an error if the frame at the current position cannot be decoded.
    fn next_frame(&mut self) -> Result<Option<Mat>>;
}

/// Video file opened through `OpenCV`'s `videoio`.
///
/// The capture is released when the source is dropped, so every exit path of
/// a sampling pass gives the decoder back.
pub struct VideoFileSource {
    capture: VideoCapture,
    path: PathBuf,
}

impl VideoFileSource {
    /// Open a video file for decoding
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist or the decoder cannot open it.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::InvalidInput(format!(
                "Failed to open video file: {} does not exist",
                path.display()
            )));
        }
        let path_str = path
            .to_str()
            .ok_or_else(|| Error::InvalidInput(format!("Non UTF-8 video path: {}", path.display())))?;

        info!("Opening video file: {}", path.display());
        let capture = VideoCapture::from_file(path_str, videoio::CAP_ANY)?;
        if !capture.is_opened()? {
            return Err(Error::InvalidInput(format!(
                "Failed to open video file: {}",
                path.display()
            )));
        }

        Ok(Self {
            capture,
            path: path.to_path_buf(),
        })
    }

    /// Frame rate reported by the container
    ///
    /// # Errors
    ///
    /// Returns an error if the property query fails.
    pub fn fps(&self) -> Result<f64> {
        Ok(self.capture.get(CAP_PROP_FPS)?)
    }
}

impl FrameSource for VideoFileSource {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn frame_count(&self) -> Result<usize> {
        let count = self.capture.get(CAP_PROP_FRAME_COUNT)?;
        if count.is_finite() && count > 0.0 {
            Ok(count as usize)
        } else {
            Ok(0)
        }
    }

    fn next_frame(&mut self) -> Result<Option<Mat>> {
        let mut frame = Mat::default();
        if self.capture.read(&mut frame)? && !frame.empty() {
            Ok(Some(frame))
        } else {
            Ok(None)
        }
    }
}

impl Drop for VideoFileSource {
    fn drop(&mut self) {
        if let Err(e) = self.capture.release() {
            warn!("Failed to release video {}: {}", self.path.display(), e);
        } else {
            debug!("Released video {}", self.path.display());
        }
    }
}

/// Positions `i * floor(total / n)` for `i` in `0..n`
///
/// Returns `None` when `total < n` or `n == 0`.
#[must_use]
pub fn uniform_positions(total: usize, n: usize) -> Option<Vec<usize>> {
    if n == 0 || total < n {
        return None;
    }
    let stride = total / n;
    Some((0..n).map(|i| i * stride).collect())
}

/// Evenly spaced indices into `0..len`, `n` of them, first and last inclusive.
///
/// Same values as `numpy.linspace(0, len - 1, n).astype(int)`: each index is
/// `i * step` in `f64`, truncated, with the last one pinned to `len - 1`.
/// Indices repeat when `n > len` and skip when `n < len`.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss, clippy::cast_sign_loss)]
pub fn linspace_indices(len: usize, n: usize) -> Vec<usize> {
    match (len, n) {
        (0, _) | (_, 0) => Vec::new(),
        (_, 1) => vec![0],
        _ => {
            let step = (len - 1) as f64 / (n - 1) as f64;
            (0..n)
                .map(|i| if i == n - 1 { len - 1 } else { (i as f64 * step) as usize })
                .collect()
        }
    }
}

/// Pick items at `indices`, cloning the images when an index repeats
fn select_faces(faces: &[NormalizedFace], indices: &[usize]) -> Result<Vec<NormalizedFace>> {
    indices.iter().map(|&i| faces[i].try_clone()).collect()
}

/// Extracts a fixed number of frames from a [`FrameSource`]
#[derive(Debug, Clone)]
pub struct FrameSampler {
    target_frames: usize,
    max_consecutive_failures: usize,
}

impl FrameSampler {
    /// Create a sampler producing `target_frames` frames
    #[must_use]
    pub fn new(target_frames: usize, max_consecutive_failures: usize) -> Self {
        Self {
            target_frames,
            max_consecutive_failures: max_consecutive_failures.max(1),
        }
    }

    /// Uniform-stride sampling.
    ///
    /// Reads sequentially up to the last selected position; a frame that
    /// cannot be decoded before that point aborts the pass.
    ///
    /// # Errors
    ///
    /// Returns `FrameDecode` when a selected position cannot be read.
    pub fn sample_uniform(
        &self,
        source: &mut dyn FrameSource,
        on_progress: &mut dyn FnMut(usize, usize),
    ) -> Result<SampleOutcome<RawFrame>> {
        let total = source.frame_count()?;
        let Some(positions) = uniform_positions(total, self.target_frames) else {
            info!(
                "Video too short for uniform sampling: {} frames, {} required",
                total, self.target_frames
            );
            return Ok(SampleOutcome::TooShort {
                available: total,
                required: self.target_frames,
            });
        };
        let stride = total / self.target_frames;
        debug!("Uniform sampling {} of {} frames, stride {}", positions.len(), total, stride);

        let mut frames = Vec::with_capacity(positions.len());
        let mut wanted = positions.iter().copied().peekable();
        let mut position = 0;

        while let Some(&next) = wanted.peek() {
            let frame = source
                .next_frame()
                .map_err(|_| Error::FrameDecode { position })?
                .ok_or(Error::FrameDecode { position })?;
            if position == next {
                frames.push(RawFrame { position, image: frame });
                wanted.next();
                on_progress(frames.len(), self.target_frames);
            }
            position += 1;
        }

        Ok(SampleOutcome::Frames(frames))
    }

    /// Leading-frames sampling: the first `N` frames, padded with the last one.
    ///
    /// # Errors
    ///
    /// Returns an error if cloning a padding frame fails.
    pub fn sample_leading(
        &self,
        source: &mut dyn FrameSource,
        on_progress: &mut dyn FnMut(usize, usize),
    ) -> Result<SampleOutcome<RawFrame>> {
        let mut frames: Vec<RawFrame> = Vec::with_capacity(self.target_frames);
        while frames.len() < self.target_frames {
            match source.next_frame() {
                Ok(Some(image)) => {
                    frames.push(RawFrame {
                        position: frames.len(),
                        image,
                    });
                    on_progress(frames.len(), self.target_frames);
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Stopping leading sampling at frame {}: {}", frames.len(), e);
                    break;
                }
            }
        }

        let Some(last) = frames.last() else {
            return Ok(SampleOutcome::TooShort {
                available: 0,
                required: self.target_frames,
            });
        };

        let decoded = frames.len();
        if decoded < self.target_frames {
            debug!("Padding {} decoded frames to {}", decoded, self.target_frames);
            let position = last.position;
            let image = last.image.try_clone()?;
            for _ in decoded..self.target_frames {
                frames.push(RawFrame {
                    position,
                    image: image.try_clone()?,
                });
            }
        }

        Ok(SampleOutcome::Frames(frames))
    }

    /// Detected-face sampling.
    ///
    /// Every decodable frame goes through `normalizer`; the accepted crops are
    /// resampled to exactly `N`. Decode misses and per-frame normalization
    /// failures are skipped; a run of `max_consecutive_failures` decode errors
    /// ends the scan.
    ///
    /// # Errors
    ///
    /// Propagates fatal normalizer errors such as landmark model failures.
    pub fn sample_detected(
        &self,
        source: &mut dyn FrameSource,
        normalizer: &mut FaceNormalizer<'_>,
        on_progress: &mut dyn FnMut(usize, usize),
    ) -> Result<SampleOutcome<NormalizedFace>> {
        let reported = source.frame_count().unwrap_or(0);
        let mut faces = Vec::new();
        let mut position = 0;
        let mut consecutive_failures = 0;
        let mut duplicates = 0;

        loop {
            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    consecutive_failures += 1;
                    warn!("Skipping undecodable frame {}: {}", position, e);
                    position += 1;
                    if consecutive_failures >= self.max_consecutive_failures {
                        warn!("Giving up after {} consecutive decode failures", consecutive_failures);
                        break;
                    }
                    continue;
                }
            };
            consecutive_failures = 0;

            match normalizer.normalize(position, &frame) {
                Ok(NormalizeOutcome::Accepted(face)) => faces.push(face),
                Ok(NormalizeOutcome::Duplicate { .. }) => duplicates += 1,
                Ok(NormalizeOutcome::NoFace) => {}
                Err(e) if e.is_per_frame() => debug!("Skipping frame {}: {}", position, e),
                Err(e) => return Err(e),
            }

            position += 1;
            on_progress(position, reported.max(position));
        }

        info!(
            "Scanned {} frames: {} faces accepted, {} near-duplicates rejected",
            position,
            faces.len(),
            duplicates
        );

        if faces.is_empty() {
            return Ok(SampleOutcome::NoFace {
                frames_scanned: position,
            });
        }

        let indices = linspace_indices(faces.len(), self.target_frames);
        Ok(SampleOutcome::Frames(select_faces(&faces, &indices)?))
    }
}
