//! Sequence aggregation: emotion histogram, confidence timeline and the
//! fixed-length feature sequence handed to the scorer.

use crate::constants::{APPROX_FPS, NUM_EMOTIONS};
use crate::emotion::Emotion;
use crate::video::linspace_indices;
use crate::{Error, Result};
use ndarray::{Array2, Array3, ArrayView1, Axis};

/// Column of the largest value, first one on ties
fn argmax(row: ArrayView1<'_, f32>) -> Option<(usize, f32)> {
    row.iter()
        .copied()
        .enumerate()
        .fold(None, |best, (i, v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
}

fn check_columns(probabilities: &Array2<f32>) -> Result<()> {
    if probabilities.ncols() == NUM_EMOTIONS {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "expected {NUM_EMOTIONS} emotion columns, got {}",
            probabilities.ncols()
        )))
    }
}

/// Share of frames in which one emotion was dominant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmotionShare {
    pub emotion: Emotion,
    /// Percentage of frames, 0–100
    pub percentage: f32,
}

/// Emotion histogram over a run.
///
/// Counts the arg-max emotion of every frame and reports each label's share
/// of all frames. Labels that never dominate are omitted; the reported
/// shares sum to 100.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EmotionSummary {
    shares: Vec<EmotionShare>,
}

impl EmotionSummary {
    /// Summarize per-frame probabilities of shape `(frames, 7)`
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the column count is not 7.
    #[allow(clippy::cast_precision_loss)]
    pub fn from_probabilities(probabilities: &Array2<f32>) -> Result<Self> {
        check_columns(probabilities)?;
        let mut counts = [0usize; NUM_EMOTIONS];
        for row in probabilities.outer_iter() {
            if let Some((index, _)) = argmax(row) {
                counts[index] += 1;
            }
        }

        let total = probabilities.nrows();
        let shares = Emotion::ALL
            .iter()
            .zip(counts)
            .filter(|(_, count)| *count > 0)
            .map(|(&emotion, count)| EmotionShare {
                emotion,
                percentage: count as f32 * 100.0 / total as f32,
            })
            .collect();
        Ok(Self { shares })
    }

    /// Non-zero shares in label order
    #[must_use]
    pub fn shares(&self) -> &[EmotionShare] {
        &self.shares
    }

    /// The most frequent emotion, earliest label on ties
    #[must_use]
    pub fn dominant(&self) -> Option<Emotion> {
        self.shares
            .iter()
            .fold(None::<&EmotionShare>, |best, s| match best {
                Some(b) if b.percentage >= s.percentage => Some(b),
                _ => Some(s),
            })
            .map(|s| s.emotion)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shares.is_empty()
    }
}

/// One timeline sample
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineSample {
    /// Position of the frame in the processed sequence
    pub frame_index: usize,
    /// Elapsed-time label, see [`ConfidenceTimeline`]
    pub time: String,
    pub emotion: Emotion,
    /// Probability of `emotion` as a percentage
    pub confidence: f32,
}

/// Dominant emotion at a handful of evenly spaced frames.
///
/// Time labels are synthesized from the frame index assuming a fixed frame
/// rate: `index / fps` is shown as the minutes field and
/// `(index % fps) * 2` as the seconds field. They are an approximation for
/// display, not real timestamps.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConfidenceTimeline {
    samples: Vec<TimelineSample>,
}

impl ConfidenceTimeline {
    /// Sample at most `max_samples` frames with stride `max(frames / max_samples, 1)`
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the column count is not 7.
    pub fn from_probabilities(probabilities: &Array2<f32>, max_samples: usize, fps: usize) -> Result<Self> {
        check_columns(probabilities)?;
        let frames = probabilities.nrows();
        let max_samples = max_samples.max(1);
        let fps = if fps == 0 { APPROX_FPS } else { fps };
        let stride = (frames / max_samples).max(1);

        let samples = (0..frames)
            .step_by(stride)
            .take(max_samples)
            .filter_map(|index| {
                let (column, probability) = argmax(probabilities.row(index))?;
                Some(TimelineSample {
                    frame_index: index,
                    time: time_label(index, fps),
                    emotion: Emotion::from_index(column)?,
                    confidence: probability * 100.0,
                })
            })
            .collect();
        Ok(Self { samples })
    }

    #[must_use]
    pub fn samples(&self) -> &[TimelineSample] {
        &self.samples
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// `m:ss` label for a frame index
#[must_use]
pub fn time_label(index: usize, fps: usize) -> String {
    let fps = fps.max(1);
    format!("{}:{:02}", index / fps, (index % fps) * 2)
}

/// Ordered per-frame feature vectors, one row per frame
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSequence {
    rows: Array2<f32>,
}

impl FeatureSequence {
    /// Concatenate per-chunk feature matrices in order.
    ///
    /// # Errors
    ///
    /// Returns `ModelInference` if chunks disagree on the feature length, and
    /// `InvalidInput` if there are no rows at all.
    pub fn assemble(chunks: &[Array2<f32>]) -> Result<Self> {
        let Some(first) = chunks.iter().find(|c| c.nrows() > 0) else {
            return Err(Error::InvalidInput("no feature rows to assemble".to_string()));
        };
        let dim = first.ncols();
        if let Some(bad) = chunks.iter().find(|c| c.nrows() > 0 && c.ncols() != dim) {
            return Err(Error::inference(format!(
                "feature length changed within a run: {dim} vs {}",
                bad.ncols()
            )));
        }

        let views: Vec<_> = chunks.iter().filter(|c| c.nrows() > 0).map(Array2::view).collect();
        let rows = ndarray::concatenate(Axis(0), &views).map_err(Error::inference)?;
        Ok(Self { rows })
    }

    /// Number of frames
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.nrows()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.nrows() == 0
    }

    /// Length of each feature vector
    #[must_use]
    pub fn feature_dim(&self) -> usize {
        self.rows.ncols()
    }

    #[must_use]
    pub fn rows(&self) -> &Array2<f32> {
        &self.rows
    }

    /// Evenly spaced resample to exactly `target` rows, first and last kept.
    ///
    /// Returns `self` unchanged when the length already matches.
    #[must_use]
    pub fn resample(self, target: usize) -> Self {
        if self.len() == target {
            return self;
        }
        let indices = linspace_indices(self.len(), target);
        Self {
            rows: self.rows.select(Axis(0), &indices),
        }
    }

    /// The sequence as a single-item batch `(1, frames, feature_dim)`
    #[must_use]
    pub fn to_batch(&self) -> Array3<f32> {
        self.rows.clone().insert_axis(Axis(0))
    }
}
