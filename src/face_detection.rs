use crate::constants::{IMAGE_NORMALIZATION_OFFSET, IMAGE_NORMALIZATION_SCALE};
use crate::onnx::OnnxModel;
use crate::utils::image_conversion::to_bgr;
use crate::{Error, Result};
use ndarray::Array4;
use opencv::core::{Mat, Rect, Scalar, Size, Vec3b, CV_8UC3};
use opencv::imgproc::{self, InterpolationFlags};
use opencv::prelude::*;
use ort::Environment;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// A located face in frame coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct FaceBox {
    /// Bounding box of the detected face
    pub bbox: Rect,
    /// Confidence score of the detection
    pub score: f32,
}

/// Anchor layout implied by the number of model outputs
#[derive(Debug, Clone)]
struct AnchorLayout {
    strides: Vec<i32>,
    anchors_per_cell: usize,
}

impl AnchorLayout {
    fn for_outputs(num_outputs: usize) -> Self {
        match num_outputs {
            10 | 15 => Self {
                strides: vec![8, 16, 32, 64, 128],
                anchors_per_cell: 1,
            },
            6 | 9 => Self {
                strides: vec![8, 16, 32],
                anchors_per_cell: 2,
            },
            n => {
                log::warn!("Unknown SCRFD layout with {} outputs, assuming 3 strides", n);
                Self {
                    strides: vec![8, 16, 32],
                    anchors_per_cell: 2,
                }
            }
        }
    }
}

/// SCRFD face detector used to locate the face before landmarking
pub struct FaceDetector {
    model: OnnxModel,
    input_size: (i32, i32),
    conf_threshold: f32,
    nms_threshold: f32,
    layout: AnchorLayout,
    center_cache: HashMap<(i32, i32, i32), Vec<(f32, f32)>>,
}

impl FaceDetector {
    /// Load an SCRFD model
    ///
    /// # Errors
    ///
    /// Returns an error if the model cannot be loaded.
    pub fn new<P: AsRef<Path>>(
        environment: &Arc<Environment>,
        model_path: P,
        conf_threshold: f32,
        nms_threshold: f32,
    ) -> Result<Self> {
        let model = OnnxModel::load(environment, model_path, "face detector")?;

        // [batch, channels, height, width]
        let dims = model.input_dimensions();
        let input_size = if dims.len() >= 4 {
            let height = dims[2].map_or(640, |d| d as i32);
            let width = dims[3].map_or(640, |d| d as i32);
            (width, height)
        } else {
            (640, 640)
        };

        let layout = AnchorLayout::for_outputs(model.output_names().len());

        Ok(Self {
            model,
            input_size,
            conf_threshold,
            nms_threshold,
            layout,
            center_cache: HashMap::new(),
        })
    }

    /// Detect faces, highest score first
    ///
    /// # Errors
    ///
    /// Returns an error if preprocessing or inference fails.
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn detect(&mut self, image: &Mat) -> Result<Vec<FaceBox>> {
        // The letterbox canvas is BGR; a 1-channel copy into it would leave it black
        let converted;
        let image = if image.channels() == 3 {
            image
        } else {
            converted = to_bgr(image)?;
            &converted
        };

        let (input_width, input_height) = self.input_size;
        let img_ratio = image.rows() as f32 / image.cols() as f32;
        let model_ratio = input_height as f32 / input_width as f32;

        let (new_width, new_height) = if img_ratio > model_ratio {
            ((input_height as f32 / img_ratio) as i32, input_height)
        } else {
            (input_width, (input_width as f32 * img_ratio) as i32)
        };
        if new_width <= 0 || new_height <= 0 {
            return Err(Error::InvalidInput(format!(
                "Frame {}x{} too small for detection",
                image.cols(),
                image.rows()
            )));
        }
        let det_scale = new_height as f32 / image.rows() as f32;

        let mut resized = Mat::default();
        imgproc::resize(
            image,
            &mut resized,
            Size::new(new_width, new_height),
            0.0,
            0.0,
            InterpolationFlags::INTER_LINEAR as i32,
        )?;

        // Letterbox into the top-left corner of the model canvas
        let mut canvas = Mat::new_rows_cols_with_default(input_height, input_width, CV_8UC3, Scalar::all(0.0))?;
        let mut roi = canvas.roi_mut(Rect::new(0, 0, new_width, new_height))?;
        resized.copy_to(&mut roi)?;

        let input = Self::preprocess(&canvas)?;
        let outputs = self.model.run(input.into_dyn())?;

        let strides = self.layout.strides.clone();
        let offset = strides.len();
        if outputs.len() < offset * 2 {
            return Err(Error::inference(format!(
                "face detector returned {} outputs, expected at least {}",
                outputs.len(),
                offset * 2
            )));
        }

        let mut candidates: Vec<([f32; 4], f32)> = Vec::new();
        for (idx, &stride) in strides.iter().enumerate() {
            let scores = &outputs[idx].data;
            let distances = &outputs[idx + offset].data;
            let centers = self.anchor_centers(input_height / stride, input_width / stride, stride);

            for (i, &score) in scores.iter().enumerate() {
                if score < self.conf_threshold || i >= centers.len() || (i + 1) * 4 > distances.len() {
                    continue;
                }
                let (cx, cy) = centers[i];
                let d = &distances[i * 4..i * 4 + 4];
                let s = stride as f32;
                let bbox = [
                    (cx - d[0] * s) / det_scale,
                    (cy - d[1] * s) / det_scale,
                    (cx + d[2] * s) / det_scale,
                    (cy + d[3] * s) / det_scale,
                ];
                candidates.push((bbox, score));
            }
        }

        candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let kept = non_max_suppression(&candidates, self.nms_threshold);

        Ok(kept
            .into_iter()
            .map(|(b, score)| FaceBox {
                bbox: Rect::new(b[0] as i32, b[1] as i32, (b[2] - b[0]) as i32, (b[3] - b[1]) as i32),
                score,
            })
            .collect())
    }

    /// BGR canvas to normalized NCHW RGB
    fn preprocess(canvas: &Mat) -> Result<Array4<f32>> {
        let height = canvas.rows() as usize;
        let width = canvas.cols() as usize;
        let mut array = Array4::<f32>::zeros((1, 3, height, width));
        for row in 0..height {
            for col in 0..width {
                let pixel = canvas.at_2d::<Vec3b>(row as i32, col as i32)?;
                for ch in 0..3 {
                    // BGR -> RGB
                    let value = f32::from(pixel[2 - ch]);
                    array[[0, ch, row, col]] = (value - IMAGE_NORMALIZATION_OFFSET) / IMAGE_NORMALIZATION_SCALE;
                }
            }
        }
        Ok(array)
    }

    /// Anchor centers for one stride level, cached per feature map size
    fn anchor_centers(&mut self, height: i32, width: i32, stride: i32) -> Vec<(f32, f32)> {
        let per_cell = self.layout.anchors_per_cell;
        self.center_cache
            .entry((height, width, stride))
            .or_insert_with(|| {
                let mut centers = Vec::with_capacity((height * width) as usize * per_cell);
                for y in 0..height {
                    for x in 0..width {
                        for _ in 0..per_cell {
                            centers.push(((x * stride) as f32, (y * stride) as f32));
                        }
                    }
                }
                centers
            })
            .clone()
    }
}

/// Greedy NMS over score-sorted boxes in `[x1, y1, x2, y2]` form
fn non_max_suppression(sorted: &[([f32; 4], f32)], iou_threshold: f32) -> Vec<([f32; 4], f32)> {
    let mut kept: Vec<([f32; 4], f32)> = Vec::new();
    for candidate in sorted {
        if kept.iter().all(|k| iou(&k.0, &candidate.0) <= iou_threshold) {
            kept.push(*candidate);
        }
    }
    kept
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let area = |r: &[f32; 4]| (r[2] - r[0] + 1.0) * (r[3] - r[1] + 1.0);
    let w = (a[2].min(b[2]) - a[0].max(b[0]) + 1.0).max(0.0);
    let h = (a[3].min(b[3]) - a[1].max(b[1]) + 1.0).max(0.0);
    let inter = w * h;
    inter / (area(a) + area(b) - inter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_from_outputs() {
        assert_eq!(AnchorLayout::for_outputs(9).strides, vec![8, 16, 32]);
        assert_eq!(AnchorLayout::for_outputs(9).anchors_per_cell, 2);
        assert_eq!(AnchorLayout::for_outputs(15).strides.len(), 5);
        assert_eq!(AnchorLayout::for_outputs(15).anchors_per_cell, 1);
    }

    #[test]
    fn test_nms_suppresses_overlaps() {
        let boxes = vec![
            ([10.0, 10.0, 60.0, 60.0], 0.95),
            ([12.0, 12.0, 62.0, 62.0], 0.90),
            ([200.0, 200.0, 240.0, 240.0], 0.80),
        ];
        let kept = non_max_suppression(&boxes, 0.5);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].1, 0.95);
        assert_eq!(kept[1].1, 0.80);
    }

    #[test]
    fn test_iou_disjoint_and_identical() {
        let a = [0.0, 0.0, 9.0, 9.0];
        let b = [50.0, 50.0, 59.0, 59.0];
        assert_eq!(iou(&a, &b), 0.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }
}
