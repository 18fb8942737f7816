//! Structural similarity between two grayscale face crops.
//!
//! Computed the way scikit-image's `structural_similarity` does by default:
//! a 7×7 uniform window, `K1 = 0.01`, `K2 = 0.03`, sample covariance
//! (`N / (N - 1)`), reflected borders, and the mean taken over the interior
//! that excludes the half-window border.

use crate::constants::{SSIM_DATA_RANGE, SSIM_K1, SSIM_K2, SSIM_WINDOW};
use crate::utils::image_conversion::to_gray;
use crate::{Error, Result};
use opencv::core::{self, Mat, Point, Size, BORDER_REFLECT, CV_64F};
use opencv::imgproc;
use opencv::prelude::*;

fn to_f64(mat: &Mat) -> Result<Mat> {
    let mut out = Mat::default();
    mat.convert_to(&mut out, CV_64F, 1.0, 0.0)?;
    Ok(out)
}

fn local_mean(mat: &Mat) -> Result<Mat> {
    let mut out = Mat::default();
    imgproc::blur(
        mat,
        &mut out,
        Size::new(SSIM_WINDOW, SSIM_WINDOW),
        Point::new(-1, -1),
        BORDER_REFLECT,
    )?;
    Ok(out)
}

fn product(a: &Mat, b: &Mat) -> Result<Mat> {
    let mut out = Mat::default();
    core::multiply(a, b, &mut out, 1.0, -1)?;
    Ok(out)
}

/// Mean SSIM of two equally sized images, converted to grayscale first.
///
/// Identical images score `1.0`; unrelated images score near `0`.
///
/// # Errors
///
/// Returns `InvalidInput` if the sizes differ or either side is smaller than the window.
#[allow(clippy::cast_precision_loss)]
pub fn structural_similarity(a: &Mat, b: &Mat) -> Result<f64> {
    if a.rows() != b.rows() || a.cols() != b.cols() {
        return Err(Error::InvalidInput(format!(
            "SSIM inputs differ in size: {}x{} vs {}x{}",
            a.cols(),
            a.rows(),
            b.cols(),
            b.rows()
        )));
    }
    if a.rows() < SSIM_WINDOW || a.cols() < SSIM_WINDOW {
        return Err(Error::InvalidInput(format!(
            "SSIM inputs must be at least {SSIM_WINDOW}x{SSIM_WINDOW}"
        )));
    }

    let x = to_f64(&to_gray(a)?)?;
    let y = to_f64(&to_gray(b)?)?;

    let ux = local_mean(&x)?;
    let uy = local_mean(&y)?;
    let uxx = local_mean(&product(&x, &x)?)?;
    let uyy = local_mean(&product(&y, &y)?)?;
    let uxy = local_mean(&product(&x, &y)?)?;

    let np = f64::from(SSIM_WINDOW * SSIM_WINDOW);
    let cov_norm = np / (np - 1.0);
    let c1 = (SSIM_K1 * SSIM_DATA_RANGE).powi(2);
    let c2 = (SSIM_K2 * SSIM_DATA_RANGE).powi(2);

    let pad = (SSIM_WINDOW - 1) / 2;
    let mut total = 0.0;
    let mut count = 0usize;
    for row in pad..x.rows() - pad {
        for col in pad..x.cols() - pad {
            let mx = *ux.at_2d::<f64>(row, col)?;
            let my = *uy.at_2d::<f64>(row, col)?;
            let vx = cov_norm * (*uxx.at_2d::<f64>(row, col)? - mx * mx);
            let vy = cov_norm * (*uyy.at_2d::<f64>(row, col)? - my * my);
            let vxy = cov_norm * (*uxy.at_2d::<f64>(row, col)? - mx * my);

            let numerator = (2.0 * mx * my + c1) * (2.0 * vxy + c2);
            let denominator = (mx * mx + my * my + c1) * (vx + vy + c2);
            total += numerator / denominator;
            count += 1;
        }
    }

    Ok(total / count as f64)
}
