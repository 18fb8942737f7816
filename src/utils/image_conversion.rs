//! Conversions between OpenCV `Mat`, `image` buffers and ndarray.

use crate::utils::safe_cast::{dimension_to_u32, u32_to_i32};
use crate::{Error, Result};
use image::RgbImage;
use ndarray::Array2;
use opencv::core::{Mat, Scalar, Vec3b, CV_8UC1, CV_8UC3};
use opencv::imgproc;
use opencv::prelude::*;

/// Convert a BGR, BGRA or grayscale 8-bit `Mat` to single-channel grayscale
///
/// # Errors
///
/// Returns an error for empty images or unsupported channel counts.
pub fn to_gray(mat: &Mat) -> Result<Mat> {
    let code = match mat.channels() {
        1 => return Ok(mat.try_clone()?),
        3 => imgproc::COLOR_BGR2GRAY,
        4 => imgproc::COLOR_BGRA2GRAY,
        n => return Err(Error::InvalidInput(format!("Unsupported channel count: {n}"))),
    };
    if mat.empty() {
        return Err(Error::InvalidInput("Cannot convert an empty image".to_string()));
    }
    let mut gray = Mat::default();
    imgproc::cvt_color(mat, &mut gray, code, 0)?;
    Ok(gray)
}

/// Convert a grayscale or BGRA 8-bit `Mat` to 3-channel BGR
///
/// # Errors
///
/// Returns an error for empty images or unsupported channel counts.
pub fn to_bgr(mat: &Mat) -> Result<Mat> {
    let code = match mat.channels() {
        3 => return Ok(mat.try_clone()?),
        1 => imgproc::COLOR_GRAY2BGR,
        4 => imgproc::COLOR_BGRA2BGR,
        n => return Err(Error::InvalidInput(format!("Unsupported channel count: {n}"))),
    };
    if mat.empty() {
        return Err(Error::InvalidInput("Cannot convert an empty image".to_string()));
    }
    let mut bgr = Mat::default();
    imgproc::cvt_color(mat, &mut bgr, code, 0)?;
    Ok(bgr)
}

/// Convert a BGR or grayscale `Mat` into an RGB `image` buffer
///
/// # Errors
///
/// Returns an error if pixel access fails or the channel count is unsupported.
pub fn mat_to_rgb_image(mat: &Mat) -> Result<RgbImage> {
    let bgr = to_bgr(mat)?;

    let mut out = RgbImage::new(dimension_to_u32(bgr.cols())?, dimension_to_u32(bgr.rows())?);
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let p = bgr.at_2d::<Vec3b>(u32_to_i32(y)?, u32_to_i32(x)?)?;
        *pixel = image::Rgb([p[2], p[1], p[0]]);
    }
    Ok(out)
}

/// Convert an RGB `image` buffer back into a BGR `Mat`
///
/// # Errors
///
/// Returns an error if the `Mat` cannot be allocated.
pub fn rgb_image_to_mat(img: &RgbImage) -> Result<Mat> {
    let (width, height) = img.dimensions();
    let mut mat = Mat::new_rows_cols_with_default(u32_to_i32(height)?, u32_to_i32(width)?, CV_8UC3, Scalar::all(0.0))?;
    for (x, y, pixel) in img.enumerate_pixels() {
        let [r, g, b] = pixel.0;
        *mat.at_2d_mut::<Vec3b>(u32_to_i32(y)?, u32_to_i32(x)?)? = Vec3b::from([b, g, r]);
    }
    Ok(mat)
}

/// Single-channel 8-bit `Mat` as an `f32` array of shape (rows, cols)
///
/// # Errors
///
/// Returns an error if the input is not single-channel 8-bit.
#[allow(clippy::cast_sign_loss)]
pub fn gray_mat_to_array(mat: &Mat) -> Result<Array2<f32>> {
    if mat.typ() != CV_8UC1 {
        return Err(Error::InvalidInput("Expected a single-channel 8-bit image".to_string()));
    }
    let (rows, cols) = (mat.rows(), mat.cols());
    let mut array = Array2::<f32>::zeros((rows as usize, cols as usize));
    for row in 0..rows {
        for col in 0..cols {
            array[[row as usize, col as usize]] = f32::from(*mat.at_2d::<u8>(row, col)?);
        }
    }
    Ok(array)
}
