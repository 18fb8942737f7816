//! Loading of precomputed numeric arrays stored as `.npy` files.
//!
//! The classifier's per-pixel training mean/std and the prototype scorer's
//! reference embeddings are shipped as NumPy arrays. Only little-endian
//! `float32`/`float64` arrays in C order are accepted.

use crate::{Error, Result};
use ndarray::{ArrayD, IxDyn};
use std::path::Path;

const NPY_MAGIC: &[u8] = b"\x93NUMPY";

/// Element type declared in an `.npy` header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dtype {
    F32,
    F64,
}

impl Dtype {
    fn width(self) -> usize {
        match self {
            Self::F32 => 4,
            Self::F64 => 8,
        }
    }
}

/// Read an `.npy` file into an `f32` array of the stored shape.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not a supported `.npy` array.
pub fn load_npy<P: AsRef<Path>>(path: P) -> Result<ArrayD<f32>> {
    let path = path.as_ref();
    log::debug!("Loading array from {}", path.display());
    let bytes = std::fs::read(path)?;
    parse_npy(&bytes).map_err(|e| match e {
        Error::InvalidInput(msg) => Error::ConfigError(format!("{}: {msg}", path.display())),
        other => other,
    })
}

/// Parse the bytes of an `.npy` file.
///
/// # Errors
///
/// Returns `InvalidInput` for malformed headers, unsupported dtypes, Fortran
/// ordering, or a payload whose length disagrees with the declared shape.
pub fn parse_npy(bytes: &[u8]) -> Result<ArrayD<f32>> {
    if bytes.len() < 10 || &bytes[..6] != NPY_MAGIC {
        return Err(Error::InvalidInput("not an .npy file".to_string()));
    }

    let major = bytes[6];
    let (header_len, header_start) = match major {
        1 => (usize::from(u16::from_le_bytes([bytes[8], bytes[9]])), 10),
        2 | 3 => {
            if bytes.len() < 12 {
                return Err(Error::InvalidInput("truncated .npy header".to_string()));
            }
            let len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
            (len as usize, 12)
        }
        v => return Err(Error::InvalidInput(format!("unsupported .npy version {v}"))),
    };

    let data_start = header_start + header_len;
    let header = bytes
        .get(header_start..data_start)
        .ok_or_else(|| Error::InvalidInput("truncated .npy header".to_string()))?;
    let header = std::str::from_utf8(header)
        .map_err(|_| Error::InvalidInput("non-ASCII .npy header".to_string()))?;

    let dtype = parse_descr(header)?;
    if header_value(header, "fortran_order")?.starts_with("True") {
        return Err(Error::InvalidInput("Fortran-ordered arrays are not supported".to_string()));
    }
    let shape = parse_shape(header)?;

    let count: usize = shape.iter().product();
    let payload = &bytes[data_start..];
    if payload.len() != count * dtype.width() {
        return Err(Error::InvalidInput(format!(
            "payload has {} bytes, shape {:?} needs {}",
            payload.len(),
            shape,
            count * dtype.width()
        )));
    }

    #[allow(clippy::cast_possible_truncation)] // stored statistics fit in f32
    let data: Vec<f32> = match dtype {
        Dtype::F32 => payload
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
        Dtype::F64 => payload
            .chunks_exact(8)
            .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]) as f32)
            .collect(),
    };

    ArrayD::from_shape_vec(IxDyn(&shape), data)
        .map_err(|e| Error::InvalidInput(format!("Failed to shape array: {e}")))
}

/// Text following `'key':` in the header dict
fn header_value<'a>(header: &'a str, key: &str) -> Result<&'a str> {
    let needle = format!("'{key}':");
    let start = header
        .find(&needle)
        .ok_or_else(|| Error::InvalidInput(format!("missing '{key}' in .npy header")))?;
    Ok(header[start + needle.len()..].trim_start())
}

fn parse_descr(header: &str) -> Result<Dtype> {
    let value = header_value(header, "descr")?;
    let descr = value
        .trim_start_matches('\'')
        .split('\'')
        .next()
        .unwrap_or_default();
    match descr {
        "<f4" => Ok(Dtype::F32),
        "<f8" => Ok(Dtype::F64),
        other => Err(Error::InvalidInput(format!("unsupported dtype {other}"))),
    }
}

fn parse_shape(header: &str) -> Result<Vec<usize>> {
    let value = header_value(header, "shape")?;
    let open = value
        .find('(')
        .ok_or_else(|| Error::InvalidInput("malformed shape".to_string()))?;
    let close = value
        .find(')')
        .ok_or_else(|| Error::InvalidInput("malformed shape".to_string()))?;
    value[open + 1..close]
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<usize>()
                .map_err(|_| Error::InvalidInput(format!("bad shape dimension '{s}'")))
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Serialize `values` as a version 1.0 `.npy` file of `shape`
    pub(crate) fn npy_bytes(shape: &[usize], values: &[f32]) -> Vec<u8> {
        let dims: Vec<String> = shape.iter().map(ToString::to_string).collect();
        let shape_str = if dims.len() == 1 {
            format!("({},)", dims[0])
        } else {
            format!("({})", dims.join(", "))
        };
        let mut header = format!("{{'descr': '<f4', 'fortran_order': False, 'shape': {shape_str}, }}");
        while (10 + header.len() + 1) % 64 != 0 {
            header.push(' ');
        }
        header.push('\n');

        let mut out = Vec::new();
        out.extend_from_slice(NPY_MAGIC);
        out.extend_from_slice(&[1, 0]);
        out.extend_from_slice(&u16::try_from(header.len()).unwrap().to_le_bytes());
        out.extend_from_slice(header.as_bytes());
        for v in values {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    #[test]
    fn test_parse_three_dimensional() {
        let values: Vec<f32> = (0..12).map(|v| v as f32 * 0.5).collect();
        let array = parse_npy(&npy_bytes(&[2, 3, 2], &values)).unwrap();
        assert_eq!(array.shape(), &[2, 3, 2]);
        assert_eq!(array[[1, 2, 1]], 5.5);
    }

    #[test]
    fn test_parse_vector() {
        let array = parse_npy(&npy_bytes(&[4], &[1.0, 2.0, 3.0, 4.0])).unwrap();
        assert_eq!(array.shape(), &[4]);
    }

    #[test]
    fn test_rejects_length_mismatch() {
        let mut bytes = npy_bytes(&[2, 2], &[1.0, 2.0, 3.0, 4.0]);
        bytes.truncate(bytes.len() - 4);
        assert!(matches!(parse_npy(&bytes), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(parse_npy(b"definitely not numpy").is_err());
    }
}
