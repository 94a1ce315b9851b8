//! Portable float map (PFM) depth rasters.
//!
//! Layout: a tag line (`PF` three channels, `Pf` one channel), a
//! `"<width> <height>"` line, a scale line whose sign gives the byte order
//! (negative little-endian, otherwise big-endian), then raw `f32` samples.
//! Rows are stored bottom-to-top; decoded rasters are returned top-to-bottom.

use ndarray::{Array2, ArrayD, IxDyn};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Value substituted for samples stored as `+inf` (no ground truth).
pub const INVALID_DISPARITY: f32 = -1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ByteOrder {
    LittleEndian,
    BigEndian,
}

/// A decoded floating-point raster with the metadata recorded in its header.
#[derive(Debug, Clone)]
pub struct DepthRaster {
    /// `(height, width)` or `(height, width, 3)`.
    pub data: ArrayD<f32>,
    /// Absolute value of the header scale.
    pub scale: f32,
    pub byte_order: ByteOrder,
}

impl DepthRaster {
    /// Wrap a single-channel disparity map for writing.
    pub fn from_disparity(disparity: Array2<f32>) -> Self {
        DepthRaster {
            data: disparity.into_dyn(),
            scale: 1.0,
            byte_order: ByteOrder::LittleEndian,
        }
    }

    pub fn width(&self) -> usize {
        self.data.shape()[1]
    }

    pub fn height(&self) -> usize {
        self.data.shape()[0]
    }

    pub fn channels(&self) -> usize {
        if self.data.ndim() == 3 {
            self.data.shape()[2]
        } else {
            1
        }
    }
}

fn next_line<'a>(bytes: &'a [u8], pos: &mut usize) -> Result<&'a str> {
    let rest = &bytes[*pos..];
    let end = rest
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| Error::Format("truncated header".into()))?;
    *pos += end + 1;
    std::str::from_utf8(&rest[..end])
        .map(str::trim_end)
        .map_err(|_| Error::Format("header is not ascii".into()))
}

/// Decode a PFM byte stream.
pub fn decode(bytes: &[u8]) -> Result<DepthRaster> {
    let mut pos = 0;

    let channels = match next_line(bytes, &mut pos)? {
        "PF" => 3,
        "Pf" => 1,
        tag => return Err(Error::Format(format!("not a PFM file (tag {:?})", tag))),
    };

    let dims = next_line(bytes, &mut pos)?;
    let mut fields = dims.split_ascii_whitespace().map(str::parse::<usize>);
    let (width, height) = match (fields.next(), fields.next()) {
        (Some(Ok(w)), Some(Ok(h))) if w > 0 && h > 0 => (w, h),
        _ => return Err(Error::Format(format!("bad dimension line {:?}", dims))),
    };

    let scale_line = next_line(bytes, &mut pos)?;
    let scale: f32 = scale_line
        .trim()
        .parse()
        .map_err(|_| Error::Format(format!("bad scale line {:?}", scale_line)))?;
    if !scale.is_finite() {
        return Err(Error::Format(format!("bad scale line {:?}", scale_line)));
    }
    let byte_order = if scale < 0.0 {
        ByteOrder::LittleEndian
    } else {
        ByteOrder::BigEndian
    };

    let row_len = width.checked_mul(channels);
    let sample_count = row_len.and_then(|n| n.checked_mul(height));
    let (row_len, sample_count, byte_len) =
        match (row_len, sample_count, sample_count.and_then(|n| n.checked_mul(4))) {
            (Some(r), Some(n), Some(b)) => (r, n, b),
            _ => {
                return Err(Error::Format(format!(
                    "dimensions {}x{} overflow",
                    width, height
                )))
            }
        };
    let payload = &bytes[pos..];
    if payload.len() != byte_len {
        return Err(Error::Format(format!(
            "expected {} samples for {}x{}x{}, found {} bytes",
            sample_count,
            width,
            height,
            channels,
            payload.len()
        )));
    }

    let mut samples = vec![0f32; sample_count];
    for (i, chunk) in payload.chunks_exact(4).enumerate() {
        let raw = [chunk[0], chunk[1], chunk[2], chunk[3]];
        let mut value = match byte_order {
            ByteOrder::LittleEndian => f32::from_le_bytes(raw),
            ByteOrder::BigEndian => f32::from_be_bytes(raw),
        };
        if value == f32::INFINITY {
            value = INVALID_DISPARITY;
        }
        let (file_row, col) = (i / row_len, i % row_len);
        samples[(height - 1 - file_row) * row_len + col] = value;
    }

    let shape = if channels == 3 {
        vec![height, width, 3]
    } else {
        vec![height, width]
    };
    let data = ArrayD::from_shape_vec(IxDyn(&shape), samples)
        .map_err(|e| Error::Format(e.to_string()))?;

    Ok(DepthRaster {
        data,
        scale: scale.abs(),
        byte_order,
    })
}

/// Encode a raster, writing rows bottom-to-top.
pub fn encode(raster: &DepthRaster) -> Result<Vec<u8>> {
    let (tag, channels) = match raster.data.shape() {
        [_, _] => ("Pf", 1),
        [_, _, 3] => ("PF", 3),
        other => {
            return Err(Error::Format(format!(
                "cannot encode raster of shape {:?}",
                other
            )))
        }
    };
    let (height, width) = (raster.height(), raster.width());
    let signed_scale = match raster.byte_order {
        ByteOrder::LittleEndian => -raster.scale.abs(),
        ByteOrder::BigEndian => raster.scale.abs(),
    };

    let mut out = format!("{}\n{} {}\n{}\n", tag, width, height, signed_scale).into_bytes();
    out.reserve(width * height * channels * 4);

    let standard = raster.data.as_standard_layout();
    let samples = standard
        .as_slice()
        .ok_or_else(|| Error::Format("raster is not contiguous".into()))?;
    let row_len = width * channels;
    for row in samples.chunks_exact(row_len).rev() {
        for &value in row {
            let bytes = match raster.byte_order {
                ByteOrder::LittleEndian => value.to_le_bytes(),
                ByteOrder::BigEndian => value.to_be_bytes(),
            };
            out.extend_from_slice(&bytes);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pfm_bytes(header: &str, samples: &[f32], little: bool) -> Vec<u8> {
        let mut out = header.as_bytes().to_vec();
        for s in samples {
            if little {
                out.extend_from_slice(&s.to_le_bytes());
            } else {
                out.extend_from_slice(&s.to_be_bytes());
            }
        }
        out
    }

    #[test]
    fn decodes_color_little_endian() {
        let samples: Vec<f32> = (0..24).map(|v| v as f32).collect();
        let raster = decode(&pfm_bytes("PF\n4 2\n-1.0\n", &samples, true)).unwrap();

        assert_eq!(raster.data.shape(), &[2, 4, 3]);
        assert_eq!(raster.scale, 1.0);
        assert_eq!(raster.byte_order, ByteOrder::LittleEndian);
        assert_eq!(raster.channels(), 3);
        // First stored row is the bottom row.
        assert_eq!(raster.data[[1, 0, 0]], 0.0);
        assert_eq!(raster.data[[0, 0, 0]], 12.0);
    }

    #[test]
    fn decodes_gray_big_endian_with_scale() {
        let samples = [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0];
        let raster = decode(&pfm_bytes("Pf\n3 2\n2.5\n", &samples, false)).unwrap();

        assert_eq!(raster.data.shape(), &[2, 3]);
        assert_eq!(raster.scale, 2.5);
        assert_eq!(raster.byte_order, ByteOrder::BigEndian);
        assert_eq!(raster.data[[0, 2]], 6.0);
        assert_eq!(raster.data[[1, 0]], 1.0);
    }

    #[test]
    fn infinite_samples_become_invalid() {
        let samples = [f32::INFINITY, 7.0];
        let raster = decode(&pfm_bytes("Pf\n2 1\n-1\n", &samples, true)).unwrap();
        assert_eq!(raster.data[[0, 0]], INVALID_DISPARITY);
        assert_eq!(raster.data[[0, 1]], 7.0);
    }

    #[test]
    fn rejects_unknown_tag() {
        let err = decode(&pfm_bytes("XX\n1 1\n-1\n", &[0.0], true)).unwrap_err();
        assert!(matches!(err, Error::Format(_)));
    }

    #[test]
    fn rejects_bad_dimension_line() {
        let err = decode(&pfm_bytes("Pf\nfour two\n-1\n", &[0.0], true)).unwrap_err();
        assert!(matches!(err, Error::Format(_)));
    }

    #[test]
    fn oversized_dimensions_are_a_format_error() {
        let err = decode(b"Pf\n4294967296 4294967296\n-1\n").unwrap_err();
        assert!(matches!(err, Error::Format(_)));

        let header = format!("PF\n{} 1\n-1\n", usize::MAX);
        let err = decode(header.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::Format(_)));
    }

    #[test]
    fn rejects_short_payload() {
        let err = decode(&pfm_bytes("Pf\n2 2\n-1\n", &[0.0, 1.0, 2.0], true)).unwrap_err();
        assert!(matches!(err, Error::Format(_)));
    }

    #[test]
    fn encode_then_decode_preserves_orientation() {
        let disparity = Array2::from_shape_vec((2, 2), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let bytes = encode(&DepthRaster::from_disparity(disparity.clone())).unwrap();
        assert!(bytes.starts_with(b"Pf\n2 2\n-1\n"));

        let back = decode(&bytes).unwrap();
        assert_eq!(back.data, disparity.into_dyn());
    }
}
