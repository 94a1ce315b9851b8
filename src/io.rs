//! File-level loading and saving of images and disparity rasters.

use std::path::Path;

use image::{DynamicImage, GrayImage, Luma};
use ndarray::Array2;

use crate::error::{Error, Result};
use crate::pfm::{self, DepthRaster};

/// Decode an 8-bit image.
pub fn read_image<P: AsRef<Path>>(path: P) -> Result<DynamicImage> {
    let path = path.as_ref();
    image::open(path).map_err(|source| Error::Image {
        path: path.to_path_buf(),
        source,
    })
}

/// Load a PFM disparity raster.
pub fn read_disparity<P: AsRef<Path>>(path: P) -> Result<DepthRaster> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|e| Error::io(path, e))?;
    pfm::decode(&bytes)
}

/// Save a disparity map as a single-channel little-endian PFM.
pub fn write_disparity<P: AsRef<Path>>(path: P, disparity: &Array2<f32>) -> Result<()> {
    let path = path.as_ref();
    let bytes = pfm::encode(&DepthRaster::from_disparity(disparity.clone()))?;
    std::fs::write(path, bytes).map_err(|e| Error::io(path, e))
}

/// 8-bit view of a disparity map stretched over its valid range.
/// Values at or below `invalid` are drawn black.
pub fn disparity_preview(disparity: &Array2<f32>, invalid: f32) -> GrayImage {
    let valid = || disparity.iter().copied().filter(|&d| d > invalid && d.is_finite());
    let min_val = valid().fold(f32::INFINITY, f32::min);
    let max_val = valid().fold(f32::NEG_INFINITY, f32::max);
    let range = max_val - min_val;

    let (rows, cols) = disparity.dim();
    GrayImage::from_fn(cols as u32, rows as u32, |x, y| {
        let d = disparity[(y as usize, x as usize)];
        let v = if d <= invalid || !d.is_finite() {
            0
        } else if range > 0.0 {
            (1.0 + (d - min_val) / range * 254.0) as u8
        } else {
            255
        };
        Luma([v])
    })
}

pub fn save_preview<P: AsRef<Path>>(path: P, disparity: &Array2<f32>, invalid: f32) -> Result<()> {
    let path = path.as_ref();
    disparity_preview(disparity, invalid)
        .save(path)
        .map_err(|source| Error::Image {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_image_reports_path() {
        let err = read_image("/definitely/not/here.png").unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.png"));
    }

    #[test]
    fn missing_raster_is_io_error() {
        let err = read_disparity("/definitely/not/here.pfm").unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn disparity_file_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("disp.pfm");
        let disparity = Array2::from_shape_fn((3, 5), |(r, c)| (r * 5 + c) as f32 * 0.25);
        write_disparity(&path, &disparity).unwrap();

        let raster = read_disparity(&path).unwrap();
        assert_eq!(raster.data, disparity.into_dyn());
        assert_eq!(raster.scale, 1.0);
    }

    #[test]
    fn preview_marks_invalid_black() {
        let disparity = Array2::from_shape_vec((1, 3), vec![-1.0, 4.0, 8.0]).unwrap();
        let preview = disparity_preview(&disparity, -1.0);
        assert_eq!(preview.get_pixel(0, 0).0[0], 0);
        assert_eq!(preview.get_pixel(1, 0).0[0], 1);
        assert_eq!(preview.get_pixel(2, 0).0[0], 255);
    }

    #[test]
    fn preview_saves_png() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("preview.png");
        let disparity = Array2::from_elem((4, 4), 2.0f32);
        save_preview(&path, &disparity, -1.0).unwrap();
        let back = read_image(&path).unwrap();
        assert_eq!(back.to_luma8().dimensions(), (4, 4));
    }
}
