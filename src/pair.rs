use image::{DynamicImage, GenericImageView, GrayImage};

use crate::error::{Error, Result};

/// A rectified left/right pair, kept as grayscale for matching.
#[derive(Debug, Clone)]
pub struct StereoPair {
    left: GrayImage,
    right: GrayImage,
}

impl StereoPair {
    /// Both images must be non-empty and of equal size.
    pub fn new(left: GrayImage, right: GrayImage) -> Result<Self> {
        check_dimensions(left.dimensions(), right.dimensions())?;
        Ok(StereoPair { left, right })
    }

    /// Build from decoded images; both must also share a color type.
    pub fn from_images(left: &DynamicImage, right: &DynamicImage) -> Result<Self> {
        if left.color() != right.color() {
            return Err(Error::TypeMismatch(format!(
                "left is {:?} but right is {:?}",
                left.color(),
                right.color()
            )));
        }
        check_dimensions(left.dimensions(), right.dimensions())?;
        Ok(StereoPair {
            left: left.to_luma8(),
            right: right.to_luma8(),
        })
    }

    pub fn left(&self) -> &GrayImage {
        &self.left
    }

    pub fn right(&self) -> &GrayImage {
        &self.right
    }

    pub fn width(&self) -> u32 {
        self.left.width()
    }

    pub fn height(&self) -> u32 {
        self.left.height()
    }

    /// `(height, width)`, the shape of a disparity raster for this pair.
    pub fn shape(&self) -> [usize; 2] {
        [self.left.height() as usize, self.left.width() as usize]
    }
}

fn check_dimensions(left: (u32, u32), right: (u32, u32)) -> Result<()> {
    if left.0 == 0 || left.1 == 0 {
        return Err(Error::TypeMismatch("left image is empty".into()));
    }
    if left != right {
        return Err(Error::TypeMismatch(format!(
            "left is {}x{} but right is {}x{}",
            left.0, left.1, right.0, right.1
        )));
    }
    Ok(())
}
