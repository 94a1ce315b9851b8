//! The disparity producer seen by the tuner.

use log::debug;
use ndarray::Array2;

use crate::error::Result;
use crate::pair::StereoPair;
use crate::params::StereoParams;
use crate::sgm::{SgbmMatcher, DISP_SCALE};

/// Produces a disparity raster in pixel units for one configuration.
///
/// Implementations report configurations they cannot run as
/// `Error::ConfigurationInvalid`; the tuner skips those trials.
pub trait DisparityScorer {
    fn compute_disparity(&self, pair: &StereoPair, params: &StereoParams) -> Result<Array2<f32>>;
}

impl<F> DisparityScorer for F
where
    F: Fn(&StereoPair, &StereoParams) -> Result<Array2<f32>>,
{
    fn compute_disparity(&self, pair: &StereoPair, params: &StereoParams) -> Result<Array2<f32>> {
        self(pair, params)
    }
}

/// Scores with [`SgbmMatcher`], converting its fixed-point output.
#[derive(Debug, Clone, Copy, Default)]
pub struct SgbmScorer;

impl DisparityScorer for SgbmScorer {
    fn compute_disparity(&self, pair: &StereoPair, params: &StereoParams) -> Result<Array2<f32>> {
        debug!("sgbm {}", params);
        let matcher = SgbmMatcher::new(*params)?;
        let fixed = matcher.compute(pair.left(), pair.right())?;
        Ok(fixed.mapv(|d| d as f32 / DISP_SCALE as f32))
    }
}

/// Disparity of `pair` under `params` with the built-in matcher.
pub fn compute_disparity(pair: &StereoPair, params: &StereoParams) -> Result<Array2<f32>> {
    SgbmScorer.compute_disparity(pair, params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use image::GrayImage;

    #[test]
    fn output_is_in_pixel_units() {
        let pair = StereoPair::new(GrayImage::new(24, 12), GrayImage::new(24, 12)).unwrap();
        let params = StereoParams {
            min_disparity: 3,
            ..StereoParams::default()
        };
        let disp = compute_disparity(&pair, &params).unwrap();
        assert_eq!(disp.dim(), (12, 24));
        // minDisparity - 1 marks unmatched pixels
        assert!(disp.iter().all(|&d| d == 2.0 || (3.0..=19.0).contains(&d)));
    }

    #[test]
    fn invalid_configuration_propagates() {
        let pair = StereoPair::new(GrayImage::new(8, 8), GrayImage::new(8, 8)).unwrap();
        let params = StereoParams {
            block_size: 6,
            ..StereoParams::default()
        };
        let err = compute_disparity(&pair, &params).unwrap_err();
        assert!(matches!(err, Error::ConfigurationInvalid(_)));
    }
}
