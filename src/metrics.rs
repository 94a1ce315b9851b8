//! Pixel-wise error metrics between disparity rasters.
//!
//! Both metrics accumulate in `f64`. Under [`MaskPolicy::Unmasked`] every
//! element contributes, including [`INVALID_DISPARITY`] samples, so regions
//! without ground truth inflate the error. [`MaskPolicy::ExcludeInvalid`]
//! drops element pairs whose reference is `INVALID_DISPARITY` or whose
//! either side is non-finite; estimates mark their unmatched pixels through
//! [`MaskPolicy::mask_estimate`]. When no element survives masking the
//! result is `NaN`.

use std::fmt;
use std::str::FromStr;

use ndarray::{Array2, ArrayView, Dimension};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::pfm::INVALID_DISPARITY;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Mae,
    Rmse,
}

impl Default for Metric {
    fn default() -> Self {
        Metric::Rmse
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Mae => f.write_str("mae"),
            Metric::Rmse => f.write_str("rmse"),
        }
    }
}

impl FromStr for Metric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mae" => Ok(Metric::Mae),
            "rmse" => Ok(Metric::Rmse),
            other => Err(Error::config(format!("unknown metric {:?}", other))),
        }
    }
}

/// Which element pairs contribute to a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskPolicy {
    Unmasked,
    ExcludeInvalid,
}

impl Default for MaskPolicy {
    fn default() -> Self {
        MaskPolicy::Unmasked
    }
}

impl FromStr for MaskPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "unmasked" | "none" => Ok(MaskPolicy::Unmasked),
            "exclude-invalid" | "masked" => Ok(MaskPolicy::ExcludeInvalid),
            other => Err(Error::config(format!("unknown mask policy {:?}", other))),
        }
    }
}

impl MaskPolicy {
    /// `a` is the estimate, `b` the reference.
    fn keeps(self, a: f32, b: f32) -> bool {
        match self {
            MaskPolicy::Unmasked => true,
            MaskPolicy::ExcludeInvalid => {
                a.is_finite() && b.is_finite() && b != INVALID_DISPARITY
            }
        }
    }

    /// Replace pixels equal to `unmatched` with `NaN` so that
    /// `ExcludeInvalid` drops them. Unmasked estimates pass through.
    pub fn mask_estimate(self, disparity: Array2<f32>, unmatched: f32) -> Array2<f32> {
        match self {
            MaskPolicy::Unmasked => disparity,
            MaskPolicy::ExcludeInvalid => {
                disparity.mapv(|d| if d == unmatched { f32::NAN } else { d })
            }
        }
    }
}

impl Metric {
    pub fn evaluate<D, E>(
        self,
        a: ArrayView<'_, f32, D>,
        b: ArrayView<'_, f32, E>,
        mask: MaskPolicy,
    ) -> Result<f64>
    where
        D: Dimension,
        E: Dimension,
    {
        match self {
            Metric::Mae => {
                let (sum, n) = accumulate(a, b, mask, |d| d.abs())?;
                Ok(sum / n as f64)
            }
            Metric::Rmse => {
                let (sum, n) = accumulate(a, b, mask, |d| d * d)?;
                Ok((sum / n as f64).sqrt())
            }
        }
    }
}

fn accumulate<D, E, F>(
    a: ArrayView<'_, f32, D>,
    b: ArrayView<'_, f32, E>,
    mask: MaskPolicy,
    term: F,
) -> Result<(f64, usize)>
where
    D: Dimension,
    E: Dimension,
    F: Fn(f64) -> f64,
{
    if a.shape() != b.shape() {
        return Err(Error::ShapeMismatch {
            left: a.shape().to_vec(),
            right: b.shape().to_vec(),
        });
    }
    let mut sum = 0.0;
    let mut n = 0usize;
    for (&x, &y) in a.iter().zip(b.iter()) {
        if mask.keeps(x, y) {
            sum += term(x as f64 - y as f64);
            n += 1;
        }
    }
    Ok((sum, n))
}

/// Mean of `|a - b|` over every element.
pub fn mean_absolute_error<D, E>(a: ArrayView<'_, f32, D>, b: ArrayView<'_, f32, E>) -> Result<f64>
where
    D: Dimension,
    E: Dimension,
{
    Metric::Mae.evaluate(a, b, MaskPolicy::Unmasked)
}

/// Square root of the mean of `(a - b)^2` over every element.
pub fn root_mean_square_error<D, E>(
    a: ArrayView<'_, f32, D>,
    b: ArrayView<'_, f32, E>,
) -> Result<f64>
where
    D: Dimension,
    E: Dimension,
{
    Metric::Rmse.evaluate(a, b, MaskPolicy::Unmasked)
}
