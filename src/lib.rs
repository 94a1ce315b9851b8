//! Evaluate and tune semi-global block matching parameters against
//! ground-truth disparity maps.
//!
//! ```no_run
//! use sgm_tune::{ParameterTuner, Scene, SearchSpace, TunerConfig};
//!
//! # fn main() -> sgm_tune::Result<()> {
//! let scene = Scene::new("data/artroom1").load()?;
//! let tuner = ParameterTuner::new(TunerConfig::default());
//! let report = tuner.tune(
//!     &scene.pair,
//!     scene.gt_left.data.view(),
//!     scene.gt_right.data.view(),
//!     &SearchSpace::reference_grid(),
//! )?;
//! println!("{}", report);
//! # Ok(())
//! # }
//! ```

pub mod dataset;
pub mod error;
pub mod io;
pub mod logger;
pub mod metrics;
pub mod pair;
pub mod params;
pub mod pfm;
pub mod scorer;
pub mod sgm;
pub mod space;
pub mod strategy;
pub mod tuner;

pub use dataset::{Scene, SceneData};
pub use error::{Error, Result};
pub use io::{read_disparity, read_image, write_disparity};
pub use metrics::{mean_absolute_error, root_mean_square_error, MaskPolicy, Metric};
pub use pair::StereoPair;
pub use params::{Knob, KnobValue, MatcherMode, StereoParams};
pub use pfm::{ByteOrder, DepthRaster, INVALID_DISPARITY};
pub use scorer::{compute_disparity, DisparityScorer, SgbmScorer};
pub use sgm::{compute_disp, SgbmMatcher, DISP_SCALE};
pub use space::{Domain, SearchSpace};
pub use strategy::Strategy;
pub use tuner::{ParameterTuner, TrialRecord, TunerConfig, TuningReport};
