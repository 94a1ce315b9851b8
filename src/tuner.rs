//! Parameter search against a pair of ground-truth references.
//!
//! Each trial scores one candidate: compute a disparity raster, evaluate the
//! metric against the left and the right reference, average the two. Trials
//! whose configuration the scorer rejects are skipped and counted. The best
//! trial is the first one, in candidate order, with the strictly lowest
//! error, also when trials run in parallel.

use std::fmt;
use std::path::Path;

use log::{debug, info, warn};
use ndarray::{Array2, ArrayViewD};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::metrics::{MaskPolicy, Metric};
use crate::pair::StereoPair;
use crate::params::StereoParams;
use crate::scorer::{DisparityScorer, SgbmScorer};
use crate::space::SearchSpace;
use crate::strategy::Strategy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TunerConfig {
    pub metric: Metric,
    pub mask: MaskPolicy,
    pub strategy: Strategy,
    /// Run trials on the rayon pool. Every running trial holds about three
    /// `rows x cols x numDisparities` `u32` volumes, so peak memory scales
    /// with the pool size; full-size scenes may need this off.
    pub parallel: bool,
    /// Values for knobs the search space leaves out.
    pub base: StereoParams,
}

impl Default for TunerConfig {
    fn default() -> Self {
        TunerConfig {
            metric: Metric::default(),
            mask: MaskPolicy::default(),
            strategy: Strategy::default(),
            parallel: true,
            base: StereoParams::default(),
        }
    }
}

impl TunerConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// One evaluated candidate. `error` is `None` for skipped trials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub index: usize,
    pub params: StereoParams,
    pub error: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningReport {
    pub best_params: StereoParams,
    pub best_error: f64,
    pub metric: Metric,
    pub trials_total: usize,
    pub trials_skipped: usize,
    pub history: Vec<TrialRecord>,
}

impl fmt::Display for TuningReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "best {} {:.4} after {} trials ({} skipped): {}",
            self.metric, self.best_error, self.trials_total, self.trials_skipped, self.best_params
        )
    }
}

enum Outcome {
    Scored(f64),
    Skipped(String),
}

/// Best trial so far, threaded through the reduction in candidate order.
#[derive(Debug, Clone, Copy)]
struct Best {
    index: usize,
    params: StereoParams,
    error: f64,
}

impl Best {
    fn consider(current: Option<Best>, candidate: Best) -> Option<Best> {
        match current {
            Some(best) if candidate.error >= best.error => Some(best),
            _ => Some(candidate),
        }
    }
}

pub struct ParameterTuner<S = SgbmScorer> {
    scorer: S,
    config: TunerConfig,
}

impl ParameterTuner<SgbmScorer> {
    pub fn new(config: TunerConfig) -> Self {
        ParameterTuner {
            scorer: SgbmScorer,
            config,
        }
    }
}

impl<S: DisparityScorer + Sync> ParameterTuner<S> {
    pub fn with_scorer(scorer: S, config: TunerConfig) -> Self {
        ParameterTuner { scorer, config }
    }

    pub fn config(&self) -> &TunerConfig {
        &self.config
    }

    fn check_references(
        &self,
        pair: &StereoPair,
        gt_left: &ArrayViewD<'_, f32>,
        gt_right: &ArrayViewD<'_, f32>,
    ) -> Result<()> {
        let expected = pair.shape();
        for shape in [gt_left.shape(), gt_right.shape()] {
            if shape != expected {
                return Err(Error::ShapeMismatch {
                    left: expected.to_vec(),
                    right: shape.to_vec(),
                });
            }
        }
        Ok(())
    }

    fn symmetric_error(
        &self,
        disparity: Array2<f32>,
        params: &StereoParams,
        gt_left: &ArrayViewD<'_, f32>,
        gt_right: &ArrayViewD<'_, f32>,
    ) -> Result<f64> {
        let config = &self.config;
        let disparity = config.mask.mask_estimate(disparity, params.unmatched_disparity());
        let left = config.metric.evaluate(disparity.view(), gt_left.view(), config.mask)?;
        let right = config.metric.evaluate(disparity.view(), gt_right.view(), config.mask)?;
        Ok((left + right) / 2.0)
    }

    /// Error of a single configuration, averaged over both references.
    pub fn evaluate(
        &self,
        pair: &StereoPair,
        gt_left: ArrayViewD<'_, f32>,
        gt_right: ArrayViewD<'_, f32>,
        params: &StereoParams,
    ) -> Result<f64> {
        self.check_references(pair, &gt_left, &gt_right)?;
        let disparity = self.scorer.compute_disparity(pair, params)?;
        self.symmetric_error(disparity, params, &gt_left, &gt_right)
    }

    fn run_trial(
        &self,
        index: usize,
        pair: &StereoPair,
        gt_left: &ArrayViewD<'_, f32>,
        gt_right: &ArrayViewD<'_, f32>,
        params: &StereoParams,
    ) -> Result<Outcome> {
        let disparity = match self.scorer.compute_disparity(pair, params) {
            Ok(d) => d,
            Err(e) if e.is_trial_recoverable() => return Ok(Outcome::Skipped(e.to_string())),
            Err(e) => return Err(e),
        };
        let error = self.symmetric_error(disparity, params, gt_left, gt_right)?;
        debug!("trial {}: {} -> {} {}", index, params, self.config.metric, error);
        Ok(Outcome::Scored(error))
    }

    /// Search `space` and return the best configuration.
    ///
    /// Fails with `ShapeMismatch` when a reference does not match the pair,
    /// and with `ExhaustedSearchSpace` when no trial produced a finite error.
    pub fn tune(
        &self,
        pair: &StereoPair,
        gt_left: ArrayViewD<'_, f32>,
        gt_right: ArrayViewD<'_, f32>,
        space: &SearchSpace,
    ) -> Result<TuningReport> {
        self.check_references(pair, &gt_left, &gt_right)?;
        let candidates = self.config.strategy.candidates(space, &self.config.base)?;
        info!(
            "tuning {} candidates ({:?}, {}, {})",
            candidates.len(),
            self.config.strategy,
            self.config.metric,
            if self.config.parallel { "parallel" } else { "sequential" }
        );

        let trial = |(index, params): (usize, &StereoParams)| {
            self.run_trial(index, pair, &gt_left, &gt_right, params)
        };
        let outcomes: Vec<Outcome> = if self.config.parallel {
            candidates
                .par_iter()
                .enumerate()
                .map(trial)
                .collect::<Result<_>>()?
        } else {
            candidates
                .iter()
                .enumerate()
                .map(trial)
                .collect::<Result<_>>()?
        };

        let mut best: Option<Best> = None;
        let mut skipped = 0;
        let mut history = Vec::with_capacity(candidates.len());
        for (index, (params, outcome)) in candidates.iter().zip(outcomes).enumerate() {
            let record = match outcome {
                Outcome::Scored(error) if error.is_finite() => {
                    let next = Best::consider(best, Best { index, params: *params, error });
                    if next.map(|b| b.index) == Some(index) {
                        info!("trial {} improves to {:.4}: {}", index, error, params);
                    }
                    best = next;
                    TrialRecord { index, params: *params, error: Some(error), skipped: None }
                }
                Outcome::Scored(error) => {
                    skipped += 1;
                    warn!("trial {} skipped: non-finite error {}", index, error);
                    TrialRecord {
                        index,
                        params: *params,
                        error: None,
                        skipped: Some(format!("non-finite error {}", error)),
                    }
                }
                Outcome::Skipped(reason) => {
                    skipped += 1;
                    warn!("trial {} skipped: {}", index, reason);
                    TrialRecord { index, params: *params, error: None, skipped: Some(reason) }
                }
            };
            history.push(record);
        }

        let best = best.ok_or(Error::ExhaustedSearchSpace { skipped })?;
        let report = TuningReport {
            best_params: best.params,
            best_error: best.error,
            metric: self.config.metric,
            trials_total: candidates.len(),
            trials_skipped: skipped,
            history,
        };
        info!("{}", report);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{Knob, MatcherMode};
    use crate::space::Domain;
    use image::GrayImage;
    use ndarray::ArrayD;

    fn flat_pair() -> StereoPair {
        StereoPair::new(GrayImage::new(6, 4), GrayImage::new(6, 4)).unwrap()
    }

    fn zeros() -> ArrayD<f32> {
        ArrayD::zeros(vec![4, 6])
    }

    fn block_size_scorer(pair: &StereoPair, params: &StereoParams) -> Result<Array2<f32>> {
        let value = match params.block_size {
            5 => 2.0,
            7 => 1.5,
            9 => 1.5,
            _ => return Err(Error::config("unsupported block size")),
        };
        let [h, w] = pair.shape();
        Ok(Array2::from_elem((h, w), value))
    }

    fn config(parallel: bool) -> TunerConfig {
        TunerConfig {
            parallel,
            ..TunerConfig::default()
        }
    }

    #[test]
    fn best_block_size_wins() {
        let space = SearchSpace::new()
            .with(Knob::BlockSize, Domain::ints([5, 7]))
            .unwrap();
        let (gt_l, gt_r) = (zeros(), zeros());
        let tuner = ParameterTuner::with_scorer(block_size_scorer, config(false));
        let report = tuner
            .tune(&flat_pair(), gt_l.view(), gt_r.view(), &space)
            .unwrap();
        assert_eq!(report.best_params.block_size, 7);
        assert_eq!(report.best_error, 1.5);
        assert_eq!(report.trials_total, 2);
        assert_eq!(report.trials_skipped, 0);
    }

    #[test]
    fn ties_keep_the_earliest_candidate() {
        let space = SearchSpace::new()
            .with(Knob::BlockSize, Domain::ints([9, 5, 7]))
            .unwrap();
        let (gt_l, gt_r) = (zeros(), zeros());
        for parallel in [false, true] {
            let tuner = ParameterTuner::with_scorer(block_size_scorer, config(parallel));
            let report = tuner
                .tune(&flat_pair(), gt_l.view(), gt_r.view(), &space)
                .unwrap();
            assert_eq!(report.best_params.block_size, 9);
        }
    }

    #[test]
    fn invalid_trials_are_skipped_and_counted() {
        let space = SearchSpace::new()
            .with(Knob::BlockSize, Domain::ints([3, 5, 11]))
            .unwrap();
        let (gt_l, gt_r) = (zeros(), zeros());
        let tuner = ParameterTuner::with_scorer(block_size_scorer, config(true));
        let report = tuner
            .tune(&flat_pair(), gt_l.view(), gt_r.view(), &space)
            .unwrap();
        assert_eq!(report.best_params.block_size, 5);
        assert_eq!(report.trials_skipped, 2);
        assert_eq!(report.history.len(), 3);
        assert!(report.history[0].skipped.is_some());
        assert_eq!(report.history[1].error, Some(2.0));
    }

    #[test]
    fn all_invalid_exhausts_the_space() {
        let space = SearchSpace::new()
            .with(Knob::BlockSize, Domain::ints([2, 4, 6, 8]))
            .unwrap()
            .with(Knob::Mode, Domain::modes([MatcherMode::Sgbm, MatcherMode::Hh]))
            .unwrap();
        let (gt_l, gt_r) = (zeros(), zeros());
        let tuner = ParameterTuner::new(config(true));
        let err = tuner
            .tune(&flat_pair(), gt_l.view(), gt_r.view(), &space)
            .unwrap_err();
        assert!(matches!(err, Error::ExhaustedSearchSpace { skipped: 8 }));
    }

    #[test]
    fn references_must_match_the_pair() {
        let space = SearchSpace::new();
        let good = zeros();
        let bad = ArrayD::<f32>::zeros(vec![4, 6, 3]);
        let tuner = ParameterTuner::with_scorer(block_size_scorer, config(false));
        let err = tuner
            .tune(&flat_pair(), good.view(), bad.view(), &space)
            .unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn errors_average_both_references() {
        let gt_l = ArrayD::<f32>::zeros(vec![4, 6]);
        let gt_r = ArrayD::<f32>::from_elem(vec![4, 6], 3.0);
        let tuner = ParameterTuner::with_scorer(
            block_size_scorer,
            TunerConfig {
                metric: Metric::Mae,
                ..config(false)
            },
        );
        let params = StereoParams::default();
        let error = tuner
            .evaluate(&flat_pair(), gt_l.view(), gt_r.view(), &params)
            .unwrap();
        // |2 - 0| and |2 - 3|
        assert!((error - 1.5).abs() < 1e-12);
    }

    /// Unmatched everywhere except a first row off by two.
    fn unmatched_below_first_row(pair: &StereoPair, params: &StereoParams) -> Result<Array2<f32>> {
        let [h, w] = pair.shape();
        let unmatched = params.unmatched_disparity();
        Ok(Array2::from_shape_fn((h, w), |(r, _)| if r == 0 { 2.0 } else { unmatched }))
    }

    #[test]
    fn masking_ignores_each_candidates_unmatched_pixels() {
        let space = SearchSpace::new()
            .with(Knob::MinDisparity, Domain::ints([16, 0]))
            .unwrap();
        let (gt_l, gt_r) = (zeros(), zeros());
        let tuner = ParameterTuner::with_scorer(
            unmatched_below_first_row,
            TunerConfig {
                metric: Metric::Mae,
                mask: MaskPolicy::ExcludeInvalid,
                ..config(true)
            },
        );
        let report = tuner
            .tune(&flat_pair(), gt_l.view(), gt_r.view(), &space)
            .unwrap();
        assert_eq!(report.history[0].error, Some(2.0));
        assert_eq!(report.history[1].error, Some(2.0));
        assert_eq!(report.best_params.min_disparity, 16);

        let unmasked = ParameterTuner::with_scorer(
            unmatched_below_first_row,
            TunerConfig {
                metric: Metric::Mae,
                ..config(false)
            },
        )
        .tune(&flat_pair(), gt_l.view(), gt_r.view(), &space)
        .unwrap();
        assert_eq!(unmasked.best_params.min_disparity, 0);
    }

    #[test]
    fn config_reads_partial_json() {
        let cfg: TunerConfig = serde_json::from_str(
            r#"{ "metric": "mae", "strategy": { "kind": "random", "trials": 4, "seed": 9 },
                 "base": { "numDisparities": 32 } }"#,
        )
        .unwrap();
        assert_eq!(cfg.metric, Metric::Mae);
        assert_eq!(cfg.strategy, Strategy::Random { trials: 4, seed: 9 });
        assert_eq!(cfg.base.num_disparities, 32);
        assert!(cfg.parallel);
        assert!(serde_json::from_str::<TunerConfig>(r#"{ "metrik": "mae" }"#).is_err());
    }
}
