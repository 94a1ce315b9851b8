//! Candidate production for the tuner.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::params::{Knob, KnobValue, StereoParams};
use crate::space::SearchSpace;

/// Grid expansion refuses spaces larger than this.
pub const MAX_GRID_CANDIDATES: usize = 1 << 24;

/// How candidates are drawn from a [`SearchSpace`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Strategy {
    /// Every combination, first declared knob varying slowest.
    Grid,
    /// `trials` independent uniform draws per axis from a seeded generator.
    Random {
        trials: usize,
        #[serde(default)]
        seed: u64,
    },
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::Grid
    }
}

impl Strategy {
    /// Candidate configurations in trial order. Knobs not in `space` keep
    /// their value from `base`.
    pub fn candidates(&self, space: &SearchSpace, base: &StereoParams) -> Result<Vec<StereoParams>> {
        match *self {
            Strategy::Grid => grid(space, base),
            Strategy::Random { trials, seed } => random(space, base, trials, seed),
        }
    }
}

fn grid(space: &SearchSpace, base: &StereoParams) -> Result<Vec<StereoParams>> {
    let total = space
        .grid_size()
        .filter(|&n| n <= MAX_GRID_CANDIDATES)
        .ok_or_else(|| {
            Error::config(format!(
                "grid exceeds {} candidates, use a sampling strategy",
                MAX_GRID_CANDIDATES
            ))
        })?;

    let axes = space.axes();
    let mut counters = vec![0usize; axes.len()];
    let mut out = Vec::with_capacity(total);
    let mut overrides: Vec<(Knob, KnobValue)> = Vec::with_capacity(axes.len());

    for _ in 0..total {
        overrides.clear();
        for (axis, &i) in axes.iter().zip(&counters) {
            overrides.push((axis.knob, axis.domain.value_at(i)));
        }
        out.push(base.with(&overrides)?);

        // odometer, last axis fastest
        for (axis, counter) in axes.iter().zip(counters.iter_mut()).rev() {
            *counter += 1;
            if *counter < axis.domain.len() {
                break;
            }
            *counter = 0;
        }
    }
    Ok(out)
}

fn random(space: &SearchSpace, base: &StereoParams, trials: usize, seed: u64) -> Result<Vec<StereoParams>> {
    if trials == 0 {
        return Err(Error::config("random search needs at least one trial"));
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut overrides: Vec<(Knob, KnobValue)> = Vec::with_capacity(space.axes().len());
    let mut out = Vec::with_capacity(trials);
    for _ in 0..trials {
        overrides.clear();
        for axis in space.axes() {
            let i = rng.gen_range(0..axis.domain.len());
            overrides.push((axis.knob, axis.domain.value_at(i)));
        }
        out.push(base.with(&overrides)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::MatcherMode;
    use crate::space::Domain;

    fn small_space() -> SearchSpace {
        SearchSpace::new()
            .with(Knob::BlockSize, Domain::ints([5, 7]))
            .unwrap()
            .with(Knob::Mode, Domain::modes([MatcherMode::Sgbm3Way, MatcherMode::Hh]))
            .unwrap()
            .with(Knob::SpeckleRange, Domain::Range { low: 1, high: 3, step: 2 })
            .unwrap()
    }

    #[test]
    fn grid_enumerates_in_declaration_order() {
        let candidates = Strategy::Grid
            .candidates(&small_space(), &StereoParams::default())
            .unwrap();
        let seen: Vec<(i32, MatcherMode, i32)> = candidates
            .iter()
            .map(|p| (p.block_size, p.mode, p.speckle_range))
            .collect();
        assert_eq!(
            seen,
            vec![
                (5, MatcherMode::Sgbm3Way, 1),
                (5, MatcherMode::Sgbm3Way, 3),
                (5, MatcherMode::Hh, 1),
                (5, MatcherMode::Hh, 3),
                (7, MatcherMode::Sgbm3Way, 1),
                (7, MatcherMode::Sgbm3Way, 3),
                (7, MatcherMode::Hh, 1),
                (7, MatcherMode::Hh, 3),
            ]
        );
        assert!(candidates.iter().all(|p| p.num_disparities == 16));
    }

    #[test]
    fn empty_space_yields_the_base() {
        let base = StereoParams {
            block_size: 9,
            ..StereoParams::default()
        };
        let candidates = Strategy::Grid.candidates(&SearchSpace::new(), &base).unwrap();
        assert_eq!(candidates, vec![base]);
    }

    #[test]
    fn oversized_grid_is_refused() {
        let err = Strategy::Grid
            .candidates(&SearchSpace::reference_ranges(), &StereoParams::default())
            .unwrap_err();
        assert!(matches!(err, Error::ConfigurationInvalid(_)));
    }

    #[test]
    fn random_draws_are_seeded_and_in_domain() {
        let space = SearchSpace::reference_ranges();
        let strategy = Strategy::Random { trials: 25, seed: 7 };
        let a = strategy.candidates(&space, &StereoParams::default()).unwrap();
        let b = strategy.candidates(&space, &StereoParams::default()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 25);
        for p in &a {
            assert!((16..=128).contains(&p.num_disparities) && p.num_disparities % 16 == 0);
            assert!((5..=21).contains(&p.block_size) && p.block_size % 2 == 1);
            assert!(matches!(p.mode, MatcherMode::Sgbm3Way | MatcherMode::Sgbm));
        }
    }

    #[test]
    fn random_needs_trials() {
        let strategy = Strategy::Random { trials: 0, seed: 1 };
        assert!(strategy
            .candidates(&small_space(), &StereoParams::default())
            .is_err());
    }

    #[test]
    fn strategy_from_json() {
        let s: Strategy = serde_json::from_str(r#"{ "kind": "random", "trials": 10 }"#).unwrap();
        assert_eq!(s, Strategy::Random { trials: 10, seed: 0 });
        let g: Strategy = serde_json::from_str(r#"{ "kind": "grid" }"#).unwrap();
        assert_eq!(g, Strategy::Grid);
    }
}
