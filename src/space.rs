//! Search spaces: an ordered list of knobs, each with a candidate domain.
//!
//! A JSON space maps knob names to either a list of candidates or an
//! inclusive stepped range:
//!
//! ```json
//! { "blockSize": [5, 7, 9], "P1": { "low": 600, "high": 1200, "step": 100 },
//!   "mode": ["SGBM_3WAY", "SGBM"] }
//! ```
//!
//! Declaration order is kept; it fixes the grid enumeration order.

use std::path::Path;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::params::{Knob, KnobValue, MatcherMode};

/// Candidate values for one knob.
#[derive(Debug, Clone, PartialEq)]
pub enum Domain {
    Values(Vec<KnobValue>),
    /// Inclusive integer range `low, low + step, ..., <= high`.
    Range { low: i32, high: i32, step: i32 },
}

impl Domain {
    pub fn ints<I: IntoIterator<Item = i32>>(values: I) -> Self {
        Domain::Values(values.into_iter().map(KnobValue::Int).collect())
    }

    pub fn modes<I: IntoIterator<Item = MatcherMode>>(modes: I) -> Self {
        Domain::Values(modes.into_iter().map(KnobValue::Mode).collect())
    }

    pub fn len(&self) -> usize {
        match self {
            Domain::Values(values) => values.len(),
            Domain::Range { low, high, step } => {
                ((*high as i64 - *low as i64) / *step as i64 + 1) as usize
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The `index`-th candidate in declaration order. `index < len()`.
    pub fn value_at(&self, index: usize) -> KnobValue {
        match self {
            Domain::Values(values) => values[index],
            Domain::Range { low, step, .. } => {
                KnobValue::Int((*low as i64 + index as i64 * *step as i64) as i32)
            }
        }
    }

    fn check(&self, knob: Knob) -> Result<()> {
        match self {
            Domain::Values(values) => {
                if values.is_empty() {
                    return Err(Error::config(format!("{} has no candidate values", knob)));
                }
                for value in values {
                    let ok = matches!(
                        (knob.is_categorical(), value),
                        (true, KnobValue::Mode(_)) | (false, KnobValue::Int(_))
                    );
                    if !ok {
                        return Err(Error::config(format!(
                            "{} cannot take value {}",
                            knob, value
                        )));
                    }
                }
            }
            Domain::Range { low, high, step } => {
                if knob.is_categorical() {
                    return Err(Error::config(format!("{} cannot take a numeric range", knob)));
                }
                if low > high || *step <= 0 {
                    return Err(Error::config(format!(
                        "{} range [{}, {}] step {} is empty",
                        knob, low, high, step
                    )));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Axis {
    pub knob: Knob,
    pub domain: Domain,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchSpace {
    axes: Vec<Axis>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a knob. Duplicates, empty domains and values of the wrong
    /// kind are rejected.
    pub fn push(&mut self, knob: Knob, domain: Domain) -> Result<()> {
        if self.axes.iter().any(|a| a.knob == knob) {
            return Err(Error::config(format!("{} declared twice", knob)));
        }
        domain.check(knob)?;
        self.axes.push(Axis { knob, domain });
        Ok(())
    }

    pub fn with(mut self, knob: Knob, domain: Domain) -> Result<Self> {
        self.push(knob, domain)?;
        Ok(self)
    }

    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }

    /// Number of grid points, `None` on overflow.
    pub fn grid_size(&self) -> Option<usize> {
        self.axes
            .iter()
            .try_fold(1usize, |acc, axis| acc.checked_mul(axis.domain.len()))
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_json_value(&value)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_json_str(&text)
    }

    pub fn from_json_value(value: &Value) -> Result<Self> {
        let map = value
            .as_object()
            .ok_or_else(|| Error::config("search space must be a JSON object"))?;
        let mut space = SearchSpace::new();
        for (name, entry) in map {
            let knob: Knob = name.parse()?;
            space.push(knob, parse_domain(knob, entry)?)?;
        }
        Ok(space)
    }

    /// The fixed grid shipped with the tuner (28,800 points).
    pub fn reference_grid() -> Self {
        SearchSpace {
            axes: vec![
                axis(Knob::MinDisparity, Domain::ints([0, 16, 32])),
                axis(Knob::NumDisparities, Domain::ints([16, 32, 64])),
                axis(Knob::BlockSize, Domain::ints([5, 7, 9, 11])),
                axis(Knob::P1, Domain::ints([8 * 3 * 5 * 5, 8 * 3 * 7 * 7])),
                axis(Knob::P2, Domain::ints([32 * 3 * 5 * 5, 32 * 3 * 7 * 7])),
                axis(Knob::Disp12MaxDiff, Domain::ints(1..=5)),
                axis(Knob::UniquenessRatio, Domain::ints([5, 10])),
                axis(Knob::SpeckleWindowSize, Domain::ints([50, 100])),
                axis(Knob::SpeckleRange, Domain::ints([1, 5, 10, 20, 50])),
                axis(
                    Knob::Mode,
                    Domain::modes([MatcherMode::Sgbm3Way, MatcherMode::Sgbm]),
                ),
            ],
        }
    }

    /// Wide ranges intended for sampling strategies.
    pub fn reference_ranges() -> Self {
        SearchSpace {
            axes: vec![
                axis(Knob::MinDisparity, range(0, 32, 1)),
                axis(Knob::NumDisparities, range(16, 128, 16)),
                axis(Knob::BlockSize, range(5, 21, 2)),
                axis(Knob::P1, range(8 * 3 * 5 * 5, 8 * 3 * 21 * 21, 1)),
                axis(Knob::P2, range(32 * 3 * 5 * 5, 32 * 3 * 21 * 21, 1)),
                axis(Knob::Disp12MaxDiff, range(1, 10, 1)),
                axis(Knob::UniquenessRatio, range(5, 20, 1)),
                axis(Knob::SpeckleWindowSize, range(50, 200, 1)),
                axis(Knob::SpeckleRange, range(1, 50, 1)),
                axis(
                    Knob::Mode,
                    Domain::modes([MatcherMode::Sgbm3Way, MatcherMode::Sgbm]),
                ),
            ],
        }
    }
}

fn axis(knob: Knob, domain: Domain) -> Axis {
    Axis { knob, domain }
}

fn range(low: i32, high: i32, step: i32) -> Domain {
    Domain::Range { low, high, step }
}

fn parse_value(knob: Knob, value: &Value) -> Result<KnobValue> {
    if knob.is_categorical() {
        let name = value
            .as_str()
            .ok_or_else(|| Error::config(format!("{} expects mode names, got {}", knob, value)))?;
        return Ok(KnobValue::Mode(name.parse()?));
    }
    value
        .as_i64()
        .and_then(|v| i32::try_from(v).ok())
        .map(KnobValue::Int)
        .ok_or_else(|| Error::config(format!("{} expects integers, got {}", knob, value)))
}

fn parse_int_field(knob: Knob, obj: &serde_json::Map<String, Value>, key: &str) -> Result<Option<i32>> {
    match obj.get(key) {
        None => Ok(None),
        Some(v) => v
            .as_i64()
            .and_then(|i| i32::try_from(i).ok())
            .map(Some)
            .ok_or_else(|| Error::config(format!("{}.{} must be an integer, got {}", knob, key, v))),
    }
}

fn parse_domain(knob: Knob, entry: &Value) -> Result<Domain> {
    match entry {
        Value::Array(items) => items
            .iter()
            .map(|v| parse_value(knob, v))
            .collect::<Result<Vec<_>>>()
            .map(Domain::Values),
        Value::Object(obj) => {
            if let Some(key) = obj.keys().find(|k| !matches!(k.as_str(), "low" | "high" | "step")) {
                return Err(Error::config(format!("{} range has unknown field {:?}", knob, key)));
            }
            let low = parse_int_field(knob, obj, "low")?;
            let high = parse_int_field(knob, obj, "high")?;
            let step = parse_int_field(knob, obj, "step")?.unwrap_or(1);
            match (low, high) {
                (Some(low), Some(high)) => Ok(Domain::Range { low, high, step }),
                _ => Err(Error::config(format!("{} range needs low and high", knob))),
            }
        }
        scalar => Ok(Domain::Values(vec![parse_value(knob, scalar)?])),
    }
}
