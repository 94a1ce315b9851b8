//! Typed matcher configuration.
//!
//! Knob names follow the conventional semi-global block matching names
//! (`minDisparity`, `blockSize`, `P1`, ...) so grid files written for other
//! tools read unchanged.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Aggregation path set used by the matcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatcherMode {
    /// Five single-pass directions.
    #[serde(rename = "SGBM")]
    Sgbm,
    /// All eight directions.
    #[serde(rename = "HH")]
    Hh,
    /// Three directions, fastest.
    #[serde(rename = "SGBM_3WAY")]
    Sgbm3Way,
    /// The four axis-aligned directions.
    #[serde(rename = "HH4")]
    Hh4,
}

impl MatcherMode {
    pub const ALL: [MatcherMode; 4] = [
        MatcherMode::Sgbm,
        MatcherMode::Hh,
        MatcherMode::Sgbm3Way,
        MatcherMode::Hh4,
    ];

    pub fn name(self) -> &'static str {
        match self {
            MatcherMode::Sgbm => "SGBM",
            MatcherMode::Hh => "HH",
            MatcherMode::Sgbm3Way => "SGBM_3WAY",
            MatcherMode::Hh4 => "HH4",
        }
    }
}

impl fmt::Display for MatcherMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MatcherMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        MatcherMode::ALL
            .iter()
            .copied()
            .find(|m| m.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::config(format!("unknown mode {:?}", s)))
    }
}

/// A single tunable field of [`StereoParams`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Knob {
    MinDisparity,
    NumDisparities,
    BlockSize,
    P1,
    P2,
    Disp12MaxDiff,
    UniquenessRatio,
    SpeckleWindowSize,
    SpeckleRange,
    Mode,
}

impl Knob {
    pub const ALL: [Knob; 10] = [
        Knob::MinDisparity,
        Knob::NumDisparities,
        Knob::BlockSize,
        Knob::P1,
        Knob::P2,
        Knob::Disp12MaxDiff,
        Knob::UniquenessRatio,
        Knob::SpeckleWindowSize,
        Knob::SpeckleRange,
        Knob::Mode,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Knob::MinDisparity => "minDisparity",
            Knob::NumDisparities => "numDisparities",
            Knob::BlockSize => "blockSize",
            Knob::P1 => "P1",
            Knob::P2 => "P2",
            Knob::Disp12MaxDiff => "disp12MaxDiff",
            Knob::UniquenessRatio => "uniquenessRatio",
            Knob::SpeckleWindowSize => "speckleWindowSize",
            Knob::SpeckleRange => "speckleRange",
            Knob::Mode => "mode",
        }
    }

    pub fn is_categorical(self) -> bool {
        self == Knob::Mode
    }
}

impl fmt::Display for Knob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Knob {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Knob::ALL
            .iter()
            .copied()
            .find(|k| k.name() == s)
            .ok_or_else(|| Error::config(format!("unknown knob {:?}", s)))
    }
}

/// A concrete value for one knob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KnobValue {
    Int(i32),
    Mode(MatcherMode),
}

impl fmt::Display for KnobValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KnobValue::Int(v) => write!(f, "{}", v),
            KnobValue::Mode(m) => write!(f, "{}", m),
        }
    }
}

/// Matcher configuration. `p1`/`p2` left unset derive from the block size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct StereoParams {
    pub min_disparity: i32,
    pub num_disparities: i32,
    pub block_size: i32,
    #[serde(rename = "P1", skip_serializing_if = "Option::is_none")]
    pub p1: Option<i32>,
    #[serde(rename = "P2", skip_serializing_if = "Option::is_none")]
    pub p2: Option<i32>,
    #[serde(rename = "disp12MaxDiff")]
    pub disp12_max_diff: i32,
    pub uniqueness_ratio: i32,
    pub speckle_window_size: i32,
    pub speckle_range: i32,
    pub mode: MatcherMode,
}

impl Default for StereoParams {
    fn default() -> Self {
        StereoParams {
            min_disparity: 0,
            num_disparities: 16,
            block_size: 5,
            p1: None,
            p2: None,
            disp12_max_diff: 1,
            uniqueness_ratio: 10,
            speckle_window_size: 50,
            speckle_range: 1,
            mode: MatcherMode::Sgbm3Way,
        }
    }
}

impl StereoParams {
    fn window_area(&self) -> i32 {
        self.block_size.saturating_mul(self.block_size)
    }

    /// Value the matcher reports for pixels without a match, in pixels.
    pub fn unmatched_disparity(&self) -> f32 {
        self.min_disparity as f32 - 1.0
    }

    /// Small-change penalty, `8 * 3 * blockSize^2` unless set.
    pub fn effective_p1(&self) -> i32 {
        self.p1
            .unwrap_or_else(|| self.window_area().saturating_mul(8 * 3))
    }

    /// Large-change penalty, `32 * 3 * blockSize^2` unless set.
    pub fn effective_p2(&self) -> i32 {
        self.p2
            .unwrap_or_else(|| self.window_area().saturating_mul(32 * 3))
    }

    pub fn get(&self, knob: Knob) -> KnobValue {
        match knob {
            Knob::MinDisparity => KnobValue::Int(self.min_disparity),
            Knob::NumDisparities => KnobValue::Int(self.num_disparities),
            Knob::BlockSize => KnobValue::Int(self.block_size),
            Knob::P1 => KnobValue::Int(self.effective_p1()),
            Knob::P2 => KnobValue::Int(self.effective_p2()),
            Knob::Disp12MaxDiff => KnobValue::Int(self.disp12_max_diff),
            Knob::UniquenessRatio => KnobValue::Int(self.uniqueness_ratio),
            Knob::SpeckleWindowSize => KnobValue::Int(self.speckle_window_size),
            Knob::SpeckleRange => KnobValue::Int(self.speckle_range),
            Knob::Mode => KnobValue::Mode(self.mode),
        }
    }

    /// Assign one knob, rejecting a value of the wrong kind.
    pub fn set(&mut self, knob: Knob, value: KnobValue) -> Result<()> {
        match (knob, value) {
            (Knob::Mode, KnobValue::Mode(m)) => self.mode = m,
            (Knob::Mode, KnobValue::Int(v)) => {
                return Err(Error::config(format!("mode expects a name, got {}", v)))
            }
            (other, KnobValue::Mode(m)) => {
                return Err(Error::config(format!(
                    "{} expects an integer, got {}",
                    other, m
                )))
            }
            (Knob::MinDisparity, KnobValue::Int(v)) => self.min_disparity = v,
            (Knob::NumDisparities, KnobValue::Int(v)) => self.num_disparities = v,
            (Knob::BlockSize, KnobValue::Int(v)) => self.block_size = v,
            (Knob::P1, KnobValue::Int(v)) => self.p1 = Some(v),
            (Knob::P2, KnobValue::Int(v)) => self.p2 = Some(v),
            (Knob::Disp12MaxDiff, KnobValue::Int(v)) => self.disp12_max_diff = v,
            (Knob::UniquenessRatio, KnobValue::Int(v)) => self.uniqueness_ratio = v,
            (Knob::SpeckleWindowSize, KnobValue::Int(v)) => self.speckle_window_size = v,
            (Knob::SpeckleRange, KnobValue::Int(v)) => self.speckle_range = v,
        }
        Ok(())
    }

    /// Copy with `overrides` applied in order.
    pub fn with(&self, overrides: &[(Knob, KnobValue)]) -> Result<StereoParams> {
        let mut params = *self;
        for &(knob, value) in overrides {
            params.set(knob, value)?;
        }
        Ok(params)
    }
}

impl fmt::Display for StereoParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, knob) in Knob::ALL.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}={}", knob, self.get(*knob))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmatched_sits_below_the_search_range() {
        let params = StereoParams {
            min_disparity: 16,
            ..StereoParams::default()
        };
        assert_eq!(params.unmatched_disparity(), 15.0);
        assert_eq!(StereoParams::default().unmatched_disparity(), -1.0);
    }

    #[test]
    fn defaults_match_documented_table() {
        let p = StereoParams::default();
        assert_eq!(p.min_disparity, 0);
        assert_eq!(p.num_disparities, 16);
        assert_eq!(p.block_size, 5);
        assert_eq!(p.effective_p1(), 8 * 3 * 25);
        assert_eq!(p.effective_p2(), 32 * 3 * 25);
        assert_eq!(p.disp12_max_diff, 1);
        assert_eq!(p.uniqueness_ratio, 10);
        assert_eq!(p.speckle_window_size, 50);
        assert_eq!(p.speckle_range, 1);
        assert_eq!(p.mode, MatcherMode::Sgbm3Way);
    }

    #[test]
    fn penalties_follow_block_size_until_set() {
        let mut p = StereoParams::default();
        p.set(Knob::BlockSize, KnobValue::Int(7)).unwrap();
        assert_eq!(p.effective_p1(), 8 * 3 * 49);
        p.set(Knob::P1, KnobValue::Int(100)).unwrap();
        assert_eq!(p.effective_p1(), 100);
        assert_eq!(p.effective_p2(), 32 * 3 * 49);
    }

    #[test]
    fn knob_names_round_trip() {
        for knob in Knob::ALL.iter() {
            assert_eq!(knob.name().parse::<Knob>().unwrap(), *knob);
        }
        assert!(matches!(
            "windowSize".parse::<Knob>(),
            Err(Error::ConfigurationInvalid(_))
        ));
    }

    #[test]
    fn set_rejects_wrong_value_kind() {
        let mut p = StereoParams::default();
        assert!(p.set(Knob::Mode, KnobValue::Int(2)).is_err());
        assert!(p
            .set(Knob::BlockSize, KnobValue::Mode(MatcherMode::Hh))
            .is_err());
    }

    #[test]
    fn serializes_with_conventional_names() {
        let p = StereoParams {
            p1: Some(600),
            mode: MatcherMode::Sgbm,
            ..StereoParams::default()
        };
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["blockSize"], 5);
        assert_eq!(json["P1"], 600);
        assert!(json.get("P2").is_none());
        assert_eq!(json["mode"], "SGBM");

        let back: StereoParams = serde_json::from_value(json).unwrap();
        assert_eq!(back, p);

        let unknown = serde_json::json!({ "windowSize": 7 });
        assert!(serde_json::from_value::<StereoParams>(unknown).is_err());
    }

    #[test]
    fn display_lists_every_knob() {
        let text = StereoParams::default().to_string();
        assert!(text.starts_with("minDisparity=0 numDisparities=16 blockSize=5"));
        assert!(text.ends_with("mode=SGBM_3WAY"));
    }
}
