//! Discrete zoom ladder — pure state, no I/O.
//!
//! Each `ZoomLevel` carries its own aperture geometry as constants. A
//! `ZoomSet` is the subset of levels a session may move between; stepping
//! is by intrinsic rank only, never by gesture magnitude.

use crate::config::Quality;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::ops::Bound::{Excluded, Unbounded};
use std::str::FromStr;

/// One rung of the zoom ladder, ordered by rank (`Xs` smallest aperture).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoomLevel {
    Xs = 0,
    S = 1,
    M = 2,
    L = 3,
    Xl = 4,
    Xxl = 5,
}

impl ZoomLevel {
    pub const ALL: [ZoomLevel; 6] = [
        ZoomLevel::Xs,
        ZoomLevel::S,
        ZoomLevel::M,
        ZoomLevel::L,
        ZoomLevel::Xl,
        ZoomLevel::Xxl,
    ];

    pub fn rank(self) -> u8 {
        self as u8
    }

    /// Side of the aperture in display points.
    pub fn aperture_size(self) -> f64 {
        match self {
            ZoomLevel::Xs => 5.0,
            ZoomLevel::S => 7.0,
            ZoomLevel::M => 11.0,
            ZoomLevel::L => 13.0,
            ZoomLevel::Xl => 17.0,
            ZoomLevel::Xxl => 21.0,
        }
    }

    /// Loupe points per captured pixel at the given quality.
    pub fn pixel_zoom(self, quality: Quality) -> f64 {
        self.aperture_size() * quality.multiplier()
    }

    pub fn aperture_line_width(self) -> f64 {
        match self {
            ZoomLevel::Xs | ZoomLevel::S => 0.75,
            ZoomLevel::M | ZoomLevel::L => 1.25,
            ZoomLevel::Xl | ZoomLevel::Xxl => 1.75,
        }
    }

    pub fn inset_amount(self) -> f64 {
        match self {
            ZoomLevel::Xs | ZoomLevel::S => 0.5,
            ZoomLevel::M | ZoomLevel::L => 1.0,
            ZoomLevel::Xl | ZoomLevel::Xxl => 1.5,
        }
    }

    pub fn square_pattern_size(self) -> f64 {
        let factor = match self {
            ZoomLevel::Xs | ZoomLevel::S => 0.96,
            ZoomLevel::M | ZoomLevel::L => 0.90,
            ZoomLevel::Xl => 0.84,
            ZoomLevel::Xxl => 0.86,
        };
        self.aperture_size() * factor
    }

    pub fn square_pattern_displacement(self) -> f64 {
        match self {
            ZoomLevel::Xs | ZoomLevel::S => 0.0,
            ZoomLevel::M | ZoomLevel::L => 0.02,
            ZoomLevel::Xl | ZoomLevel::Xxl => 0.06,
        }
    }

    /// Smallest level in `allowed` ranked strictly above `self`.
    pub fn next(self, allowed: &ZoomSet) -> Option<ZoomLevel> {
        next(self, allowed.levels())
    }

    /// Largest level in `allowed` ranked strictly below `self`.
    pub fn previous(self, allowed: &ZoomSet) -> Option<ZoomLevel> {
        previous(self, allowed.levels())
    }
}

impl fmt::Display for ZoomLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ZoomLevel::Xs => "xs",
            ZoomLevel::S => "s",
            ZoomLevel::M => "m",
            ZoomLevel::L => "l",
            ZoomLevel::Xl => "xl",
            ZoomLevel::Xxl => "xxl",
        };
        f.write_str(name)
    }
}

impl FromStr for ZoomLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ZoomLevel::ALL
            .into_iter()
            .find(|level| level.to_string().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown zoom level '{}'", s))
    }
}

pub fn next(current: ZoomLevel, allowed: &BTreeSet<ZoomLevel>) -> Option<ZoomLevel> {
    allowed.range((Excluded(current), Unbounded)).next().copied()
}

pub fn previous(current: ZoomLevel, allowed: &BTreeSet<ZoomLevel>) -> Option<ZoomLevel> {
    allowed.range(..current).next_back().copied()
}

/// Levels enabled for a session. Never empty: the default is always a member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ZoomSetRepr")]
pub struct ZoomSet {
    levels: BTreeSet<ZoomLevel>,
    default: ZoomLevel,
}

#[derive(Deserialize)]
struct ZoomSetRepr {
    #[serde(default)]
    levels: BTreeSet<ZoomLevel>,
    #[serde(default = "default_zoom")]
    default: ZoomLevel,
}

fn default_zoom() -> ZoomLevel {
    ZoomLevel::M
}

impl From<ZoomSetRepr> for ZoomSet {
    fn from(repr: ZoomSetRepr) -> Self {
        ZoomSet::new(repr.levels, repr.default)
    }
}

impl Default for ZoomSet {
    fn default() -> Self {
        ZoomSet::new(ZoomLevel::ALL, default_zoom())
    }
}

impl ZoomSet {
    pub fn new(levels: impl IntoIterator<Item = ZoomLevel>, default: ZoomLevel) -> Self {
        let mut levels: BTreeSet<ZoomLevel> = levels.into_iter().collect();
        levels.insert(default);
        Self { levels, default }
    }

    /// A set that pins the loupe to a single level.
    pub fn fixed(level: ZoomLevel) -> Self {
        ZoomSet::new([], level)
    }

    pub fn levels(&self) -> &BTreeSet<ZoomLevel> {
        &self.levels
    }

    pub fn default_level(&self) -> ZoomLevel {
        self.default
    }

    pub fn contains(&self, level: ZoomLevel) -> bool {
        self.levels.contains(&level)
    }

    /// Replace the allowed levels; the default stays a member.
    pub fn set_levels(&mut self, levels: impl IntoIterator<Item = ZoomLevel>) {
        self.levels = levels.into_iter().collect();
        self.levels.insert(self.default);
    }

    /// Change the default, adding it to the allowed levels if missing.
    pub fn set_default(&mut self, level: ZoomLevel) {
        self.default = level;
        self.levels.insert(level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sml() -> ZoomSet {
        ZoomSet::new([ZoomLevel::S, ZoomLevel::M, ZoomLevel::L], ZoomLevel::M)
    }

    #[test]
    fn next_and_previous_from_middle() {
        let set = sml();
        assert_eq!(ZoomLevel::M.next(&set), Some(ZoomLevel::L));
        assert_eq!(ZoomLevel::M.previous(&set), Some(ZoomLevel::S));
        assert_eq!(ZoomLevel::L.next(&set), None);
        assert_eq!(ZoomLevel::S.previous(&set), None);
    }

    #[test]
    fn steps_skip_disabled_levels() {
        let set = ZoomSet::new([ZoomLevel::Xs, ZoomLevel::Xxl], ZoomLevel::Xs);
        assert_eq!(ZoomLevel::Xs.next(&set), Some(ZoomLevel::Xxl));
        assert_eq!(ZoomLevel::Xxl.previous(&set), Some(ZoomLevel::Xs));
    }

    #[test]
    fn next_then_previous_round_trips() {
        let set = ZoomSet::default();
        for level in set.levels().iter().copied() {
            if let Some(up) = level.next(&set) {
                assert_eq!(up.previous(&set), Some(level));
            } else {
                assert_eq!(level, ZoomLevel::Xxl);
            }
            if let Some(down) = level.previous(&set) {
                assert_eq!(down.next(&set), Some(level));
            } else {
                assert_eq!(level, ZoomLevel::Xs);
            }
        }
    }

    #[test]
    fn single_level_never_moves() {
        let set = ZoomSet::fixed(ZoomLevel::L);
        assert_eq!(ZoomLevel::L.next(&set), None);
        assert_eq!(ZoomLevel::L.previous(&set), None);
    }

    #[test]
    fn current_outside_set_still_steps() {
        let set = ZoomSet::new([ZoomLevel::Xs, ZoomLevel::Xl], ZoomLevel::Xs);
        assert_eq!(ZoomLevel::M.next(&set), Some(ZoomLevel::Xl));
        assert_eq!(ZoomLevel::M.previous(&set), Some(ZoomLevel::Xs));
    }

    #[test]
    fn aperture_grows_with_rank() {
        let sizes: Vec<f64> = ZoomLevel::ALL.iter().map(|z| z.aperture_size()).collect();
        assert!(sizes.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn default_is_always_allowed() {
        let mut set = ZoomSet::new([ZoomLevel::S], ZoomLevel::M);
        assert!(set.contains(ZoomLevel::M));

        set.set_levels([ZoomLevel::Xl]);
        assert!(set.contains(ZoomLevel::M));
        assert!(!set.contains(ZoomLevel::S));

        set.set_default(ZoomLevel::Xxl);
        assert_eq!(set.default_level(), ZoomLevel::Xxl);
        assert!(set.contains(ZoomLevel::Xxl));
    }

    #[test]
    fn deserialize_inserts_default() {
        let set: ZoomSet = serde_json::from_str(r#"{"levels":["xs","l"],"default":"xxl"}"#).unwrap();
        assert_eq!(set.levels().len(), 3);
        assert!(set.contains(ZoomLevel::Xxl));
    }

    #[test]
    fn parse_level_names() {
        assert_eq!("XL".parse::<ZoomLevel>(), Ok(ZoomLevel::Xl));
        assert!("huge".parse::<ZoomLevel>().is_err());
    }
}
