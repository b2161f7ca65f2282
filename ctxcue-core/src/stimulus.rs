use crate::layout::GridCell;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Defines stimuli and their render data
pub trait Stimulus: Clone + Send + Sync + std::fmt::Debug {
    fn cache_id(&self) -> usize;
    fn is_target(&self) -> bool;
}

/// Non-diagnostic item colours shared by targets and distractors.
pub const PALETTE: [[u8; 4]; 4] = [
    [235, 232, 82, 255],  // yellow
    [236, 121, 86, 255],  // orange
    [126, 196, 125, 255], // green
    [120, 190, 220, 255], // blue
];

/// Rotated T target. The name gives the side the stem points to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetShape {
    #[serde(rename = "T_left")]
    Left,
    #[serde(rename = "T_right")]
    Right,
}

impl TargetShape {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetShape::Left => "T_left",
            TargetShape::Right => "T_right",
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            TargetShape::Left => TargetShape::Right,
            TargetShape::Right => TargetShape::Left,
        }
    }
}

impl fmt::Display for TargetShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetShape {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "T_left" => Ok(TargetShape::Left),
            "T_right" => Ok(TargetShape::Right),
            other => Err(format!("unknown target shape '{other}'")),
        }
    }
}

/// Corner orientation of an L distractor: the two directions its arms extend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Corner {
    #[serde(rename = "ul")]
    UpLeft,
    #[serde(rename = "ur")]
    UpRight,
    #[serde(rename = "dl")]
    DownLeft,
    #[serde(rename = "dr")]
    DownRight,
}

impl Corner {
    pub const ALL: [Corner; 4] = [
        Corner::UpLeft,
        Corner::UpRight,
        Corner::DownLeft,
        Corner::DownRight,
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            Corner::UpLeft => "ul",
            Corner::UpRight => "ur",
            Corner::DownLeft => "dl",
            Corner::DownRight => "dr",
        }
    }
}

impl FromStr for Corner {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Corner::ALL
            .into_iter()
            .find(|c| c.tag() == s.trim())
            .ok_or_else(|| format!("unknown L orientation '{}'", s.trim()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Glyph {
    Target(TargetShape),
    Distractor(Corner),
}

impl Glyph {
    pub const COUNT: usize = 6;
}

impl Stimulus for Glyph {
    fn cache_id(&self) -> usize {
        match self {
            Glyph::Target(TargetShape::Left) => 0,
            Glyph::Target(TargetShape::Right) => 1,
            Glyph::Distractor(corner) => 2 + *corner as usize,
        }
    }

    fn is_target(&self) -> bool {
        matches!(self, Glyph::Target(_))
    }
}

/// One item of a search display, with its colour as an index into [`PALETTE`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacedItem {
    pub cell: GridCell,
    pub glyph: Glyph,
    pub color: usize,
}

impl PlacedItem {
    pub fn rgba(&self) -> [u8; 4] {
        PALETTE[self.color % PALETTE.len()]
    }
}

/// A fully resolved display: distractors first, target last, so the target
/// is drawn on top.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchDisplay {
    pub items: Vec<PlacedItem>,
}

impl SearchDisplay {
    pub fn target(&self) -> Option<&PlacedItem> {
        self.items.iter().find(|item| item.glyph.is_target())
    }
}
