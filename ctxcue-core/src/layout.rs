use crate::stimulus::{Corner, TargetShape};
use serde::{Deserialize, Serialize};

/// Cell of the search grid, in tile units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridCell {
    pub x: u32,
    pub y: u32,
}

impl GridCell {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// A pre-generated search layout. Repeated ("old") layouts share a
/// `context_id` across blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialLayout {
    pub context_id: String,
    pub is_old: bool,
    pub target: GridCell,
    pub target_shape: TargetShape,
    /// Stored orientation is kept for reference; presentation re-randomises it.
    pub distractors: Vec<(GridCell, Corner)>,
}

impl TrialLayout {
    pub fn condition(&self) -> &'static str {
        if self.is_old { "old" } else { "new" }
    }
}
