pub mod input;
pub mod layout;
pub mod phase;
pub mod stimulus;
pub mod trial;

pub use input::InputKey;
pub use layout::{GridCell, TrialLayout};
pub use phase::{Phase, SessionPhase};
pub use stimulus::{Corner, Glyph, PALETTE, PlacedItem, SearchDisplay, Stimulus, TargetShape};
pub use trial::{TrialRecord, TrialState, VibrationEvent, VibrationOutcome};
