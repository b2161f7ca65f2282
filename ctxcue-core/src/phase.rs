/// Defines session phases and behavior
pub trait Phase: Copy + Clone + PartialEq + Send + Sync + std::fmt::Debug + Default {
    fn allows_input(&self) -> bool;
    fn requires_calibration(&self) -> bool;
    fn next(&self) -> Option<Self>;

    fn is_welcome(&self) -> bool {
        false
    }
    fn is_threshold(&self) -> bool {
        false
    }
    fn is_search(&self) -> bool {
        false
    }
}

#[derive(Copy, Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Welcome,
    Calibration,
    Threshold,
    Instructions,
    Search,
    BlockBreak,
    Debrief,
}

impl Phase for SessionPhase {
    fn allows_input(&self) -> bool {
        !matches!(self, Self::Calibration)
    }

    fn requires_calibration(&self) -> bool {
        matches!(self, Self::Calibration)
    }

    fn next(&self) -> Option<Self> {
        use SessionPhase::*;
        Some(match self {
            Welcome => Calibration,
            Calibration => Threshold,
            Threshold => Instructions,
            Instructions => Search,
            // A break always returns to the search task; the session decides
            // when the search task itself is over.
            BlockBreak => Search,
            Search => Debrief,
            Debrief => return None,
        })
    }

    fn is_welcome(&self) -> bool {
        matches!(self, Self::Welcome)
    }

    fn is_threshold(&self) -> bool {
        matches!(self, Self::Threshold)
    }

    fn is_search(&self) -> bool {
        matches!(self, Self::Search)
    }
}
