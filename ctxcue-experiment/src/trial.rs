use ctxcue_core::{SearchDisplay, TargetShape, TrialState};
use std::time::Duration;

/// A search trial in progress.
#[derive(Debug, Clone)]
pub struct SearchTrial<T> {
    pub index: usize,
    pub block: usize,
    pub layout: usize,
    pub display: SearchDisplay,
    /// Cue delay from search onset, for trials that carry a cue.
    pub vibration_delay: Option<Duration>,
    pub durations: TrialDurations,
    pub timestamps: TrialTimestamps<T>,
    pub response: Option<TargetShape>,
    /// The device refused the pulse; it is not retried within the trial.
    pub delivery_failed: bool,
    pub state: TrialState,
}

impl<T> SearchTrial<T> {
    pub fn vibrates(&self) -> bool {
        self.vibration_delay.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct TrialDurations {
    pub fixation_ms: u64,
    pub response_window_ms: u64,
}

#[derive(Debug, Clone)]
pub struct TrialTimestamps<T> {
    pub start: T,
    pub search_start: Option<T>,
    pub vibration: Option<T>,
    pub response: Option<T>,
    pub vibration_report: Option<T>,
}

/// One pulse of the detection staircase.
#[derive(Debug, Clone)]
pub struct ThresholdProbe<T> {
    pub intensity: u8,
    pub due: T,
    pub pulse: Option<T>,
}
