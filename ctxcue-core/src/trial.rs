use crate::stimulus::TargetShape;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Trial state machine events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialState {
    Fixation,
    Search,
    Complete,
}

/// Where a vibration landed relative to the search response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VibrationOutcome {
    BeforeResponse,
    AfterResponse,
    NotDelivered,
}

impl fmt::Display for VibrationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VibrationOutcome::BeforeResponse => "before_response",
            VibrationOutcome::AfterResponse => "after_response",
            VibrationOutcome::NotDelivered => "not_delivered",
        })
    }
}

/// A scheduled vibration, relative to search onset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VibrationEvent {
    pub scheduled_ms: f64,
    /// Time the device was actually triggered, if it was.
    pub fired_ms: Option<f64>,
    pub outcome: VibrationOutcome,
}

/// Recorded result per trial. Times are milliseconds from search onset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub trial_num: usize,
    pub block: usize,
    pub context_id: String,
    pub is_old: bool,
    pub target_shape: TargetShape,
    pub response: Option<TargetShape>,
    pub correct: bool,
    pub rt_ms: Option<f64>,
    pub vibration_scheduled: bool,
    pub vibration_delay_ms: Option<f64>,
    pub vibration_time_ms: Option<f64>,
    pub vibration_outcome: Option<VibrationOutcome>,
    pub rt_minus_vibration_ms: Option<f64>,
    pub vibration_reported: bool,
    pub vibration_report_rt_ms: Option<f64>,
}

impl TrialRecord {
    pub fn vibration_event(&self) -> Option<VibrationEvent> {
        Some(VibrationEvent {
            scheduled_ms: self.vibration_delay_ms?,
            fired_ms: self.vibration_time_ms,
            outcome: self.vibration_outcome?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> TrialRecord {
        TrialRecord {
            trial_num: 4,
            block: 0,
            context_id: "12".to_string(),
            is_old: true,
            target_shape: TargetShape::Left,
            response: Some(TargetShape::Left),
            correct: true,
            rt_ms: Some(900.0),
            vibration_scheduled: false,
            vibration_delay_ms: None,
            vibration_time_ms: None,
            vibration_outcome: None,
            rt_minus_vibration_ms: None,
            vibration_reported: false,
            vibration_report_rt_ms: None,
        }
    }

    #[test]
    fn uncued_trials_have_no_vibration_event() {
        assert_eq!(record().vibration_event(), None);
    }

    #[test]
    fn vibration_event_is_rebuilt_from_the_row() {
        let mut r = record();
        r.vibration_scheduled = true;
        r.vibration_delay_ms = Some(600.0);
        r.vibration_outcome = Some(VibrationOutcome::AfterResponse);
        assert_eq!(
            r.vibration_event(),
            Some(VibrationEvent {
                scheduled_ms: 600.0,
                fired_ms: None,
                outcome: VibrationOutcome::AfterResponse,
            })
        );
    }
}
