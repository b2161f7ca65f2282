//! Vibration detection staircase.
//!
//! Run before the search task to find an intensity the participant can feel.
//! Felt pulses lower the intensity, missed pulses raise it; the threshold is
//! the mean intensity over the last few reversals.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdParams {
    pub start_intensity: u8,
    pub trials: usize,
    pub step: u8,
    pub min_intensity: u8,
    pub max_intensity: u8,
    pub reversals_averaged: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Down,
    Up,
}

/// One row of the detection log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRow {
    pub response: u8,
    pub intensity: u8,
    pub phase: String,
    pub timestamp: String,
}

#[derive(Debug, Clone)]
pub struct DetectionStaircase {
    params: ThresholdParams,
    intensity: u8,
    completed: usize,
    previous: Option<Direction>,
    reversals: Vec<u8>,
}

impl DetectionStaircase {
    pub fn new(params: ThresholdParams) -> Self {
        let intensity = params
            .start_intensity
            .clamp(params.min_intensity, params.max_intensity);
        Self {
            params,
            intensity,
            completed: 0,
            previous: None,
            reversals: Vec::new(),
        }
    }

    /// Intensity for the next pulse.
    pub fn intensity(&self) -> u8 {
        self.intensity
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn total(&self) -> usize {
        self.params.trials
    }

    pub fn is_complete(&self) -> bool {
        self.completed >= self.params.trials
    }

    pub fn reversals(&self) -> &[u8] {
        &self.reversals
    }

    /// Record whether the last pulse was felt; returns the next intensity.
    pub fn record(&mut self, felt: bool) -> u8 {
        let direction = if felt { Direction::Down } else { Direction::Up };
        let next = match direction {
            Direction::Down => self
                .intensity
                .saturating_sub(self.params.step)
                .max(self.params.min_intensity),
            Direction::Up => self
                .intensity
                .saturating_add(self.params.step)
                .min(self.params.max_intensity),
        };
        if self.previous.is_some_and(|prev| prev != direction) {
            self.reversals.push(self.intensity);
        }
        self.previous = Some(direction);
        self.intensity = next;
        self.completed += 1;
        next
    }

    /// Mean of the last reversal intensities, or the current intensity when
    /// there were no reversals.
    pub fn threshold(&self) -> f64 {
        let n = self.params.reversals_averaged.min(self.reversals.len());
        if n == 0 {
            return self.intensity as f64;
        }
        let tail = &self.reversals[self.reversals.len() - n..];
        tail.iter().map(|&i| i as f64).sum::<f64>() / n as f64
    }

    /// Intensity used for cues during the search task: the threshold plus
    /// half a unit, rounded half-to-even.
    pub fn working_intensity(&self) -> u8 {
        (self.threshold() + 0.5)
            .round_ties_even()
            .clamp(0.0, u8::MAX as f64) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ThresholdParams {
        ThresholdParams {
            start_intensity: 5,
            trials: 15,
            step: 1,
            min_intensity: 2,
            max_intensity: 10,
            reversals_averaged: 6,
        }
    }

    #[test]
    fn felt_lowers_and_missed_raises() {
        let mut s = DetectionStaircase::new(params());
        assert_eq!(s.record(true), 4);
        assert_eq!(s.record(true), 3);
        assert_eq!(s.record(false), 4);
        assert_eq!(s.reversals(), &[3]);
        assert_eq!(s.completed(), 3);
    }

    #[test]
    fn intensity_stays_in_bounds() {
        let mut s = DetectionStaircase::new(params());
        for _ in 0..10 {
            s.record(true);
        }
        assert_eq!(s.intensity(), 2);
        for _ in 0..20 {
            s.record(false);
        }
        assert_eq!(s.intensity(), 10);
    }

    #[test]
    fn threshold_averages_last_reversals() {
        let mut s = DetectionStaircase::new(params());
        // 5 -> 4 -> 5 -> 4 -> 5 ... alternating gives a reversal each trial.
        for i in 0..15 {
            s.record(i % 2 == 0);
        }
        assert!(s.is_complete());
        assert_eq!(s.reversals().len(), 14);
        // last six reversals alternate 4 and 5
        assert_eq!(s.threshold(), 4.5);
        assert_eq!(s.working_intensity(), 5);
    }

    #[test]
    fn no_reversals_uses_current_intensity() {
        let mut s = DetectionStaircase::new(params());
        s.record(true);
        s.record(true);
        assert_eq!(s.threshold(), 3.0);
        // 3.5 rounds to even
        assert_eq!(s.working_intensity(), 4);
    }

    #[test]
    fn working_intensity_rounds_half_to_even() {
        let mut s = DetectionStaircase::new(params());
        s.record(true); // 4, no reversal yet
        assert_eq!(s.threshold(), 4.0);
        assert_eq!(s.working_intensity(), 4);
    }
}
