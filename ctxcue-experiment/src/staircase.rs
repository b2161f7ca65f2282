//! Response-timing staircase.
//!
//! Adapts the delay (from search onset) at which the vibration cue fires so
//! that it lands just before the participant's response. One-up/one-down:
//! a cue that fired comfortably before the response moves the next cue later,
//! a cue that came after the response moves it earlier.

use crate::error::StaircaseError;
use ctxcue_core::VibrationOutcome;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct StaircaseParams {
    pub initial_delay: Duration,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub step: Duration,
    /// A before-response margin must exceed this to move the delay later.
    pub tolerance: Duration,
    /// Applied to the step on every reversal; 1.0 disables shrinking.
    pub shrink_factor: f64,
    pub min_step: Duration,
}

impl StaircaseParams {
    pub fn validate(&self) -> Result<(), StaircaseError> {
        if self.min_delay > self.max_delay {
            return Err(StaircaseError::InvalidParams(format!(
                "min delay {:?} exceeds max delay {:?}",
                self.min_delay, self.max_delay
            )));
        }
        if self.step.is_zero() {
            return Err(StaircaseError::InvalidParams("step must be positive".into()));
        }
        if !(self.shrink_factor > 0.0 && self.shrink_factor <= 1.0) {
            return Err(StaircaseError::InvalidParams(format!(
                "shrink factor {} outside (0, 1]",
                self.shrink_factor
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Adjustment {
    Later,
    Earlier,
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaircasePhase {
    /// No update applied yet; the initial delay is in use.
    Initializing,
    Adjusting,
    Finalized,
}

/// What a single update did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StaircaseUpdate {
    pub outcome: VibrationOutcome,
    pub adjustment: Adjustment,
    pub previous_delay: Duration,
    pub next_delay: Duration,
    /// Step size after this update.
    pub step: Duration,
    pub reversal: bool,
}

/// Final state written at session end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaircaseSummary {
    pub final_delay_ms: f64,
    pub final_step_ms: f64,
    pub updates: usize,
    pub reversals: usize,
    pub reversal_delays_ms: Vec<f64>,
    pub mean_reversal_delay_ms: Option<f64>,
}

/// Classify where a cue landed relative to the response.
///
/// A cue that was not delivered because the response came first counts as
/// after-response. Device failures and timeouts carry no timing information.
pub fn classify(
    scheduled: Duration,
    response: Option<Duration>,
    delivered: bool,
) -> VibrationOutcome {
    match (delivered, response) {
        (true, Some(rt)) if scheduled < rt => VibrationOutcome::BeforeResponse,
        (true, Some(_)) => VibrationOutcome::AfterResponse,
        (true, None) => VibrationOutcome::NotDelivered,
        (false, Some(rt)) if scheduled >= rt => VibrationOutcome::AfterResponse,
        (false, _) => VibrationOutcome::NotDelivered,
    }
}

#[derive(Debug, Clone)]
pub struct ResponseTimingStaircase {
    params: StaircaseParams,
    delay: Duration,
    step: Duration,
    phase: StaircasePhase,
    last_direction: Option<Adjustment>,
    consecutive_before: u32,
    consecutive_after: u32,
    reversal_delays: Vec<Duration>,
    updates: usize,
}

impl ResponseTimingStaircase {
    pub fn new(params: StaircaseParams) -> Result<Self, StaircaseError> {
        params.validate()?;
        let delay = params.initial_delay.clamp(params.min_delay, params.max_delay);
        Ok(Self {
            delay,
            step: params.step,
            params,
            phase: StaircasePhase::Initializing,
            last_direction: None,
            consecutive_before: 0,
            consecutive_after: 0,
            reversal_delays: Vec::new(),
            updates: 0,
        })
    }

    /// Delay to schedule on the next vibration trial.
    pub fn next_delay(&self) -> Duration {
        self.delay
    }

    pub fn step(&self) -> Duration {
        self.step
    }

    pub fn phase(&self) -> StaircasePhase {
        self.phase
    }

    pub fn params(&self) -> &StaircaseParams {
        &self.params
    }

    pub fn updates(&self) -> usize {
        self.updates
    }

    pub fn reversals(&self) -> usize {
        self.reversal_delays.len()
    }

    pub fn consecutive_before(&self) -> u32 {
        self.consecutive_before
    }

    pub fn consecutive_after(&self) -> u32 {
        self.consecutive_after
    }

    /// Apply one vibration trial's outcome and return the decision.
    pub fn update(
        &mut self,
        scheduled: Duration,
        response: Option<Duration>,
        delivered: bool,
    ) -> Result<StaircaseUpdate, StaircaseError> {
        if self.phase == StaircasePhase::Finalized {
            return Err(StaircaseError::Finalized {
                updates: self.updates,
            });
        }

        let outcome = classify(scheduled, response, delivered);
        let adjustment = match (outcome, response) {
            (VibrationOutcome::BeforeResponse, Some(rt))
                if rt.saturating_sub(scheduled) > self.params.tolerance =>
            {
                Adjustment::Later
            }
            (VibrationOutcome::AfterResponse, _) => Adjustment::Earlier,
            _ => Adjustment::Hold,
        };

        match outcome {
            VibrationOutcome::BeforeResponse => {
                self.consecutive_before += 1;
                self.consecutive_after = 0;
            }
            VibrationOutcome::AfterResponse => {
                self.consecutive_after += 1;
                self.consecutive_before = 0;
            }
            VibrationOutcome::NotDelivered => {}
        }

        let previous_delay = self.delay;
        let mut reversal = false;
        if adjustment != Adjustment::Hold {
            if self.last_direction.is_some_and(|last| last != adjustment) {
                reversal = true;
                self.reversal_delays.push(previous_delay);
                let shrunk = Duration::from_nanos(
                    (self.step.as_nanos() as f64 * self.params.shrink_factor).round() as u64,
                );
                self.step = shrunk.max(self.params.min_step.min(self.step));
            }
            self.last_direction = Some(adjustment);

            let moved = match adjustment {
                Adjustment::Later => previous_delay.saturating_add(self.step),
                Adjustment::Earlier => previous_delay.saturating_sub(self.step),
                Adjustment::Hold => previous_delay,
            };
            self.delay = moved.clamp(self.params.min_delay, self.params.max_delay);
        }

        self.phase = StaircasePhase::Adjusting;
        self.updates += 1;

        tracing::debug!(
            %outcome,
            ?adjustment,
            previous_ms = as_ms(&previous_delay),
            next_ms = as_ms(&self.delay),
            reversal,
            "staircase update"
        );

        Ok(StaircaseUpdate {
            outcome,
            adjustment,
            previous_delay,
            next_delay: self.delay,
            step: self.step,
            reversal,
        })
    }

    /// Same as [`update`](Self::update) for raw millisecond values, e.g. from a
    /// log. Negative or non-finite input is rejected and leaves the state as it was.
    pub fn update_ms(
        &mut self,
        scheduled_ms: f64,
        response_ms: Option<f64>,
        delivered: bool,
    ) -> Result<StaircaseUpdate, StaircaseError> {
        let scheduled = checked_duration("scheduled_ms", scheduled_ms)?;
        let response = response_ms
            .map(|ms| checked_duration("response_ms", ms))
            .transpose()?;
        self.update(scheduled, response, delivered)
    }

    /// Close the staircase. Later updates are rejected.
    pub fn finalize(&mut self) -> StaircaseSummary {
        self.phase = StaircasePhase::Finalized;
        let reversal_delays_ms: Vec<f64> = self.reversal_delays.iter().map(as_ms).collect();
        let mean_reversal_delay_ms = (!reversal_delays_ms.is_empty())
            .then(|| reversal_delays_ms.iter().sum::<f64>() / reversal_delays_ms.len() as f64);
        StaircaseSummary {
            final_delay_ms: as_ms(&self.delay),
            final_step_ms: as_ms(&self.step),
            updates: self.updates,
            reversals: self.reversal_delays.len(),
            reversal_delays_ms,
            mean_reversal_delay_ms,
        }
    }
}

fn as_ms(d: &Duration) -> f64 {
    d.as_nanos() as f64 / 1e6
}

fn checked_duration(field: &'static str, value: f64) -> Result<Duration, StaircaseError> {
    if !value.is_finite() || value < 0.0 {
        return Err(StaircaseError::InvalidInput { field, value });
    }
    Ok(Duration::from_nanos((value * 1e6).round() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn params(initial: u64, min: u64, max: u64, step: u64) -> StaircaseParams {
        StaircaseParams {
            initial_delay: ms(initial),
            min_delay: ms(min),
            max_delay: ms(max),
            step: ms(step),
            tolerance: ms(20),
            shrink_factor: 1.0,
            min_step: ms(10),
        }
    }

    #[test]
    fn two_trial_scenario() {
        let mut s = ResponseTimingStaircase::new(params(400, 100, 800, 50)).unwrap();
        assert_eq!(s.phase(), StaircasePhase::Initializing);
        assert_eq!(s.next_delay(), ms(400));

        let first = s.update(ms(400), Some(ms(500)), true).unwrap();
        assert_eq!(first.outcome, VibrationOutcome::BeforeResponse);
        assert_eq!(first.next_delay, ms(450));
        assert_eq!(s.phase(), StaircasePhase::Adjusting);

        let second = s.update(ms(450), Some(ms(420)), true).unwrap();
        assert_eq!(second.outcome, VibrationOutcome::AfterResponse);
        assert_eq!(second.next_delay, ms(400));
        assert!(second.reversal);
        assert_eq!(s.reversals(), 1);
    }

    #[test]
    fn clamps_to_min_delay() {
        let mut s = ResponseTimingStaircase::new(params(100, 100, 800, 50)).unwrap();
        let u = s.update(ms(100), Some(ms(90)), true).unwrap();
        assert_eq!(u.adjustment, Adjustment::Earlier);
        assert_eq!(u.next_delay, ms(100));
    }

    #[test]
    fn clamps_to_max_delay() {
        let mut s = ResponseTimingStaircase::new(params(780, 100, 800, 50)).unwrap();
        let u = s.update(ms(780), Some(ms(2000)), true).unwrap();
        assert_eq!(u.next_delay, ms(800));
    }

    #[test]
    fn small_margin_holds() {
        let mut s = ResponseTimingStaircase::new(params(400, 100, 800, 50)).unwrap();
        let u = s.update(ms(400), Some(ms(415)), true).unwrap();
        assert_eq!(u.outcome, VibrationOutcome::BeforeResponse);
        assert_eq!(u.adjustment, Adjustment::Hold);
        assert_eq!(u.next_delay, ms(400));
        assert_eq!(s.consecutive_before(), 1);
    }

    #[test]
    fn response_before_scheduled_cue_moves_earlier() {
        let mut s = ResponseTimingStaircase::new(params(400, 100, 800, 50)).unwrap();
        let u = s.update(ms(400), Some(ms(300)), false).unwrap();
        assert_eq!(u.outcome, VibrationOutcome::AfterResponse);
        assert_eq!(u.next_delay, ms(350));
        assert_eq!(s.consecutive_after(), 1);
    }

    #[test]
    fn device_failure_and_timeout_hold() {
        let mut s = ResponseTimingStaircase::new(params(400, 100, 800, 50)).unwrap();
        let failed = s.update(ms(400), Some(ms(600)), false).unwrap();
        assert_eq!(failed.outcome, VibrationOutcome::NotDelivered);
        assert_eq!(failed.next_delay, ms(400));

        let timeout = s.update(ms(400), None, true).unwrap();
        assert_eq!(timeout.adjustment, Adjustment::Hold);
        assert_eq!(timeout.next_delay, ms(400));
        assert_eq!(s.updates(), 2);
    }

    #[test]
    fn timeout_after_delivered_cue_carries_no_information() {
        assert_eq!(
            classify(ms(400), None, true),
            VibrationOutcome::NotDelivered
        );

        let mut s = ResponseTimingStaircase::new(params(400, 100, 800, 50)).unwrap();
        s.update(ms(400), Some(ms(600)), true).unwrap();
        assert_eq!(s.consecutive_before(), 1);

        let u = s.update(ms(450), None, true).unwrap();
        assert_eq!(u.outcome, VibrationOutcome::NotDelivered);
        assert_eq!(u.adjustment, Adjustment::Hold);
        assert_eq!(u.next_delay, ms(450));
        assert!(!u.reversal);
        assert_eq!(s.consecutive_before(), 1);
        assert_eq!(s.consecutive_after(), 0);
    }

    #[test]
    fn negative_input_is_rejected_without_side_effects() {
        let mut s = ResponseTimingStaircase::new(params(400, 100, 800, 50)).unwrap();
        let err = s.update_ms(400.0, Some(-5.0), true).unwrap_err();
        assert_eq!(
            err,
            StaircaseError::InvalidInput {
                field: "response_ms",
                value: -5.0
            }
        );
        assert!(s.update_ms(f64::NAN, Some(500.0), true).is_err());
        assert_eq!(s.next_delay(), ms(400));
        assert_eq!(s.updates(), 0);
        assert_eq!(s.phase(), StaircasePhase::Initializing);
    }

    #[test]
    fn step_shrinks_on_reversal_down_to_floor() {
        let mut p = params(400, 100, 800, 80);
        p.shrink_factor = 0.5;
        p.min_step = ms(15);
        let mut s = ResponseTimingStaircase::new(p).unwrap();

        s.update(ms(400), Some(ms(600)), true).unwrap(); // later, 480
        let u = s.update(ms(480), Some(ms(300)), true).unwrap(); // reversal, step 40
        assert_eq!(u.step, ms(40));
        assert_eq!(u.next_delay, ms(440));
        let u = s.update(ms(440), Some(ms(700)), true).unwrap(); // reversal, step 20
        assert_eq!(u.next_delay, ms(460));
        let u = s.update(ms(460), Some(ms(200)), true).unwrap(); // reversal, floored at 15
        assert_eq!(u.step, ms(15));
        assert_eq!(s.reversals(), 3);
    }

    #[test]
    fn holds_do_not_count_as_reversals() {
        let mut s = ResponseTimingStaircase::new(params(400, 100, 800, 50)).unwrap();
        s.update(ms(400), Some(ms(600)), true).unwrap();
        s.update(ms(450), Some(ms(460)), true).unwrap(); // hold
        let u = s.update(ms(450), Some(ms(700)), true).unwrap();
        assert!(!u.reversal);
        assert_eq!(s.reversals(), 0);
    }

    #[test]
    fn finalized_rejects_updates() {
        let mut s = ResponseTimingStaircase::new(params(400, 100, 800, 50)).unwrap();
        s.update(ms(400), Some(ms(500)), true).unwrap();
        s.update(ms(450), Some(ms(420)), true).unwrap();
        let summary = s.finalize();
        assert_eq!(summary.final_delay_ms, 400.0);
        assert_eq!(summary.updates, 2);
        assert_eq!(summary.reversal_delays_ms, vec![450.0]);
        assert_eq!(summary.mean_reversal_delay_ms, Some(450.0));
        assert_eq!(
            s.update(ms(400), Some(ms(500)), true),
            Err(StaircaseError::Finalized { updates: 2 })
        );
    }

    #[test]
    fn rejects_bad_params() {
        assert!(ResponseTimingStaircase::new(params(400, 900, 800, 50)).is_err());
        assert!(ResponseTimingStaircase::new(params(400, 100, 800, 0)).is_err());
        let mut p = params(400, 100, 800, 50);
        p.shrink_factor = 0.0;
        assert!(ResponseTimingStaircase::new(p).is_err());
    }

    #[test]
    fn initial_delay_outside_bounds_is_clamped() {
        let s = ResponseTimingStaircase::new(params(50, 100, 800, 50)).unwrap();
        assert_eq!(s.next_delay(), ms(100));
    }

    type Trial = (u64, Option<u64>, bool);

    fn random_trials(seed: u64, n: usize) -> Vec<Trial> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                let rt = rng.random_bool(0.9).then(|| rng.random_range(150..1500));
                (rng.random_range(0..1600), rt, rng.random_bool(0.8))
            })
            .collect()
    }

    #[test]
    fn random_sequences_stay_in_bounds_and_move_in_the_right_direction() {
        for seed in 0..20 {
            let mut p = params(400, 100, 800, 50);
            p.shrink_factor = if seed % 2 == 0 { 1.0 } else { 0.7 };
            let mut s = ResponseTimingStaircase::new(p).unwrap();
            for (scheduled, rt, delivered) in random_trials(seed, 200) {
                let before = s.step();
                let u = s.update(ms(scheduled), rt.map(ms), delivered).unwrap();
                assert!(u.next_delay >= ms(100) && u.next_delay <= ms(800));
                let moved = if u.next_delay > u.previous_delay {
                    u.next_delay - u.previous_delay
                } else {
                    u.previous_delay - u.next_delay
                };
                assert!(moved <= before);
                match u.outcome {
                    VibrationOutcome::BeforeResponse => assert!(u.next_delay >= u.previous_delay),
                    VibrationOutcome::AfterResponse => assert!(u.next_delay <= u.previous_delay),
                    VibrationOutcome::NotDelivered => assert_eq!(u.next_delay, u.previous_delay),
                }
            }
        }
    }

    #[test]
    fn replay_is_deterministic() {
        let trials = random_trials(7, 120);
        let run = || {
            let mut s = ResponseTimingStaircase::new(params(400, 100, 800, 50)).unwrap();
            for (scheduled, rt, delivered) in &trials {
                s.update(ms(*scheduled), rt.map(ms), *delivered).unwrap();
            }
            s.finalize()
        };
        assert_eq!(run(), run());
    }
}
