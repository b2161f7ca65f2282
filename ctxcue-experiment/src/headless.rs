//! Windowless sessions driven by a scripted participant on a manual clock.

use crate::error::SessionError;
use crate::state::Session;
use ctxcue_core::{InputKey, SessionPhase, TargetShape, TrialState};
use ctxcue_timing::{ManualTimer, Timer};
use rand::Rng;
use std::time::Duration;

/// What the participant knows when a search display appears.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialPlan {
    pub index: usize,
    pub is_old: bool,
    pub target_shape: TargetShape,
    pub vibration_delay: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SearchResponse {
    Key {
        key: InputKey,
        /// Since search onset.
        after: Duration,
        /// Report latency after the cue fires, if the cue is felt.
        felt_after: Option<Duration>,
    },
    Timeout {
        felt_after: Option<Duration>,
    },
}

impl SearchResponse {
    fn felt_after(&self) -> Option<Duration> {
        match self {
            SearchResponse::Key { felt_after, .. } | SearchResponse::Timeout { felt_after } => {
                *felt_after
            }
        }
    }
}

pub trait Responder {
    fn respond(&mut self, plan: &TrialPlan) -> SearchResponse;

    /// Latency of the "felt" key for a detection pulse, or `None` if missed.
    fn feels(&mut self, intensity: u8) -> Option<Duration>;
}

/// Key that answers `shape` correctly.
pub fn key_for(shape: TargetShape) -> InputKey {
    match shape {
        TargetShape::Left => InputKey::Right,
        TargetShape::Right => InputKey::Left,
    }
}

/// Run `session` to completion, advancing `clock` by `frame` per iteration.
/// `clock` must share its time with the session's timer.
pub fn run_headless<R, P>(
    session: &mut Session<ManualTimer, R>,
    clock: &ManualTimer,
    responder: &mut P,
    frame: Duration,
) -> Result<(), SessionError>
where
    R: Rng,
    P: Responder + ?Sized,
{
    let mut probe_plan: Option<(usize, Option<Duration>)> = None;
    let mut trial_plan: Option<(usize, SearchResponse)> = None;

    while !session.is_finished() {
        clock.sleep(frame);
        session.timer.record_frame(frame);
        for event in session.update() {
            session.handle_event(event)?;
        }

        match *session.current_phase() {
            SessionPhase::Welcome | SessionPhase::Instructions | SessionPhase::BlockBreak => {
                session.handle_key(InputKey::Space)?;
            }
            SessionPhase::Threshold => {
                let Some((intensity, since)) = session.probe_elapsed() else {
                    continue;
                };
                let pulse = session.detection().completed();
                if probe_plan.as_ref().is_none_or(|(p, _)| *p != pulse) {
                    probe_plan = Some((pulse, responder.feels(intensity)));
                }
                if let Some((_, Some(after))) = probe_plan {
                    if since >= after {
                        session.handle_key(InputKey::Up)?;
                    }
                }
            }
            SessionPhase::Search => {
                let Some(trial) = session.current_trial() else {
                    continue;
                };
                if trial.state != TrialState::Search {
                    continue;
                }
                let index = trial.index;
                let reported = trial.timestamps.vibration_report.is_some();
                if trial_plan.as_ref().is_none_or(|(i, _)| *i != index) {
                    let layout = &session.layouts()[trial.layout];
                    let plan = TrialPlan {
                        index,
                        is_old: layout.is_old,
                        target_shape: layout.target_shape,
                        vibration_delay: trial.vibration_delay,
                    };
                    trial_plan = Some((index, responder.respond(&plan)));
                }
                let Some((_, response)) = trial_plan.as_ref() else {
                    continue;
                };

                if let (Some(latency), Some(since_cue)) =
                    (response.felt_after(), session.vibration_elapsed())
                {
                    if !reported && since_cue >= latency {
                        session.handle_key(InputKey::Up)?;
                    }
                }
                if let SearchResponse::Key { key, after, .. } = *response {
                    if session.search_elapsed().is_some_and(|e| e >= after) {
                        session.handle_key(key)?;
                    }
                }
            }
            SessionPhase::Calibration | SessionPhase::Debrief => {}
        }
    }
    Ok(())
}

/// Participant model for dry runs: old contexts are found faster, pulses at
/// or above `detection_level` are felt.
#[derive(Debug, Clone)]
pub struct SimulatedParticipant<R> {
    rng: R,
    pub base_rt: Duration,
    pub old_context_gain: Duration,
    pub rt_jitter: Duration,
    pub accuracy: f64,
    pub miss_rate: f64,
    pub detection_level: u8,
    pub report_latency: Duration,
}

impl<R: Rng> SimulatedParticipant<R> {
    pub fn new(rng: R) -> Self {
        Self {
            rng,
            base_rt: Duration::from_millis(1200),
            old_context_gain: Duration::from_millis(150),
            rt_jitter: Duration::from_millis(300),
            accuracy: 0.95,
            miss_rate: 0.02,
            detection_level: 4,
            report_latency: Duration::from_millis(350),
        }
    }
}

impl<R: Rng> Responder for SimulatedParticipant<R> {
    fn respond(&mut self, plan: &TrialPlan) -> SearchResponse {
        let felt_after = plan.vibration_delay.map(|_| self.report_latency);
        if self.rng.random_bool(self.miss_rate) {
            return SearchResponse::Timeout { felt_after };
        }

        let mut rt = self.base_rt;
        if plan.is_old {
            rt = rt.saturating_sub(self.old_context_gain);
        }
        let jitter = self.rt_jitter.as_millis() as u64;
        if jitter > 0 {
            rt += Duration::from_millis(self.rng.random_range(0..=jitter));
        }

        let key = if self.rng.random_bool(self.accuracy) {
            key_for(plan.target_shape)
        } else {
            key_for(plan.target_shape.opposite())
        };
        SearchResponse::Key {
            key,
            after: rt,
            felt_after,
        }
    }

    fn feels(&mut self, intensity: u8) -> Option<Duration> {
        (intensity >= self.detection_level).then_some(self.report_latency)
    }
}
