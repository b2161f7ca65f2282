use super::config::ExperimentConfig;
use super::trial::{SearchTrial, ThresholdProbe, TrialDurations, TrialTimestamps};
use crate::device::VibrationDevice;
use crate::error::SessionError;
use crate::logs::{
    CsvLog, SessionLogs, SessionPaths, StaircaseRow, ThresholdLog, VibrationResponseRow,
};
use crate::schedule::{self, BlockSummary, VibrationSchedule};
use crate::staircase::{self, ResponseTimingStaircase, StaircaseSummary};
use crate::threshold::{DetectionStaircase, ThresholdRow};
use ctxcue_core::{
    InputKey, Phase, SearchDisplay, SessionPhase, TargetShape, TrialLayout, TrialRecord,
    TrialState, VibrationEvent,
};
use ctxcue_timing::{Timer, ns_to_ms};
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    SpacePressed,
    CalibrationComplete,
    ThresholdPulseDue,
    ThresholdWindowClosed,
    VibrationFelt,
    SearchResponse(TargetShape),
    TrialComplete,
    PhaseComplete,
    Interrupt,
}

/// Everything one subject's session needs, passed around explicitly.
pub struct Session<T, R>
where
    T: Timer<Timestamp = u64>,
    R: Rng,
{
    pub subject: String,
    pub config: ExperimentConfig,
    pub timer: T,
    pub rng: R,
    phase: SessionPhase,
    layouts: Vec<TrialLayout>,
    schedule: VibrationSchedule,
    staircase: ResponseTimingStaircase,
    detection: DetectionStaircase,
    device: Box<dyn VibrationDevice>,
    logs: SessionLogs,
    threshold_log: Option<ThresholdLog>,
    paths: SessionPaths,
    current: Option<SearchTrial<u64>>,
    probe: Option<ThresholdProbe<u64>>,
    last_pulse: Option<u64>,
    intensity: u8,
    trial_number: usize,
    results: Vec<TrialRecord>,
    last_block: Option<BlockSummary>,
    calibrated: bool,
    safe_margin_ns: u64,
    interrupted: bool,
    summary: Option<StaircaseSummary>,
}

impl<T, R> Session<T, R>
where
    T: Timer<Timestamp = u64>,
    R: Rng,
{
    pub fn new(
        subject: impl Into<String>,
        config: ExperimentConfig,
        layouts: Vec<TrialLayout>,
        device: Box<dyn VibrationDevice>,
        timer: T,
        mut rng: R,
    ) -> Result<Self, SessionError> {
        let subject = subject.into();
        if subject.trim().is_empty() {
            return Err(SessionError::MissingSubject);
        }
        config.validate()?;

        let staircase = ResponseTimingStaircase::new(config.staircase.params())?;
        let detection = DetectionStaircase::new(config.threshold.params());
        let schedule =
            VibrationSchedule::sample(&mut rng, layouts.len(), config.vibration_proportion);
        let logs = SessionLogs::create(&config.output_dir, &subject)?;
        let paths = SessionPaths::new(&config.output_dir, &subject);

        tracing::info!(
            subject = %subject,
            trials = layouts.len(),
            cued = schedule.len(),
            device = %device.describe(),
            "session created"
        );

        Ok(Self {
            subject,
            intensity: config.threshold.fallback_intensity,
            config,
            timer,
            rng,
            phase: SessionPhase::default(),
            layouts,
            schedule,
            staircase,
            detection,
            device,
            logs,
            threshold_log: None,
            paths,
            current: None,
            probe: None,
            last_pulse: None,
            trial_number: 0,
            results: Vec::new(),
            last_block: None,
            calibrated: false,
            safe_margin_ns: 0,
            interrupted: false,
            summary: None,
        })
    }

    /// Replace the randomly drawn cue schedule.
    pub fn with_schedule(mut self, schedule: VibrationSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    fn advance_phase(&mut self) -> bool {
        if let Some(next) = self.phase.next() {
            tracing::debug!(from = ?self.phase, to = ?next, "phase change");
            self.phase = next;
            true
        } else {
            false
        }
    }

    fn apply_calibration(&mut self) {
        let stats = self.timer.calibration_stats();
        self.safe_margin_ns = (stats.jitter_ns * 3.0) as u64;
        self.calibrated = true;
        tracing::info!(
            frame_ms = stats.average_frame_time_ns / 1_000_000.0,
            fps = stats.effective_fps,
            jitter_ms = stats.jitter_ns / 1_000_000.0,
            safe_margin_ns = self.safe_margin_ns,
            "display calibrated"
        );
    }

    /// Poll time-driven transitions. Call once per frame.
    pub fn update(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();

        match self.phase {
            phase if phase.requires_calibration() => {
                if !self.calibrated
                    && self.timer.frame_count() >= self.config.calibration_frames
                {
                    events.push(SessionEvent::CalibrationComplete);
                }
            }
            phase if phase.is_threshold() => self.update_threshold(&mut events),
            phase if phase.is_search() => self.update_trial(&mut events),
            _ => {
                // Message phases wait for a key.
            }
        }

        events
    }

    pub fn handle_key(&mut self, key: InputKey) -> Result<bool, SessionError> {
        if !self.phase.allows_input() && key != InputKey::Escape {
            return Ok(false);
        }
        let event = match key {
            InputKey::Space => SessionEvent::SpacePressed,
            // Keys name the side the T's top faces; shapes name the side its stem points.
            InputKey::Left => SessionEvent::SearchResponse(TargetShape::Right),
            InputKey::Right => SessionEvent::SearchResponse(TargetShape::Left),
            InputKey::Up => SessionEvent::VibrationFelt,
            InputKey::Escape => SessionEvent::Interrupt,
        };
        self.handle_event(event)
    }

    pub fn handle_event(&mut self, event: SessionEvent) -> Result<bool, SessionError> {
        use SessionEvent::*;

        match (self.phase, event) {
            (_, Interrupt) => {
                self.interrupt()?;
                Ok(true)
            }

            (phase, SpacePressed) if phase.is_welcome() => Ok(self.advance_phase()),

            (SessionPhase::Instructions | SessionPhase::BlockBreak, SpacePressed) => {
                self.advance_phase();
                self.start_trial()?;
                Ok(true)
            }

            (phase, CalibrationComplete) if phase.requires_calibration() => {
                self.apply_calibration();
                self.advance_phase();
                self.enter_threshold()?;
                Ok(true)
            }

            (phase, ThresholdPulseDue) if phase.is_threshold() => {
                self.fire_probe();
                Ok(true)
            }

            (phase, VibrationFelt) if phase.is_threshold() => self.record_probe(true),

            (phase, ThresholdWindowClosed) if phase.is_threshold() => self.record_probe(false),

            (phase, PhaseComplete) if phase.is_threshold() => {
                self.finish_threshold();
                Ok(true)
            }

            (phase, VibrationFelt) if phase.is_search() => Ok(self.record_vibration_report()),

            (phase, SearchResponse(shape))
                if phase.is_search()
                    && self
                        .current
                        .as_ref()
                        .is_some_and(|t| t.state == TrialState::Search) =>
            {
                self.record_response(shape);
                self.complete_current_trial()?;
                Ok(true)
            }

            (phase, TrialComplete) if phase.is_search() => {
                self.complete_current_trial()?;
                Ok(true)
            }

            _ => Ok(false),
        }
    }

    fn enter_threshold(&mut self) -> Result<(), SessionError> {
        if !self.config.threshold.enabled {
            tracing::info!(
                intensity = self.intensity,
                "detection staircase disabled, using fallback intensity"
            );
            self.advance_phase();
            return Ok(());
        }
        self.threshold_log = Some(CsvLog::create(&self.paths.threshold)?);
        Ok(())
    }

    fn update_threshold(&mut self, events: &mut Vec<SessionEvent>) {
        if self.detection.is_complete() {
            events.push(SessionEvent::PhaseComplete);
            return;
        }

        let now = self.timer.now();
        if self.probe.is_none() {
            self.schedule_probe(now);
        }
        if let Some(probe) = &self.probe {
            let window_ns = self.config.threshold.response_window_ms * 1_000_000;
            match probe.pulse {
                None if now >= probe.due => events.push(SessionEvent::ThresholdPulseDue),
                Some(pulse) if now.saturating_sub(pulse) >= window_ns => {
                    events.push(SessionEvent::ThresholdWindowClosed)
                }
                _ => {}
            }
        }
    }

    fn schedule_probe(&mut self, now: u64) {
        let (lo, hi) = self.config.threshold.interval_secs;
        let interval_ns = self.rng.random_range(lo..=hi) * 1_000_000_000;
        let base = self.last_pulse.unwrap_or(now);
        self.probe = Some(ThresholdProbe {
            intensity: self.detection.intensity(),
            due: base + interval_ns,
            pulse: None,
        });
    }

    fn fire_probe(&mut self) {
        let now = self.timer.now();
        if let Some(probe) = self.probe.as_mut().filter(|p| p.pulse.is_none()) {
            if let Err(e) = self.device.trigger(probe.intensity) {
                tracing::warn!(intensity = probe.intensity, error = %e, "detection pulse not delivered");
            }
            probe.pulse = Some(now);
            self.last_pulse = Some(now);
            tracing::debug!(
                trial = self.detection.completed() + 1,
                intensity = probe.intensity,
                "detection pulse"
            );
        }
    }

    fn record_probe(&mut self, felt: bool) -> Result<bool, SessionError> {
        let Some(probe) = self.probe.take_if(|p| p.pulse.is_some()) else {
            return Ok(false);
        };
        if let Some(log) = self.threshold_log.as_mut() {
            log.append(&ThresholdRow {
                response: felt as u8,
                intensity: probe.intensity,
                phase: "staircase".to_string(),
                timestamp: chrono::Local::now().to_rfc3339(),
            })?;
        }
        let next = self.detection.record(felt);
        tracing::debug!(felt, intensity = probe.intensity, next, "detection response");
        Ok(true)
    }

    fn finish_threshold(&mut self) {
        let threshold = self.detection.threshold();
        self.intensity = self.detection.working_intensity();
        self.probe = None;
        tracing::info!(
            threshold,
            intensity = self.intensity,
            reversals = self.detection.reversals().len(),
            "detection staircase complete"
        );
        self.advance_phase();
    }

    pub fn start_trial(&mut self) -> Result<(), SessionError> {
        let index = self.trial_number;
        if index >= self.layouts.len() {
            self.finish()?;
            self.phase = SessionPhase::Debrief;
            return Ok(());
        }
        let layout = &self.layouts[index];

        let display = schedule::present(&mut self.rng, layout);
        let vibration_delay = self
            .schedule
            .contains(index)
            .then(|| self.staircase.next_delay());
        let now = self.timer.now();

        tracing::debug!(
            trial = index,
            context = %layout.context_id,
            condition = layout.condition(),
            vibration_delay_ms = vibration_delay.map(ms),
            "trial started"
        );

        self.current = Some(SearchTrial {
            index,
            block: schedule::block_of(index, self.config.block_size),
            layout: index,
            display,
            vibration_delay,
            durations: TrialDurations {
                fixation_ms: self.config.fixation_ms,
                response_window_ms: self.config.response_window_ms,
            },
            timestamps: TrialTimestamps {
                start: now,
                search_start: None,
                vibration: None,
                response: None,
                vibration_report: None,
            },
            response: None,
            delivery_failed: false,
            state: TrialState::Fixation,
        });
        Ok(())
    }

    fn update_trial(&mut self, events: &mut Vec<SessionEvent>) {
        let now = self.timer.now();
        let Some(trial) = self.current.as_mut() else {
            return;
        };

        match trial.state {
            TrialState::Fixation => {
                if now.saturating_sub(trial.timestamps.start)
                    >= trial.durations.fixation_ms * 1_000_000
                {
                    trial.state = TrialState::Search;
                    trial.timestamps.search_start = Some(now);
                    tracing::trace!(trial = trial.index, at = now, "search display on");
                }
            }
            TrialState::Search => {
                let Some(onset) = trial.timestamps.search_start else {
                    return;
                };
                let elapsed = now.saturating_sub(onset);

                if let Some(delay) = trial.vibration_delay {
                    if trial.timestamps.vibration.is_none()
                        && !trial.delivery_failed
                        && elapsed >= delay.as_nanos() as u64
                    {
                        match self.device.trigger(self.intensity) {
                            Ok(()) => {
                                trial.timestamps.vibration = Some(now);
                                tracing::trace!(trial = trial.index, elapsed_ns = elapsed, "vibration fired");
                            }
                            Err(e) => {
                                tracing::warn!(trial = trial.index, error = %e, "vibration not delivered");
                                trial.delivery_failed = true;
                            }
                        }
                    }
                }

                let window_ns = trial.durations.response_window_ms * 1_000_000 + self.safe_margin_ns;
                if elapsed >= window_ns {
                    events.push(SessionEvent::TrialComplete);
                }
            }
            TrialState::Complete => {}
        }
    }

    /// Records a search response for the current trial
    fn record_response(&mut self, shape: TargetShape) {
        let now = self.timer.now();
        if let Some(trial) = self.current.as_mut() {
            trial.response = Some(shape);
            trial.timestamps.response = Some(now);
            trial.state = TrialState::Complete;
        }
    }

    fn record_vibration_report(&mut self) -> bool {
        let now = self.timer.now();
        match self.current.as_mut() {
            Some(trial)
                if trial.timestamps.vibration.is_some()
                    && trial.timestamps.vibration_report.is_none() =>
            {
                trial.timestamps.vibration_report = Some(now);
                true
            }
            _ => false,
        }
    }

    /// Completes the current trial, updates the staircase and logs the results
    fn complete_current_trial(&mut self) -> Result<(), SessionError> {
        let Some(trial) = self.current.take() else {
            return Ok(());
        };
        let layout = &self.layouts[trial.layout];
        let ts = &trial.timestamps;
        let onset = ts.search_start.unwrap_or(ts.start);
        let since_onset = |t: u64| Duration::from_nanos(t.saturating_sub(onset));

        let rt = ts.response.map(since_onset);
        let fired = ts.vibration.map(since_onset);
        let delivered = fired.is_some();

        let mut adjustment = None;
        let cue = match trial.vibration_delay {
            Some(delay) => {
                let outcome = match self.staircase.update(delay, rt, delivered) {
                    Ok(update) => {
                        adjustment = Some(update.adjustment);
                        update.outcome
                    }
                    Err(e) => {
                        tracing::warn!(trial = trial.index, error = %e, "staircase update rejected");
                        staircase::classify(delay, rt, delivered)
                    }
                };
                Some(VibrationEvent {
                    scheduled_ms: ms(delay),
                    fired_ms: fired.map(ms),
                    outcome,
                })
            }
            None => None,
        };

        let record = TrialRecord {
            trial_num: trial.index,
            block: trial.block,
            context_id: layout.context_id.clone(),
            is_old: layout.is_old,
            target_shape: layout.target_shape,
            response: trial.response,
            correct: trial.response == Some(layout.target_shape),
            rt_ms: rt.map(ms),
            vibration_scheduled: trial.vibrates(),
            vibration_delay_ms: cue.map(|c| c.scheduled_ms),
            vibration_time_ms: cue.and_then(|c| c.fired_ms),
            vibration_outcome: cue.map(|c| c.outcome),
            rt_minus_vibration_ms: rt.zip(fired).map(|(r, f)| ms(r) - ms(f)),
            vibration_reported: ts.vibration_report.is_some(),
            vibration_report_rt_ms: ts
                .vibration_report
                .zip(ts.vibration)
                .map(|(k, v)| ns_to_ms(k.saturating_sub(v))),
        };

        self.logs.results.append(&record)?;
        self.logs.vibration.append(&VibrationResponseRow {
            trial_num: trial.index,
            vibration_sent: trial.vibrates(),
            vibration_time_abs_ms: ts.vibration.map(ns_to_ms),
            k_up_time_abs_ms: ts.vibration_report.map(ns_to_ms),
        })?;
        self.logs.staircase.append(&StaircaseRow {
            trial_num: trial.index,
            vibration_scheduled: trial.vibrates(),
            scheduled_delay_ms: trial.vibration_delay.map(ms),
            response_ms: rt.map(ms),
            delivered,
            outcome: cue.map(|c| c.outcome),
            adjustment,
            next_delay_ms: ms(self.staircase.next_delay()),
            step_ms: ms(self.staircase.step()),
            reversals: self.staircase.reversals(),
        })?;

        tracing::info!(
            trial = record.trial_num,
            condition = layout.condition(),
            correct = record.correct,
            rt_ms = record.rt_ms,
            outcome = ?record.vibration_outcome,
            "trial complete"
        );

        self.results.push(record);
        self.trial_number += 1;

        let block_size = self.config.block_size;
        if self.trial_number >= self.layouts.len() {
            self.finish()?;
            self.phase = SessionPhase::Debrief;
        } else if schedule::starts_new_block(self.trial_number, block_size) {
            let block = schedule::block_of(self.trial_number - 1, block_size);
            let start = self
                .results
                .iter()
                .position(|r| r.block == block)
                .unwrap_or(self.results.len());
            let summary = BlockSummary::from_records(block, &self.results[start..]);
            tracing::info!(
                block = block + 1,
                mean_rt_ms = summary.mean_rt_ms,
                accuracy = summary.accuracy,
                "block complete"
            );
            self.last_block = Some(summary);
            self.phase = SessionPhase::BlockBreak;
        } else {
            self.start_trial()?;
        }
        Ok(())
    }

    /// Finalize the staircase and write its summary. Safe to call twice.
    fn finish(&mut self) -> Result<(), SessionError> {
        if self.summary.is_some() {
            return Ok(());
        }
        let summary = self.staircase.finalize();
        self.logs.write_summary(&summary)?;
        tracing::info!(
            final_delay_ms = summary.final_delay_ms,
            reversals = summary.reversals,
            trials = self.results.len(),
            "session finished"
        );
        self.summary = Some(summary);
        Ok(())
    }

    fn interrupt(&mut self) -> Result<(), SessionError> {
        if let Some(trial) = self.current.take() {
            tracing::warn!(trial = trial.index, "session interrupted, discarding trial in progress");
        }
        self.interrupted = true;
        self.finish()?;
        self.phase = SessionPhase::Debrief;
        Ok(())
    }

    pub fn current_phase(&self) -> &SessionPhase {
        &self.phase
    }

    pub fn is_finished(&self) -> bool {
        self.phase == SessionPhase::Debrief && self.summary.is_some()
    }

    pub fn was_interrupted(&self) -> bool {
        self.interrupted
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    pub fn results(&self) -> &[TrialRecord] {
        &self.results
    }

    pub fn staircase(&self) -> &ResponseTimingStaircase {
        &self.staircase
    }

    pub fn detection(&self) -> &DetectionStaircase {
        &self.detection
    }

    pub fn summary(&self) -> Option<&StaircaseSummary> {
        self.summary.as_ref()
    }

    pub fn paths(&self) -> &SessionPaths {
        &self.paths
    }

    pub fn layouts(&self) -> &[TrialLayout] {
        &self.layouts
    }

    /// Cue intensity in use for the search task.
    pub fn intensity(&self) -> u8 {
        self.intensity
    }

    pub fn current_trial(&self) -> Option<&SearchTrial<u64>> {
        self.current.as_ref()
    }

    pub fn current_trial_state(&self) -> Option<&TrialState> {
        self.current.as_ref().map(|trial| &trial.state)
    }

    /// Display to draw, only while the search array is up.
    pub fn current_display(&self) -> Option<&SearchDisplay> {
        self.current
            .as_ref()
            .filter(|t| t.state == TrialState::Search)
            .map(|t| &t.display)
    }

    /// Time since search onset on the current trial.
    pub fn search_elapsed(&self) -> Option<Duration> {
        let onset = self.current.as_ref()?.timestamps.search_start?;
        Some(self.timer.elapsed(onset))
    }

    /// Time left until the current trial's cue is due. `None` once it has
    /// fired or failed, and on trials without a cue.
    pub fn cue_due_in(&self) -> Option<Duration> {
        let trial = self.current.as_ref()?;
        if trial.state != TrialState::Search
            || trial.timestamps.vibration.is_some()
            || trial.delivery_failed
        {
            return None;
        }
        let delay = trial.vibration_delay?;
        let onset = trial.timestamps.search_start?;
        Some(delay.saturating_sub(self.timer.elapsed(onset)))
    }

    /// Time since the cue fired on the current trial.
    pub fn vibration_elapsed(&self) -> Option<Duration> {
        let fired = self.current.as_ref()?.timestamps.vibration?;
        Some(self.timer.elapsed(fired))
    }

    /// Intensity and time since the pending detection pulse fired.
    pub fn probe_elapsed(&self) -> Option<(u8, Duration)> {
        let probe = self.probe.as_ref()?;
        Some((probe.intensity, self.timer.elapsed(probe.pulse?)))
    }

    pub fn trial_progress(&self) -> Option<(usize, usize)> {
        self.phase
            .is_search()
            .then(|| (self.trial_number + 1, self.layouts.len()))
    }

    /// On-screen text for message phases.
    pub fn message(&self) -> Option<String> {
        match self.phase {
            SessionPhase::Welcome => {
                Some("Contextual Cueing with Vibration\nPress SPACE to begin".to_string())
            }
            SessionPhase::Calibration => Some("Calibrating...".to_string()),
            SessionPhase::Threshold => Some(format!(
                "Staircase Trial {}/{}\nPress UP if you feel vibration\nDon't press if not",
                (self.detection.completed() + 1).min(self.detection.total()),
                self.detection.total()
            )),
            SessionPhase::Instructions => Some(format!(
                "Vibration intensity: {}\nContextual Cueing Task Starting\n\
                 Press LEFT/RIGHT for T orientation\nPress UP if you feel vibration\n\
                 Press SPACE to start",
                self.intensity
            )),
            SessionPhase::BlockBreak => self.last_block.as_ref().map(BlockSummary::message),
            SessionPhase::Debrief => Some("Experiment complete. Thank you!".to_string()),
            SessionPhase::Search => None,
        }
    }
}

fn ms(d: Duration) -> f64 {
    ns_to_ms(d.as_nanos() as u64)
}
