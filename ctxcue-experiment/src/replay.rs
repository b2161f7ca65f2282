//! Re-run the response-timing staircase over a logged session.

use crate::error::SessionError;
use crate::logs::{StaircaseRow, read_rows};
use crate::staircase::{ResponseTimingStaircase, StaircaseParams};
use std::path::Path;

/// Logged delays within this many milliseconds count as equal.
const DELAY_EPSILON_MS: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq)]
pub struct ReplayReport {
    pub rows: usize,
    pub updates: usize,
    /// Rows the staircase refused, e.g. negative times.
    pub rejected: usize,
    pub final_delay_ms: f64,
    pub logged_final_delay_ms: Option<f64>,
    /// Trial numbers whose logged next delay differs from the recomputed one.
    pub mismatches: Vec<usize>,
}

impl ReplayReport {
    pub fn reproduces_log(&self) -> bool {
        self.mismatches.is_empty()
            && self
                .logged_final_delay_ms
                .is_none_or(|logged| (logged - self.final_delay_ms).abs() < DELAY_EPSILON_MS)
    }
}

/// Replay `rows` through a fresh staircase built from `params`.
pub fn replay_rows(
    params: StaircaseParams,
    rows: &[StaircaseRow],
) -> Result<ReplayReport, SessionError> {
    let mut staircase = ResponseTimingStaircase::new(params)?;
    let mut rejected = 0;
    let mut mismatches = Vec::new();

    for row in rows {
        if let (true, Some(scheduled)) = (row.vibration_scheduled, row.scheduled_delay_ms) {
            if let Err(e) = staircase.update_ms(scheduled, row.response_ms, row.delivered) {
                tracing::warn!(trial = row.trial_num, error = %e, "logged row rejected");
                rejected += 1;
            }
        }
        let next_ms = staircase.next_delay().as_nanos() as f64 / 1e6;
        if (next_ms - row.next_delay_ms).abs() >= DELAY_EPSILON_MS {
            tracing::debug!(
                trial = row.trial_num,
                logged = row.next_delay_ms,
                replayed = next_ms,
                "delay mismatch"
            );
            mismatches.push(row.trial_num);
        }
    }

    let summary = staircase.finalize();
    Ok(ReplayReport {
        rows: rows.len(),
        updates: summary.updates,
        rejected,
        final_delay_ms: summary.final_delay_ms,
        logged_final_delay_ms: rows.last().map(|r| r.next_delay_ms),
        mismatches,
    })
}

/// Replay a `staircase_state_*.csv` file.
pub fn replay_log<P: AsRef<Path>>(
    params: StaircaseParams,
    path: P,
) -> Result<ReplayReport, SessionError> {
    let rows: Vec<StaircaseRow> = read_rows(path.as_ref())?;
    tracing::info!(path = %path.as_ref().display(), rows = rows.len(), "replaying staircase log");
    replay_rows(params, &rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaircaseConfig;

    fn row(trial: usize, scheduled: Option<f64>, response: Option<f64>, next: f64) -> StaircaseRow {
        StaircaseRow {
            trial_num: trial,
            vibration_scheduled: scheduled.is_some(),
            scheduled_delay_ms: scheduled,
            response_ms: response,
            delivered: scheduled.is_some_and(|s| response.is_none_or(|r| s < r)),
            outcome: None,
            adjustment: None,
            next_delay_ms: next,
            step_ms: 50.0,
            reversals: 0,
        }
    }

    #[test]
    fn reproduces_a_consistent_log() {
        let rows = vec![
            row(0, Some(600.0), Some(900.0), 650.0),
            row(1, None, Some(700.0), 650.0),
            row(2, Some(650.0), Some(500.0), 600.0),
        ];
        let report = replay_rows(StaircaseConfig::default().params(), &rows).unwrap();
        assert_eq!(report.updates, 2);
        assert_eq!(report.final_delay_ms, 600.0);
        assert!(report.reproduces_log());
    }

    #[test]
    fn flags_rows_that_disagree() {
        let rows = vec![
            row(0, Some(600.0), Some(900.0), 650.0),
            row(1, Some(650.0), Some(1000.0), 650.0),
        ];
        let report = replay_rows(StaircaseConfig::default().params(), &rows).unwrap();
        assert_eq!(report.mismatches, vec![1]);
        assert!(!report.reproduces_log());
    }

    #[test]
    fn negative_times_are_counted_not_applied() {
        let rows = vec![row(0, Some(600.0), Some(-5.0), 600.0)];
        let report = replay_rows(StaircaseConfig::default().params(), &rows).unwrap();
        assert_eq!(report.rejected, 1);
        assert_eq!(report.updates, 0);
        assert!(report.reproduces_log());
    }
}
