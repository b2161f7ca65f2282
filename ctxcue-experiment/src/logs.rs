//! Append-only per-subject output files.

use crate::error::LogError;
use crate::staircase::{Adjustment, StaircaseSummary};
use crate::threshold::ThresholdRow;
use ctxcue_core::{TrialRecord, VibrationOutcome};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// One row per trial in the vibration-response log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VibrationResponseRow {
    pub trial_num: usize,
    pub vibration_sent: bool,
    /// Milliseconds since session start.
    pub vibration_time_abs_ms: Option<f64>,
    pub k_up_time_abs_ms: Option<f64>,
}

/// Staircase state after each trial. Trials without a cue carry the current
/// threshold unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaircaseRow {
    pub trial_num: usize,
    pub vibration_scheduled: bool,
    pub scheduled_delay_ms: Option<f64>,
    pub response_ms: Option<f64>,
    pub delivered: bool,
    pub outcome: Option<VibrationOutcome>,
    pub adjustment: Option<Adjustment>,
    pub next_delay_ms: f64,
    pub step_ms: f64,
    pub reversals: usize,
}

/// CSV file written one flushed row at a time.
pub struct CsvLog<T> {
    path: PathBuf,
    writer: csv::Writer<File>,
    rows: usize,
    _row: PhantomData<T>,
}

impl<T: Serialize> CsvLog<T> {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, LogError> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).map_err(|cause| LogError::Create {
            path: path.clone(),
            cause,
        })?;
        Ok(Self {
            path,
            writer: csv::Writer::from_writer(file),
            rows: 0,
            _row: PhantomData,
        })
    }

    pub fn append(&mut self, row: &T) -> Result<(), LogError> {
        self.writer.serialize(row)?;
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read back any log written by [`CsvLog`].
pub fn read_rows<T, P>(path: P) -> Result<Vec<T>, LogError>
where
    T: for<'de> Deserialize<'de>,
    P: AsRef<Path>,
{
    let mut reader = csv::Reader::from_path(path)?;
    reader
        .deserialize()
        .collect::<Result<Vec<T>, csv::Error>>()
        .map_err(LogError::from)
}

/// The search-task logs for one subject.
pub struct SessionLogs {
    pub results: CsvLog<TrialRecord>,
    pub vibration: CsvLog<VibrationResponseRow>,
    pub staircase: CsvLog<StaircaseRow>,
    summary_path: PathBuf,
}

impl SessionLogs {
    pub fn create<P: AsRef<Path>>(dir: P, subject: &str) -> Result<Self, LogError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|cause| LogError::Create {
            path: dir.to_path_buf(),
            cause,
        })?;
        let paths = SessionPaths::new(dir, subject);
        Ok(Self {
            results: CsvLog::create(&paths.results)?,
            vibration: CsvLog::create(&paths.vibration)?,
            staircase: CsvLog::create(&paths.staircase)?,
            summary_path: paths.summary,
        })
    }

    pub fn write_summary(&self, summary: &StaircaseSummary) -> Result<(), LogError> {
        let file = File::create(&self.summary_path).map_err(|cause| LogError::Create {
            path: self.summary_path.clone(),
            cause,
        })?;
        serde_json::to_writer_pretty(file, summary)?;
        Ok(())
    }
}

/// File names for one subject's outputs.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionPaths {
    pub results: PathBuf,
    pub vibration: PathBuf,
    pub staircase: PathBuf,
    pub summary: PathBuf,
    pub threshold: PathBuf,
}

impl SessionPaths {
    pub fn new(dir: &Path, subject: &str) -> Self {
        Self {
            results: dir.join(format!("results_chun1998_black_{subject}.csv")),
            vibration: dir.join(format!("vibration_responses_{subject}.csv")),
            staircase: dir.join(format!("staircase_state_{subject}.csv")),
            summary: dir.join(format!("staircase_final_{subject}.json")),
            threshold: dir.join(format!("staircase_results_{subject}.csv")),
        }
    }
}

pub type ThresholdLog = CsvLog<ThresholdRow>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_flushed_as_they_are_appended() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vib.csv");
        let mut log = CsvLog::<VibrationResponseRow>::create(&path).unwrap();
        log.append(&VibrationResponseRow {
            trial_num: 0,
            vibration_sent: true,
            vibration_time_abs_ms: Some(1500.5),
            k_up_time_abs_ms: None,
        })
        .unwrap();

        // Readable before the writer is dropped.
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "trial_num,vibration_sent,vibration_time_abs_ms,k_up_time_abs_ms\n0,true,1500.5,\n"
        );
        let back: Vec<VibrationResponseRow> = read_rows(&path).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].vibration_time_abs_ms, Some(1500.5));
        assert_eq!(log.rows(), 1);
    }

    #[test]
    fn staircase_rows_round_trip_enums() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stair.csv");
        let mut log = CsvLog::<StaircaseRow>::create(&path).unwrap();
        let row = StaircaseRow {
            trial_num: 4,
            vibration_scheduled: true,
            scheduled_delay_ms: Some(400.0),
            response_ms: Some(500.0),
            delivered: true,
            outcome: Some(VibrationOutcome::BeforeResponse),
            adjustment: Some(Adjustment::Later),
            next_delay_ms: 450.0,
            step_ms: 50.0,
            reversals: 0,
        };
        log.append(&row).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("before_response,later"));
        let back: Vec<StaircaseRow> = read_rows(&path).unwrap();
        assert_eq!(back, vec![row]);
    }

    #[test]
    fn session_logs_use_subject_file_names() {
        let dir = tempfile::tempdir().unwrap();
        let logs = SessionLogs::create(dir.path().join("out"), "s01").unwrap();
        assert!(logs.results.path().ends_with("results_chun1998_black_s01.csv"));
        assert!(logs.staircase.path().ends_with("staircase_state_s01.csv"));
        assert!(dir.path().join("out/vibration_responses_s01.csv").exists());
    }
}
