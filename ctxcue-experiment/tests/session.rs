use ctxcue_core::{TrialRecord, VibrationOutcome};
use ctxcue_experiment::logs::read_rows;
use ctxcue_experiment::{
    ExperimentConfig, LayoutError, Session, SimulatedDevice, SimulatedParticipant, StaircaseRow,
    StaircaseSummary, VibrationResponseRow, load_layouts, replay_log, run_headless,
};
use ctxcue_timing::ManualTimer;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::path::Path;
use std::time::Duration;

const HEADER: &str = "context_id,is_old,target_pos,distractors,target_shape\n";

fn write_layouts(dir: &Path, trials: usize) -> std::path::PathBuf {
    let mut body = String::from(HEADER);
    for i in 0..trials {
        let context = i % 4;
        let shape = if i % 2 == 0 { "T_left" } else { "T_right" };
        let old = if context < 2 { "True" } else { "False" };
        body.push_str(&format!(
            "{context},{old},\"({}, 3)\",\"[((0, 0), 'ul'), ((6, 5), 'dr'), ((3, 1), 'ur')]\",{shape}\n",
            i % 7 + 1
        ));
    }
    let path = dir.join("layouts.csv");
    std::fs::write(&path, body).unwrap();
    path
}

fn config(dir: &Path) -> ExperimentConfig {
    let mut config = ExperimentConfig::default();
    config.output_dir = dir.join("out");
    config.calibration_frames = 10;
    config.block_size = 8;
    config.threshold.trials = 8;
    config
}

fn run(
    config: ExperimentConfig,
    layouts_path: &Path,
    device: SimulatedDevice,
    seed: u64,
) -> Session<ManualTimer, StdRng> {
    let layouts = load_layouts(layouts_path).unwrap();
    let clock = ManualTimer::new().with_frame_time(Duration::from_micros(16_667));
    let mut session = Session::new(
        "it01",
        config,
        layouts,
        Box::new(device),
        clock.clone(),
        StdRng::seed_from_u64(seed),
    )
    .unwrap();
    let mut participant = SimulatedParticipant::new(StdRng::seed_from_u64(seed + 1));
    run_headless(&mut session, &clock, &mut participant, Duration::from_millis(4)).unwrap();
    session
}

#[test]
fn n_trials_produce_n_rows_in_every_log() {
    let dir = tempfile::tempdir().unwrap();
    let layouts = write_layouts(dir.path(), 20);
    let session = run(config(dir.path()), &layouts, SimulatedDevice::default(), 5);
    assert!(session.is_finished());

    let paths = session.paths();
    let results: Vec<TrialRecord> = read_rows(&paths.results).unwrap();
    let staircase: Vec<StaircaseRow> = read_rows(&paths.staircase).unwrap();
    let vibration: Vec<VibrationResponseRow> = read_rows(&paths.vibration).unwrap();

    assert_eq!(results.len(), 20);
    assert_eq!(staircase.len(), 20);
    assert_eq!(vibration.len(), 20);
    for (i, ((r, s), v)) in results.iter().zip(&staircase).zip(&vibration).enumerate() {
        assert_eq!(r.trial_num, i);
        assert_eq!(s.trial_num, i);
        assert_eq!(v.trial_num, i);
        assert_eq!(r.vibration_scheduled, s.vibration_scheduled);
        assert_eq!(r.block, i / 8);
    }
    assert_eq!(results.iter().filter(|r| r.vibration_scheduled).count(), 15);

    let summary: StaircaseSummary =
        serde_json::from_str(&std::fs::read_to_string(&paths.summary).unwrap()).unwrap();
    assert_eq!(summary.final_delay_ms, staircase.last().unwrap().next_delay_ms);

    let threshold_rows = std::fs::read_to_string(&paths.threshold).unwrap();
    assert_eq!(threshold_rows.lines().count(), 1 + 8);
}

#[test]
fn replay_reproduces_the_logged_delay() {
    let dir = tempfile::tempdir().unwrap();
    let layouts = write_layouts(dir.path(), 30);
    let config = config(dir.path());
    let params = config.staircase.params();
    let session = run(config, &layouts, SimulatedDevice::default(), 9);

    let first = replay_log(params.clone(), &session.paths().staircase).unwrap();
    let second = replay_log(params, &session.paths().staircase).unwrap();
    assert!(first.reproduces_log(), "{first:?}");
    assert_eq!(first, second);
    assert_eq!(first.final_delay_ms, session.summary().unwrap().final_delay_ms);
    assert_eq!(first.updates, session.staircase().updates());
}

#[test]
fn failing_device_logs_not_delivered_and_finishes() {
    let dir = tempfile::tempdir().unwrap();
    let layouts = write_layouts(dir.path(), 12);
    let mut config = config(dir.path());
    config.threshold.enabled = false;
    let session = run(config, &layouts, SimulatedDevice::failing(), 21);

    assert!(session.is_finished());
    assert_eq!(session.results().len(), 12);
    for record in session.results().iter().filter(|r| r.vibration_scheduled) {
        assert_ne!(record.vibration_outcome, Some(VibrationOutcome::BeforeResponse));
        assert_eq!(record.vibration_time_ms, None);
    }
    assert!(
        session
            .results()
            .iter()
            .any(|r| r.vibration_outcome == Some(VibrationOutcome::NotDelivered))
    );
}

#[test]
fn malformed_layout_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.csv");
    std::fs::write(
        &path,
        format!("{HEADER}1,True,\"(4, 5)\",\"[((1, 2), 'ul')]\",T_left\n2,True,\"(4 5)\",\"[]\",T_up\n"),
    )
    .unwrap();
    match load_layouts(&path) {
        Err(LayoutError::MalformedRow { row, .. }) => assert_eq!(row, 3),
        other => panic!("expected malformed row, got {other:?}"),
    }

    let empty = dir.path().join("empty.csv");
    std::fs::write(&empty, HEADER).unwrap();
    assert!(matches!(load_layouts(&empty), Err(LayoutError::Empty { .. })));
}
