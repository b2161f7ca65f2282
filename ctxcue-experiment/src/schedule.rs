use ctxcue_core::{Corner, Glyph, PALETTE, PlacedItem, SearchDisplay, TrialLayout, TrialRecord};
use rand::Rng;
use rand::seq::IndexedRandom;
use std::collections::BTreeSet;

/// Trials that carry a vibration cue.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VibrationSchedule {
    trials: BTreeSet<usize>,
}

impl VibrationSchedule {
    /// Draw `floor(total * proportion)` distinct trial indices.
    pub fn sample<R: Rng>(rng: &mut R, total: usize, proportion: f64) -> Self {
        let amount = ((total as f64 * proportion.clamp(0.0, 1.0)).floor() as usize).min(total);
        let trials = rand::seq::index::sample(rng, total, amount)
            .into_iter()
            .collect();
        Self { trials }
    }

    pub fn from_trials(trials: impl IntoIterator<Item = usize>) -> Self {
        Self {
            trials: trials.into_iter().collect(),
        }
    }

    pub fn contains(&self, trial: usize) -> bool {
        self.trials.contains(&trial)
    }

    pub fn len(&self) -> usize {
        self.trials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }
}

/// Block index of a trial.
pub fn block_of(trial: usize, block_size: usize) -> usize {
    trial / block_size.max(1)
}

/// True when `trial` opens a new block after the first.
pub fn starts_new_block(trial: usize, block_size: usize) -> bool {
    trial > 0 && trial % block_size.max(1) == 0
}

/// Resolve a layout into a display. Distractor orientations and all colours
/// are drawn afresh on every presentation so only positions carry context.
pub fn present<R: Rng>(rng: &mut R, layout: &TrialLayout) -> SearchDisplay {
    let mut items: Vec<PlacedItem> = layout
        .distractors
        .iter()
        .map(|(cell, _)| PlacedItem {
            cell: *cell,
            glyph: Glyph::Distractor(*Corner::ALL.choose(rng).unwrap_or(&Corner::UpLeft)),
            color: rng.random_range(0..PALETTE.len()),
        })
        .collect();
    items.push(PlacedItem {
        cell: layout.target,
        glyph: Glyph::Target(layout.target_shape),
        color: rng.random_range(0..PALETTE.len()),
    });
    SearchDisplay { items }
}

/// Mean RT and accuracy over one block, shown on the break screen.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockSummary {
    pub block: usize,
    pub trials: usize,
    pub mean_rt_ms: Option<f64>,
    pub accuracy: f64,
}

impl BlockSummary {
    pub fn from_records(block: usize, records: &[TrialRecord]) -> Self {
        let rts: Vec<f64> = records.iter().filter_map(|r| r.rt_ms).collect();
        let mean_rt_ms = (!rts.is_empty()).then(|| rts.iter().sum::<f64>() / rts.len() as f64);
        let accuracy = if records.is_empty() {
            0.0
        } else {
            records.iter().filter(|r| r.correct).count() as f64 / records.len() as f64
        };
        Self {
            block,
            trials: records.len(),
            mean_rt_ms,
            accuracy,
        }
    }

    pub fn message(&self) -> String {
        let rt = match self.mean_rt_ms {
            Some(ms) => format!("{:.2}s", ms / 1000.0),
            None => "n/a".to_string(),
        };
        format!(
            "Block {} complete\nAvg RT: {}, Accuracy: {:.1}%\nPress SPACE to continue",
            self.block + 1,
            rt,
            self.accuracy * 100.0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctxcue_core::{GridCell, TargetShape};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn samples_floor_of_proportion_without_duplicates() {
        let mut rng = StdRng::seed_from_u64(1);
        let schedule = VibrationSchedule::sample(&mut rng, 10, 0.75);
        assert_eq!(schedule.len(), 7);
        assert!((0..10).filter(|&t| schedule.contains(t)).count() == 7);
        assert!(!schedule.contains(10));

        assert!(VibrationSchedule::sample(&mut rng, 10, 0.0).is_empty());
        assert_eq!(VibrationSchedule::sample(&mut rng, 10, 1.0).len(), 10);
        assert!(VibrationSchedule::sample(&mut rng, 0, 0.75).is_empty());
    }

    #[test]
    fn block_boundaries() {
        assert_eq!(block_of(23, 24), 0);
        assert_eq!(block_of(24, 24), 1);
        assert!(!starts_new_block(0, 24));
        assert!(starts_new_block(48, 24));
        assert!(!starts_new_block(47, 24));
    }

    #[test]
    fn presentation_keeps_positions_and_target_last() {
        let layout = TrialLayout {
            context_id: "9".into(),
            is_old: true,
            target: GridCell::new(3, 3),
            target_shape: TargetShape::Right,
            distractors: vec![
                (GridCell::new(0, 1), Corner::UpLeft),
                (GridCell::new(5, 2), Corner::UpLeft),
            ],
        };
        let mut rng = StdRng::seed_from_u64(42);
        let display = present(&mut rng, &layout);
        assert_eq!(display.items.len(), 3);
        assert_eq!(display.items[0].cell, GridCell::new(0, 1));
        assert_eq!(display.items[1].cell, GridCell::new(5, 2));
        let target = display.items.last().unwrap();
        assert_eq!(target.glyph, Glyph::Target(TargetShape::Right));
        assert_eq!(display.target(), Some(target));
        assert!(display.items.iter().all(|i| i.color < PALETTE.len()));
    }

    fn record(rt: Option<f64>, correct: bool) -> TrialRecord {
        TrialRecord {
            trial_num: 0,
            block: 0,
            context_id: "1".into(),
            is_old: false,
            target_shape: TargetShape::Left,
            response: None,
            correct,
            rt_ms: rt,
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
    fn block_summary_skips_missing_rts() {
        let records = vec![
            record(Some(800.0), true),
            record(None, false),
            record(Some(1200.0), true),
            record(Some(1000.0), false),
        ];
        let summary = BlockSummary::from_records(2, &records);
        assert_eq!(summary.mean_rt_ms, Some(1000.0));
        assert_eq!(summary.accuracy, 0.5);
        assert_eq!(
            summary.message(),
            "Block 3 complete\nAvg RT: 1.00s, Accuracy: 50.0%\nPress SPACE to continue"
        );
    }
}
