use crate::timer::{CalibrationStats, Timer};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Clock that only moves when told to. Clones share the same time, so a
/// session and its driver can hold separate handles.
#[derive(Debug, Clone, Default)]
pub struct ManualTimer {
    now_ns: Arc<AtomicU64>,
    frames: Arc<AtomicUsize>,
    frame_ns: u64,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every recorded frame reports this duration in the calibration stats.
    pub fn with_frame_time(mut self, frame: Duration) -> Self {
        self.frame_ns = frame.as_nanos() as u64;
        self
    }

    pub fn advance(&self, d: Duration) {
        self.now_ns.fetch_add(d.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl Timer for ManualTimer {
    type Timestamp = u64;

    fn now(&self) -> u64 {
        self.now_ns.load(Ordering::SeqCst)
    }

    fn elapsed(&self, ts: u64) -> Duration {
        Duration::from_nanos(self.now().saturating_sub(ts))
    }

    /// Sleeping advances the shared clock instead of blocking.
    fn sleep(&self, d: Duration) {
        self.advance(d);
    }

    fn record_frame(&mut self, _d: Duration) {
        self.frames.fetch_add(1, Ordering::SeqCst);
    }

    fn frame_count(&self) -> usize {
        self.frames.load(Ordering::SeqCst)
    }

    fn calibration_stats(&self) -> CalibrationStats {
        let n = self.frame_count().min(1000);
        CalibrationStats::from_frames(&vec![Duration::from_nanos(self.frame_ns); n])
    }
}
