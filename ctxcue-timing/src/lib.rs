pub mod manual;
pub mod timer;

pub use manual::ManualTimer;
pub use timer::{CalibrationStats, HighPrecisionTimer, Timer};

/// Nanoseconds to fractional milliseconds.
pub fn ns_to_ms(ns: u64) -> f64 {
    ns as f64 / 1_000_000.0
}
