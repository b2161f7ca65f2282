pub mod config;
pub mod device;
pub mod error;
pub mod headless;
pub mod layout;
pub mod logs;
pub mod replay;
pub mod schedule;
pub mod staircase;
pub mod state;
pub mod threshold;
pub mod trial;

pub use config::{DeviceConfig, ExperimentConfig, StaircaseConfig, ThresholdConfig};
pub use device::{NullDevice, SerialDevice, SimulatedDevice, VibrationDevice, open_or_null};
pub use error::{ConfigError, DeviceError, LayoutError, LogError, SessionError, StaircaseError};
pub use headless::{Responder, SearchResponse, SimulatedParticipant, TrialPlan, run_headless};
pub use layout::load_layouts;
pub use logs::{SessionLogs, SessionPaths, StaircaseRow, VibrationResponseRow};
pub use replay::{ReplayReport, replay_log, replay_rows};
pub use schedule::{BlockSummary, VibrationSchedule};
pub use staircase::{
    Adjustment, ResponseTimingStaircase, StaircaseParams, StaircasePhase, StaircaseSummary,
    StaircaseUpdate,
};
pub use state::{Session, SessionEvent};
pub use threshold::{DetectionStaircase, ThresholdParams, ThresholdRow};
pub use trial::{SearchTrial, ThresholdProbe};
