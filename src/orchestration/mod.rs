// Orchestration - turns inputs into a batch of remote try-on jobs and
// manages follow-up variation/upscale requests

pub mod error;
pub mod executor;
pub mod planner;
pub mod postprocess;
pub mod progress;
pub mod session;
pub mod types;

pub use error::{BatchError, InputError, PostProcessError, SessionError, ValidationError};
pub use executor::{BatchExecutor, BatchOutcome};
pub use planner::{Plan, plan};
pub use postprocess::PostProcessor;
pub use progress::{Progress, ProgressBoard, ProgressEstimator, ProgressReporter, ProgressSettings};
pub use session::{Selection, Session, SessionSettings, SessionSnapshot};
pub use types::*;
