//! Throttling scheduler.
//!
//! One run decides which instances get a fresh update-and-deploy cycle:
//! - Snapshot online instances and active compile jobs
//! - Visit instances in random order so capacity pressure is shared fairly
//! - Skip instances already compiling or already on the latest revision
//! - Trigger the rest while the compile job cap allows
//!
//! The cap is advisory: concurrent runs each count active jobs on their own.

mod run_state;
mod throttler;

pub use run_state::RunReport;
pub use throttler::{SchedulerError, SchedulerResult, ThrottleSettings, Throttler};
