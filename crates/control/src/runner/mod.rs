//! Task controller -- owns the wait queue and worker pool.
//!
//! Split into focused submodules:
//! - `core`: Scheduler struct, constructor, submission, and accessor methods
//! - `execution`: control thread loop, control events, and shutdown
//! - `scheduling`: one tick of slot reclamation and priority dispatch

mod core;
mod execution;
mod scheduling;

pub use self::core::{Scheduler, SchedulerError, SubmissionError};
pub(crate) use self::execution::ControlEvent;
pub use self::scheduling::TickReport;
