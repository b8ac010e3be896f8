//! Task control: a priority scheduler for long-running, cancellable,
//! progress-reporting jobs on a fixed pool of worker threads.
//!
//! Callers implement [`Task`], submit it to a [`Scheduler`] with a
//! [`TaskPriority`] and follow it through its [`TaskHandle`]. A
//! [`TaskGroup`] submits a batch and reports once every member is terminal.

pub mod group;
pub mod handle;
pub mod metrics;
pub mod observer;
mod pool;
mod queue;
pub mod runner;
mod state;
pub mod task;
pub mod types;

pub use group::{GroupHandle, GroupListener, GroupReport, MemberOutcome, TaskGroup};
pub use handle::TaskHandle;
pub use metrics::SchedulerMetrics;
pub use observer::{StatusEvent, TaskObserver};
pub use runner::{Scheduler, SchedulerError, SubmissionError, TickReport};
pub use task::{FnTask, Task, TaskContext, TaskError};
pub use types::{
    ParsePriorityError, SchedulerSnapshot, TaskId, TaskOutcome, TaskPriority, TaskSnapshot,
    TaskStatus,
};

pub use taskctl_core::ControlConfig;
