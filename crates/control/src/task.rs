use std::fmt;
use std::sync::Arc;

use crate::state::TaskState;
use crate::types::TaskId;

/// Error type for task execution.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Task failed: {0}")]
    Failed(String),
    /// The task observed a cancellation request and stopped early.
    #[error("Task canceled")]
    Canceled,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TaskError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Message recorded on the task when it ends in `Error`.
    pub fn message(&self) -> String {
        match self {
            Self::Failed(msg) => msg.clone(),
            Self::Canceled => "canceled".to_string(),
            Self::Other(e) => format!("{e:#}"),
        }
    }
}

/// A unit of cancellable, progress-reporting work the scheduler can execute.
///
/// `run` executes synchronously on the worker slot the task is bound to. Its
/// return value decides the terminal status: `Ok` finishes the task (or
/// cancels it if cancellation was requested meanwhile),
/// `Err(TaskError::Canceled)` cancels it and any other error, or a panic,
/// ends it in `Error` with the error's message.
pub trait Task: Send + Sync {
    /// Human-readable description for logging and status views.
    fn description(&self) -> &str;

    /// Execute the work. Long-running tasks should poll
    /// [`TaskContext::is_canceled`] and report progress as they go.
    fn run(&self, ctx: &TaskContext) -> Result<(), TaskError>;
}

/// Handed to [`Task::run`]: progress reporting and cancellation polling.
pub struct TaskContext {
    state: Arc<TaskState>,
}

impl TaskContext {
    pub(crate) fn new(state: Arc<TaskState>) -> Self {
        Self { state }
    }

    pub fn task_id(&self) -> TaskId {
        self.state.id()
    }

    /// Report completion fraction, nominally in `[0, 1]`. Not clamped.
    pub fn set_progress(&self, progress: f64) {
        self.state.set_progress(progress);
    }

    pub fn progress(&self) -> f64 {
        self.state.progress()
    }

    pub fn is_canceled(&self) -> bool {
        self.state.is_cancel_requested()
    }

    /// `Err(TaskError::Canceled)` once cancellation was requested, for use
    /// with `?` inside a work loop.
    pub fn check_canceled(&self) -> Result<(), TaskError> {
        if self.is_canceled() {
            Err(TaskError::Canceled)
        } else {
            Ok(())
        }
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("task_id", &self.state.id())
            .field("canceled", &self.is_canceled())
            .finish()
    }
}

/// Adapts a closure into a [`Task`].
pub struct FnTask<F> {
    description: String,
    work: F,
}

impl<F> FnTask<F>
where
    F: Fn(&TaskContext) -> Result<(), TaskError> + Send + Sync,
{
    pub fn new(description: impl Into<String>, work: F) -> Self {
        Self {
            description: description.into(),
            work,
        }
    }

    pub fn shared(description: impl Into<String>, work: F) -> Arc<Self> {
        Arc::new(Self::new(description, work))
    }
}

impl<F> Task for FnTask<F>
where
    F: Fn(&TaskContext) -> Result<(), TaskError> + Send + Sync,
{
    fn description(&self) -> &str {
        &self.description
    }

    fn run(&self, ctx: &TaskContext) -> Result<(), TaskError> {
        (self.work)(ctx)
    }
}
