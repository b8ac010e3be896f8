use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::observer::ObserverSet;
use crate::state::TaskState;
use crate::task::Task;
use crate::types::{TaskId, TaskOutcome, TaskPriority, TaskSnapshot, TaskStatus};

/// Scheduling wrapper around a submitted [`Task`].
///
/// Cloning a handle is cheap; every clone observes the same task. The
/// submission sequence number doubles as the task id and breaks ties
/// between equal priorities.
#[derive(Clone)]
pub struct TaskHandle {
    task: Arc<dyn Task>,
    state: Arc<TaskState>,
}

impl TaskHandle {
    pub(crate) fn new(
        id: TaskId,
        priority: TaskPriority,
        task: Arc<dyn Task>,
        observers: Arc<ObserverSet>,
    ) -> Self {
        let state = TaskState::new(id, priority, task.description().to_string(), observers);
        Self {
            task,
            state: Arc::new(state),
        }
    }

    pub(crate) fn task(&self) -> &Arc<dyn Task> {
        &self.task
    }

    pub(crate) fn state(&self) -> &Arc<TaskState> {
        &self.state
    }

    pub fn id(&self) -> TaskId {
        self.state.id()
    }

    pub fn sequence(&self) -> u64 {
        self.state.id().sequence()
    }

    pub fn priority(&self) -> TaskPriority {
        self.state.priority()
    }

    pub fn description(&self) -> &str {
        self.state.description()
    }

    pub fn status(&self) -> TaskStatus {
        self.state.status()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Last progress the task reported (owner-reported, not validated).
    pub fn progress(&self) -> f64 {
        self.state.progress()
    }

    pub fn error_message(&self) -> Option<String> {
        self.state.error_message()
    }

    /// Terminal outcome, or `None` while the task is still pending.
    pub fn outcome(&self) -> Option<TaskOutcome> {
        self.state.outcome()
    }

    /// Slot the task was dispatched to, if it ever was.
    pub fn slot(&self) -> Option<usize> {
        self.state.slot()
    }

    /// Whether cancellation has been requested for this task.
    pub fn is_cancel_requested(&self) -> bool {
        self.state.is_cancel_requested()
    }

    /// Request cooperative cancellation. See [`crate::Scheduler`] for the
    /// semantics of canceling waiting versus running tasks.
    pub fn cancel(&self) -> bool {
        self.state.request_cancel()
    }

    /// Register a hook fired exactly once when the task becomes terminal.
    ///
    /// Runs on the thread that applied the terminal transition, or right
    /// away on the caller's thread if the task is already terminal.
    pub fn on_complete<F>(&self, hook: F)
    where
        F: FnOnce(&TaskOutcome) + Send + 'static,
    {
        self.state.on_complete(Box::new(hook));
    }

    /// Block until the task is terminal.
    pub fn wait(&self) -> TaskOutcome {
        self.state.wait()
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<TaskOutcome> {
        self.state.wait_timeout(timeout)
    }

    pub fn run_duration(&self) -> Option<Duration> {
        self.state.run_duration()
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        self.state.snapshot()
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id())
            .field("description", &self.description())
            .field("priority", &self.priority())
            .field("status", &self.status())
            .finish()
    }
}
