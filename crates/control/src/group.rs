//! Batches of tasks with one aggregate "all terminal" callback.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::handle::TaskHandle;
use crate::runner::{Scheduler, SubmissionError};
use crate::task::Task;
use crate::types::{TaskId, TaskPriority, TaskStatus};

/// Callback invoked once with the report of a completed group.
pub type GroupListener = Box<dyn FnOnce(&GroupReport) + Send>;

/// Terminal state of one group member.
#[derive(Debug, Clone, Serialize)]
pub struct MemberOutcome {
    pub task_id: TaskId,
    pub description: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub error: Option<String>,
}

/// Aggregate result of a group, members in submission order.
#[derive(Debug, Clone, Serialize)]
pub struct GroupReport {
    pub group_id: Uuid,
    pub name: String,
    pub members: Vec<MemberOutcome>,
}

impl GroupReport {
    fn with_status(&self, status: TaskStatus) -> Vec<&MemberOutcome> {
        self.members.iter().filter(|m| m.status == status).collect()
    }

    pub fn succeeded(&self) -> Vec<&MemberOutcome> {
        self.with_status(TaskStatus::Finished)
    }

    pub fn failed(&self) -> Vec<&MemberOutcome> {
        self.with_status(TaskStatus::Error)
    }

    pub fn canceled(&self) -> Vec<&MemberOutcome> {
        self.with_status(TaskStatus::Canceled)
    }

    /// True when every member finished (vacuously true for an empty group).
    pub fn is_success(&self) -> bool {
        self.members.iter().all(|m| m.status == TaskStatus::Finished)
    }
}

/// A batch of tasks submitted together.
///
/// A failing member does not cancel its siblings; the listener reports
/// which members failed or were canceled.
pub struct TaskGroup {
    id: Uuid,
    name: String,
    members: Vec<(Arc<dyn Task>, TaskPriority)>,
    listener: Option<GroupListener>,
}

impl TaskGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            members: Vec::new(),
            listener: None,
        }
    }

    /// Add a member with [`TaskPriority::Normal`].
    pub fn with_task(self, task: Arc<dyn Task>) -> Self {
        self.with_task_priority(task, TaskPriority::Normal)
    }

    pub fn with_task_priority(mut self, task: Arc<dyn Task>, priority: TaskPriority) -> Self {
        self.members.push((task, priority));
        self
    }

    pub fn push(&mut self, task: Arc<dyn Task>, priority: TaskPriority) {
        self.members.push((task, priority));
    }

    /// Set the aggregate listener, fired exactly once after every member
    /// is terminal.
    pub fn on_complete<F>(mut self, listener: F) -> Self
    where
        F: FnOnce(&GroupReport) + Send + 'static,
    {
        self.listener = Some(Box::new(listener));
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Submit every member.
    ///
    /// If a submission is rejected, members already submitted are canceled,
    /// the listener is dropped without firing and the error is returned.
    /// An empty group completes immediately.
    pub fn start(self, scheduler: &Scheduler) -> Result<GroupHandle, SubmissionError> {
        let Self { id, name, members, listener } = self;

        let mut handles = Vec::with_capacity(members.len());
        for (task, priority) in members {
            match scheduler.submit(task, priority) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    warn!(group = %id, name = %name, error = %e, "task group submission failed, canceling submitted members");
                    for handle in &handles {
                        handle.cancel();
                    }
                    return Err(e);
                }
            }
        }

        info!(group = %id, members = handles.len(), "Task group {} started", name);

        let shared = Arc::new(GroupShared {
            id,
            name,
            outstanding: AtomicUsize::new(handles.len()),
            handles,
            listener: Mutex::new(listener),
            report: Mutex::new(None),
            done: Condvar::new(),
        });

        if shared.handles.is_empty() {
            shared.finish();
        }
        for handle in &shared.handles {
            let group = Arc::clone(&shared);
            handle.on_complete(move |_| group.member_done());
        }

        Ok(GroupHandle { shared })
    }
}

impl fmt::Debug for TaskGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskGroup")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("members", &self.members.len())
            .finish()
    }
}

struct GroupShared {
    id: Uuid,
    name: String,
    outstanding: AtomicUsize,
    handles: Vec<TaskHandle>,
    listener: Mutex<Option<GroupListener>>,
    report: Mutex<Option<GroupReport>>,
    done: Condvar,
}

impl GroupShared {
    fn member_done(&self) {
        if self.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.finish();
        }
    }

    fn finish(&self) {
        let report = GroupReport {
            group_id: self.id,
            name: self.name.clone(),
            members: self
                .handles
                .iter()
                .map(|h| MemberOutcome {
                    task_id: h.id(),
                    description: h.description().to_string(),
                    priority: h.priority(),
                    status: h.status(),
                    error: h.error_message(),
                })
                .collect(),
        };

        info!(
            group = %self.id,
            succeeded = report.succeeded().len(),
            failed = report.failed().len(),
            canceled = report.canceled().len(),
            "Task group {} complete",
            self.name
        );

        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(listener) = listener {
            if panic::catch_unwind(AssertUnwindSafe(|| listener(&report))).is_err() {
                error!(group = %self.id, "task group listener panicked");
            }
        }

        // Published after the listener returns, so a completed handle
        // implies the listener has run.
        *self.report.lock().unwrap_or_else(PoisonError::into_inner) = Some(report);
        self.done.notify_all();
    }
}

/// Handle to a started [`TaskGroup`].
#[derive(Clone)]
pub struct GroupHandle {
    shared: Arc<GroupShared>,
}

impl GroupHandle {
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Member handles in submission order.
    pub fn handles(&self) -> &[TaskHandle] {
        &self.shared.handles
    }

    /// Members not yet terminal.
    pub fn outstanding(&self) -> usize {
        self.shared.outstanding.load(Ordering::Acquire)
    }

    pub fn is_complete(&self) -> bool {
        self.report().is_some()
    }

    pub fn report(&self) -> Option<GroupReport> {
        self.shared
            .report
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Mean reported progress across members.
    pub fn progress(&self) -> f64 {
        let handles = &self.shared.handles;
        if handles.is_empty() {
            return 1.0;
        }
        handles.iter().map(TaskHandle::progress).sum::<f64>() / handles.len() as f64
    }

    /// Request cancellation of every member. Returns how many requests
    /// changed anything.
    pub fn cancel_all(&self) -> usize {
        self.shared.handles.iter().filter(|h| h.cancel()).count()
    }

    /// Block until every member is terminal.
    pub fn wait(&self) -> GroupReport {
        let mut report = self.shared.report.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(report) = report.as_ref() {
                return report.clone();
            }
            report = self
                .shared
                .done
                .wait(report)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<GroupReport> {
        let report = self.shared.report.lock().unwrap_or_else(PoisonError::into_inner);
        let (report, _) = self
            .shared
            .done
            .wait_timeout_while(report, timeout, |report| report.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        report.clone()
    }
}

impl fmt::Debug for GroupHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupHandle")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .field("outstanding", &self.outstanding())
            .finish()
    }
}
