//! Per-task shared state and its status state machine.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error};

use crate::observer::{ObserverSet, StatusEvent};
use crate::types::{TaskId, TaskOutcome, TaskPriority, TaskSnapshot, TaskStatus};

/// Callback fired once when a task reaches a terminal status.
pub(crate) type CompletionHook = Box<dyn FnOnce(&TaskOutcome) + Send>;

struct Inner {
    status: TaskStatus,
    progress: f64,
    error: Option<String>,
    slot: Option<usize>,
    submitted_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    hooks: Vec<CompletionHook>,
    /// Observers and hooks have seen the terminal outcome.
    settled: bool,
    /// Thread announcing the terminal outcome, while it does so.
    settling_thread: Option<ThreadId>,
}

impl Inner {
    fn outcome(&self) -> Option<TaskOutcome> {
        self.status.is_terminal().then(|| TaskOutcome {
            status: self.status,
            error: self.error.clone(),
        })
    }

    /// Outcome once it is settled. The settling thread itself gets it
    /// right away, so a hook or observer waiting on its own task returns.
    fn settled_outcome(&self) -> Option<TaskOutcome> {
        let own_thread = self.settling_thread == Some(thread::current().id());
        if self.settled || own_thread {
            self.outcome()
        } else {
            None
        }
    }
}

/// Terminal transition that has been applied but not yet announced to
/// observers and completion hooks. Pass it to [`TaskState::settle`].
#[must_use]
pub(crate) struct Settlement {
    previous: TaskStatus,
    outcome: TaskOutcome,
    hooks: Vec<CompletionHook>,
}

/// Mutable record of one submitted task, shared by its handle, the worker
/// thread running it and the run context handed to the task.
pub(crate) struct TaskState {
    id: TaskId,
    priority: TaskPriority,
    description: String,
    cancel_requested: AtomicBool,
    inner: Mutex<Inner>,
    terminal: Condvar,
    observers: Arc<ObserverSet>,
}

impl TaskState {
    pub(crate) fn new(
        id: TaskId,
        priority: TaskPriority,
        description: String,
        observers: Arc<ObserverSet>,
    ) -> Self {
        Self {
            id,
            priority,
            description,
            cancel_requested: AtomicBool::new(false),
            inner: Mutex::new(Inner {
                status: TaskStatus::Waiting,
                progress: 0.0,
                error: None,
                slot: None,
                submitted_at: Utc::now(),
                started_at: None,
                finished_at: None,
                hooks: Vec::new(),
                settled: false,
                settling_thread: None,
            }),
            terminal: Condvar::new(),
            observers,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn priority(&self) -> TaskPriority {
        self.priority
    }

    pub(crate) fn description(&self) -> &str {
        &self.description
    }

    pub(crate) fn status(&self) -> TaskStatus {
        self.lock().status
    }

    pub(crate) fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    pub(crate) fn progress(&self) -> f64 {
        self.lock().progress
    }

    /// Stored as reported; range and monotonicity are up to the task.
    pub(crate) fn set_progress(&self, progress: f64) {
        self.lock().progress = progress;
    }

    pub(crate) fn error_message(&self) -> Option<String> {
        self.lock().error.clone()
    }

    pub(crate) fn slot(&self) -> Option<usize> {
        self.lock().slot
    }

    pub(crate) fn outcome(&self) -> Option<TaskOutcome> {
        self.lock().outcome()
    }

    pub(crate) fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }

    /// Wall time between dispatch and the terminal transition.
    pub(crate) fn run_duration(&self) -> Option<Duration> {
        let inner = self.lock();
        let started = inner.started_at?;
        let finished = inner.finished_at?;
        finished.signed_duration_since(started).to_std().ok()
    }

    pub(crate) fn snapshot(&self) -> TaskSnapshot {
        let inner = self.lock();
        TaskSnapshot {
            id: self.id,
            description: self.description.clone(),
            priority: self.priority,
            status: inner.status,
            progress: inner.progress,
            error: inner.error.clone(),
            slot: inner.slot,
            submitted_at: inner.submitted_at,
            started_at: inner.started_at,
            finished_at: inner.finished_at,
        }
    }

    // ── Transitions ───────────────────────────────────────────

    /// Tell observers the task entered the queue.
    pub(crate) fn announce_waiting(&self) {
        self.emit(None, TaskStatus::Waiting, None);
    }

    /// `Waiting -> Processing`, binding the task to `slot`.
    ///
    /// Observers are not notified here: the worker thread announces the
    /// transition via [`announce_processing`](Self::announce_processing)
    /// so that it is always delivered before the terminal event.
    pub(crate) fn mark_processing(&self, slot: usize) -> bool {
        let mut inner = self.lock();
        if inner.status != TaskStatus::Waiting {
            debug!(task = %self.id, status = %inner.status, "not dispatching task, no longer waiting");
            return false;
        }
        inner.status = TaskStatus::Processing;
        inner.slot = Some(slot);
        inner.started_at = Some(Utc::now());
        true
    }

    pub(crate) fn announce_processing(&self) {
        self.emit(Some(TaskStatus::Waiting), TaskStatus::Processing, None);
    }

    /// Move to a terminal status and announce it. No-op (returns `false`)
    /// if already terminal.
    pub(crate) fn complete(&self, outcome: TaskOutcome) -> bool {
        match self.finish(outcome) {
            Some(settlement) => {
                self.settle(settlement);
                true
            }
            None => false,
        }
    }

    /// Move to a terminal status without announcing it yet. The task counts
    /// as terminal for slot reclamation from here on; waiters block until
    /// [`settle`](Self::settle) has run.
    pub(crate) fn finish(&self, outcome: TaskOutcome) -> Option<Settlement> {
        self.transition(|status| !status.is_terminal(), outcome)
    }

    /// Request cooperative cancellation.
    ///
    /// A waiting task is canceled on the spot; a running task only sees the
    /// flag through its run context. Returns `true` if the request changed
    /// anything.
    pub(crate) fn request_cancel(&self) -> bool {
        if self.is_terminal() {
            return false;
        }
        let first_request = !self.cancel_requested.swap(true, Ordering::AcqRel);
        let canceled = match self.transition(
            |status| status == TaskStatus::Waiting,
            TaskOutcome::canceled(),
        ) {
            Some(settlement) => {
                self.settle(settlement);
                true
            }
            None => false,
        };
        if !canceled && first_request {
            debug!(task = %self.id, "cancellation requested for running task");
        }
        canceled || first_request
    }

    fn transition(
        &self,
        allowed: impl FnOnce(TaskStatus) -> bool,
        outcome: TaskOutcome,
    ) -> Option<Settlement> {
        debug_assert!(outcome.status.is_terminal());
        let mut inner = self.lock();
        if !allowed(inner.status) {
            return None;
        }
        let previous = inner.status;
        inner.status = outcome.status;
        inner.error = outcome.error.clone();
        inner.finished_at = Some(Utc::now());
        inner.settling_thread = Some(thread::current().id());
        Some(Settlement {
            previous,
            outcome,
            hooks: std::mem::take(&mut inner.hooks),
        })
    }

    /// Notify observers, run the completion hooks, then release waiters.
    /// Must run on the thread that applied the transition.
    pub(crate) fn settle(&self, settlement: Settlement) {
        let Settlement { previous, outcome, hooks } = settlement;
        self.emit(Some(previous), outcome.status, outcome.error.clone());
        for hook in hooks {
            self.fire(hook, &outcome);
        }
        {
            let mut inner = self.lock();
            inner.settled = true;
            inner.settling_thread = None;
        }
        self.terminal.notify_all();
    }

    // ── Completion hooks and waiting ──────────────────────────

    /// Register a hook fired exactly once with the terminal outcome. Fires
    /// immediately on the calling thread if the task is already terminal.
    pub(crate) fn on_complete(&self, hook: CompletionHook) {
        let outcome = {
            let mut inner = self.lock();
            match inner.outcome() {
                Some(outcome) => outcome,
                None => {
                    inner.hooks.push(hook);
                    return;
                }
            }
        };
        self.fire(hook, &outcome);
    }

    fn fire(&self, hook: CompletionHook, outcome: &TaskOutcome) {
        if panic::catch_unwind(AssertUnwindSafe(|| hook(outcome))).is_err() {
            error!(task = %self.id, "completion hook panicked");
        }
    }

    /// Block until the task is terminal and its observers and hooks have run.
    pub(crate) fn wait(&self) -> TaskOutcome {
        let mut inner = self.lock();
        loop {
            if let Some(outcome) = inner.settled_outcome() {
                return outcome;
            }
            inner = self
                .terminal
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub(crate) fn wait_timeout(&self, timeout: Duration) -> Option<TaskOutcome> {
        let inner = self.lock();
        let (inner, _) = self
            .terminal
            .wait_timeout_while(inner, timeout, |inner| inner.settled_outcome().is_none())
            .unwrap_or_else(PoisonError::into_inner);
        inner.settled_outcome()
    }

    fn emit(&self, previous: Option<TaskStatus>, status: TaskStatus, error: Option<String>) {
        if self.observers.is_empty() {
            return;
        }
        self.observers.notify(&StatusEvent {
            task_id: self.id,
            description: self.description.clone(),
            priority: self.priority,
            previous,
            status,
            error,
            at: Utc::now(),
        });
    }
}
