//! Status-change notification for outside listeners (status views, logs).
//!
//! The scheduler behaves identically with zero observers attached.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::error;

use crate::types::{TaskId, TaskPriority, TaskStatus};

/// One applied status transition.
#[derive(Debug, Clone, Serialize)]
pub struct StatusEvent {
    pub task_id: TaskId,
    pub description: String,
    pub priority: TaskPriority,
    /// `None` for the initial `Waiting` announcement at submission.
    pub previous: Option<TaskStatus>,
    pub status: TaskStatus,
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

/// Receives every applied status transition of every task.
///
/// Called on whichever thread applied the transition (submitter, worker
/// or canceling thread), never while the scheduler lock is held.
pub trait TaskObserver: Send + Sync {
    fn on_status_change(&self, event: &StatusEvent);
}

impl<F> TaskObserver for F
where
    F: Fn(&StatusEvent) + Send + Sync,
{
    fn on_status_change(&self, event: &StatusEvent) {
        self(event)
    }
}

/// Registered observers, shared by the scheduler and every task state.
#[derive(Default)]
pub(crate) struct ObserverSet {
    observers: RwLock<Vec<Arc<dyn TaskObserver>>>,
}

impl ObserverSet {
    pub(crate) fn add(&self, observer: Arc<dyn TaskObserver>) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    pub(crate) fn len(&self) -> usize {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver an event to every observer. A panicking observer is logged
    /// and skipped.
    pub(crate) fn notify(&self, event: &StatusEvent) {
        let observers = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for observer in observers {
            let delivered =
                panic::catch_unwind(AssertUnwindSafe(|| observer.on_status_change(event)));
            if delivered.is_err() {
                error!(task = %event.task_id, status = %event.status, "task observer panicked");
            }
        }
    }
}
