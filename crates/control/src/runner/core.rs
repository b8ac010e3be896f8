use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Sender};
use taskctl_core::{ConfigError, ControlConfig};
use tracing::{debug, info};

use crate::handle::TaskHandle;
use crate::metrics::SchedulerMetrics;
use crate::observer::{ObserverSet, StatusEvent, TaskObserver};
use crate::pool::WorkerPool;
use crate::queue::PriorityWaitQueue;
use crate::task::Task;
use crate::types::{SchedulerSnapshot, TaskId, TaskOutcome, TaskPriority, TaskStatus};

use super::execution::{self, ControlEvent};
use super::scheduling::TickReport;

/// Rejections raised synchronously by [`Scheduler::submit`].
#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error("Task already submitted as {id}")]
    AlreadySubmitted { id: TaskId },
    #[error("Scheduler is shut down")]
    ShutDown,
}

/// Errors constructing a [`Scheduler`].
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Failed to spawn control thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Queue and slot table, guarded together by one lock.
pub(super) struct ControlState {
    pub(super) queue: PriorityWaitQueue,
    pub(super) pool: WorkerPool,
    /// Live handles keyed by task allocation, to reject double submission.
    pub(super) active: HashMap<usize, TaskHandle>,
}

/// State shared between the scheduler value and its control thread.
pub(super) struct Shared {
    pub(super) pool_size: usize,
    pub(super) tick_interval: Duration,
    pub(super) control: Mutex<ControlState>,
    pub(super) next_sequence: AtomicU64,
    pub(super) shutdown: AtomicBool,
    pub(super) observers: Arc<ObserverSet>,
    pub(super) metrics: RwLock<SchedulerMetrics>,
    pub(super) events: Sender<ControlEvent>,
}

impl Shared {
    pub(super) fn lock_control(&self) -> MutexGuard<'_, ControlState> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn with_metrics(&self, update: impl FnOnce(&mut SchedulerMetrics)) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        update(&mut metrics);
    }

    pub(super) fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

/// Identity of a task allocation, independent of the vtable half of the pointer.
fn task_key(task: &Arc<dyn Task>) -> usize {
    Arc::as_ptr(task) as *const () as usize
}

/// The task controller. Dispatches submitted [`Task`]s onto a fixed pool of
/// worker slots by priority and tracks them to a terminal status.
///
/// Construct one per process and share it by reference or `Arc`; dropping
/// it shuts the control loop down.
///
/// Cancellation is cooperative: canceling a waiting task removes it from
/// dispatch at once, while a running task only sees the request through its
/// [`TaskContext`](crate::TaskContext). Running tasks are never interrupted.
pub struct Scheduler {
    pub(super) config: ControlConfig,
    pub(super) shared: Arc<Shared>,
    pub(super) control_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Validate the config, allocate the pool and start the control thread.
    pub fn new(config: ControlConfig) -> Result<Self, SchedulerError> {
        config.validate()?;
        let pool_size = config.resolved_worker_threads();
        let tick_interval = config.tick_interval();
        let (events, receiver) = unbounded();

        let shared = Arc::new(Shared {
            pool_size,
            tick_interval,
            control: Mutex::new(ControlState {
                queue: PriorityWaitQueue::new(),
                pool: WorkerPool::new(pool_size),
                active: HashMap::new(),
            }),
            next_sequence: AtomicU64::new(1),
            shutdown: AtomicBool::new(false),
            observers: Arc::new(ObserverSet::default()),
            metrics: RwLock::new(SchedulerMetrics::new(pool_size)),
            events,
        });

        let loop_shared = Arc::clone(&shared);
        let control_thread = thread::Builder::new()
            .name("taskctl-control".to_string())
            .spawn(move || execution::control_loop(loop_shared, receiver))?;

        info!(
            "Scheduler starting with {} workers, tick interval {:?}",
            pool_size, tick_interval
        );

        Ok(Self {
            config,
            shared,
            control_thread: Mutex::new(Some(control_thread)),
        })
    }

    /// Scheduler with `workers` slots and the default tick.
    pub fn with_workers(workers: usize) -> Result<Self, SchedulerError> {
        Self::new(ControlConfig::with_workers(workers))
    }

    /// Enqueue a task. The task enters `Waiting` and is dispatched once a
    /// slot is free and no higher-priority or earlier equal-priority task
    /// is ahead of it.
    pub fn submit(
        &self,
        task: Arc<dyn Task>,
        priority: TaskPriority,
    ) -> Result<TaskHandle, SubmissionError> {
        if self.shared.is_shut_down() {
            return Err(SubmissionError::ShutDown);
        }

        let key = task_key(&task);
        let handle = {
            let mut control = self.shared.lock_control();
            if let Some(existing) = control.active.get(&key) {
                if !existing.is_terminal() {
                    return Err(SubmissionError::AlreadySubmitted { id: existing.id() });
                }
            }
            let sequence = self.shared.next_sequence.fetch_add(1, Ordering::Relaxed);
            let handle = TaskHandle::new(
                TaskId(sequence),
                priority,
                task,
                Arc::clone(&self.shared.observers),
            );
            control.active.insert(key, handle.clone());
            handle
        };

        // Announced before the handle becomes visible to the control loop so
        // observers always see Waiting ahead of Processing.
        handle.state().announce_waiting();

        {
            let mut control = self.shared.lock_control();
            if self.shared.is_shut_down() {
                drop(control);
                handle.state().complete(TaskOutcome::canceled());
                return Err(SubmissionError::ShutDown);
            }
            control.queue.push(handle.clone());
        }

        self.shared.with_metrics(|m| m.record_submission());
        info!(
            task = %handle.id(),
            priority = %handle.priority(),
            "Adding task {} to the task controller queue",
            handle.description()
        );
        if self.shared.events.send(ControlEvent::Submitted).is_err() {
            debug!("control loop gone, task will wait for the next tick");
        }
        Ok(handle)
    }

    /// Submit with [`TaskPriority::Normal`].
    pub fn submit_default(&self, task: Arc<dyn Task>) -> Result<TaskHandle, SubmissionError> {
        self.submit(task, TaskPriority::Normal)
    }

    /// Submit and block the calling thread until the task is terminal.
    pub fn process(
        &self,
        task: Arc<dyn Task>,
        priority: TaskPriority,
    ) -> Result<TaskOutcome, SubmissionError> {
        Ok(self.submit(task, priority)?.wait())
    }

    /// Register an observer for every task status transition.
    pub fn add_observer(&self, observer: Arc<dyn TaskObserver>) {
        self.shared.observers.add(observer);
    }

    /// Closure form of [`add_observer`](Self::add_observer).
    pub fn observe<F>(&self, observer: F)
    where
        F: Fn(&StatusEvent) + Send + Sync + 'static,
    {
        self.add_observer(Arc::new(observer));
    }

    /// Run one reclaim/dispatch pass on the calling thread. The control
    /// thread does the same on every tick.
    pub fn tick(&self) -> TickReport {
        self.shared.tick()
    }

    /// Queued and running tasks as of now.
    pub fn snapshot(&self) -> SchedulerSnapshot {
        let (queued, running) = {
            let control = self.shared.lock_control();
            (control.queue.ordered(), control.pool.running())
        };
        SchedulerSnapshot {
            pool_size: self.shared.pool_size,
            queued: queued
                .iter()
                .filter(|h| h.status() == TaskStatus::Waiting)
                .map(TaskHandle::snapshot)
                .collect(),
            running: running.iter().map(TaskHandle::snapshot).collect(),
        }
    }

    /// Get a snapshot of the current scheduler metrics.
    pub fn metrics(&self) -> SchedulerMetrics {
        self.shared
            .metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn pool_size(&self) -> usize {
        self.shared.pool_size
    }

    pub fn tick_interval(&self) -> Duration {
        self.shared.tick_interval
    }

    pub fn config(&self) -> &ControlConfig {
        &self.config
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.is_shut_down()
    }
}
