//! Fixed array of worker slots. Each occupied slot owns one OS thread
//! running exactly one task. A slot is free again as soon as its task is
//! terminal; the thread may still be running completion hooks.

use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use tracing::{debug, error, info, warn};

use crate::handle::TaskHandle;
use crate::runner::ControlEvent;
use crate::task::{TaskContext, TaskError};
use crate::types::{TaskId, TaskOutcome, TaskStatus};

struct Occupant {
    handle: TaskHandle,
    thread: JoinHandle<()>,
}

struct Slot {
    index: usize,
    occupant: Option<Occupant>,
}

/// Worker thread of a reclaimed slot that has not exited yet.
struct Exiting {
    slot: usize,
    task: TaskId,
    thread: JoinHandle<()>,
}

pub(crate) struct WorkerPool {
    slots: Vec<Slot>,
    exiting: Vec<Exiting>,
}

impl WorkerPool {
    pub(crate) fn new(size: usize) -> Self {
        let slots = (0..size)
            .map(|index| Slot { index, occupant: None })
            .collect();
        Self {
            slots,
            exiting: Vec::new(),
        }
    }

    pub(crate) fn busy_count(&self) -> usize {
        self.slots.iter().filter(|s| s.occupant.is_some()).count()
    }

    pub(crate) fn idle_slots(&self) -> Vec<usize> {
        self.slots
            .iter()
            .filter(|s| s.occupant.is_none())
            .map(|s| s.index)
            .collect()
    }

    /// Handles bound to a slot, ordered by slot index.
    pub(crate) fn running(&self) -> Vec<TaskHandle> {
        self.slots
            .iter()
            .filter_map(|s| s.occupant.as_ref().map(|o| o.handle.clone()))
            .collect()
    }

    /// Threads of reclaimed slots still finishing completion hooks.
    pub(crate) fn exiting(&self) -> usize {
        self.exiting.len()
    }

    /// Clear every slot whose task is terminal or whose worker thread has
    /// terminated, and join exited threads of earlier reclaims.
    pub(crate) fn reclaim_finished(&mut self) -> Vec<TaskHandle> {
        let Self { slots, exiting } = self;
        reap_exited(exiting);

        let mut reclaimed = Vec::new();
        for slot in slots.iter_mut() {
            let done = slot
                .occupant
                .as_ref()
                .is_some_and(|o| o.handle.is_terminal() || o.thread.is_finished());
            if !done {
                continue;
            }
            let Some(Occupant { handle, thread }) = slot.occupant.take() else {
                continue;
            };
            if thread.is_finished() {
                join_worker(slot.index, handle.id(), thread);
            } else {
                exiting.push(Exiting {
                    slot: slot.index,
                    task: handle.id(),
                    thread,
                });
            }
            // The worker always records an outcome; this only catches a
            // thread that died before reaching that point.
            if handle
                .state()
                .complete(TaskOutcome::error("worker exited without reporting a status"))
            {
                warn!(slot = slot.index, task = %handle.id(), "reclaimed slot with unfinished task");
            }
            debug!(slot = slot.index, task = %handle.id(), status = %handle.status(), "slot reclaimed");
            reclaimed.push(handle);
        }
        reclaimed
    }

    /// Bind `handle` to the idle slot `index` and start its worker thread.
    ///
    /// Returns `Ok(false)` when the task is no longer waiting (canceled
    /// after it was queued); the slot stays idle. A spawn failure leaves
    /// the task in `Processing` for the caller to fail outside the lock.
    pub(crate) fn dispatch(
        &mut self,
        index: usize,
        handle: TaskHandle,
        events: &Sender<ControlEvent>,
    ) -> io::Result<bool> {
        let slot = &mut self.slots[index];
        debug_assert!(slot.occupant.is_none(), "dispatch into busy slot {index}");

        if !handle.state().mark_processing(index) {
            return Ok(false);
        }

        let worker_handle = handle.clone();
        let worker_events = events.clone();
        let thread = thread::Builder::new()
            .name(format!("taskctl-slot-{index}"))
            .spawn(move || execute(worker_handle, index, worker_events))?;

        debug!(
            slot = index,
            task = %handle.id(),
            priority = %handle.priority(),
            description = handle.description(),
            "task dispatched"
        );
        slot.occupant = Some(Occupant { handle, thread });
        Ok(true)
    }
}

/// Worker thread body: run the task and convert its result, including a
/// panic, into a terminal status.
fn execute(handle: TaskHandle, slot: usize, events: Sender<ControlEvent>) {
    let state = handle.state();
    state.announce_processing();

    let ctx = TaskContext::new(Arc::clone(state));
    let result = panic::catch_unwind(AssertUnwindSafe(|| handle.task().run(&ctx)));
    let outcome = match result {
        Ok(Ok(())) if ctx.is_canceled() => TaskOutcome::canceled(),
        Ok(Ok(())) => TaskOutcome::finished(),
        Ok(Err(TaskError::Canceled)) => TaskOutcome::canceled(),
        Ok(Err(e)) => TaskOutcome::error(e.message()),
        Err(payload) => TaskOutcome::error(format!(
            "task panicked: {}",
            panic_message(payload.as_ref())
        )),
    };

    match outcome.status {
        TaskStatus::Error => warn!(
            task = %handle.id(),
            slot,
            error = outcome.error.as_deref().unwrap_or(""),
            "task failed: {}",
            handle.description()
        ),
        TaskStatus::Canceled => info!(task = %handle.id(), slot, "task canceled: {}", handle.description()),
        _ => debug!(task = %handle.id(), slot, "task finished: {}", handle.description()),
    }

    let settlement = state.finish(outcome);
    // The slot is reclaimable from here; hooks below run on this thread
    // without holding it. The control loop may already be gone during
    // shutdown.
    let _ = events.send(ControlEvent::SlotFreed(slot));
    if let Some(settlement) = settlement {
        state.settle(settlement);
    }
}

fn reap_exited(exiting: &mut Vec<Exiting>) {
    if exiting.is_empty() {
        return;
    }
    let (exited, running): (Vec<_>, Vec<_>) = std::mem::take(exiting)
        .into_iter()
        .partition(|e| e.thread.is_finished());
    *exiting = running;
    for e in exited {
        join_worker(e.slot, e.task, e.thread);
    }
}

fn join_worker(slot: usize, task: TaskId, thread: JoinHandle<()>) {
    if thread.join().is_err() {
        error!(slot, task = %task, "worker thread panicked");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
