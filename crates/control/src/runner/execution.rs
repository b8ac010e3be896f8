use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::{Arc, PoisonError};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, error, info};

use super::core::{Scheduler, Shared};

/// Wakes the control loop ahead of the next tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ControlEvent {
    /// A task entered the wait queue.
    Submitted,
    /// The task bound to this slot reached a terminal status.
    SlotFreed(usize),
    Shutdown,
}

/// Control thread body. Ticks every `tick_interval`, or earlier when a
/// control event arrives, until shutdown.
///
/// Slots are reclaimed by polling task status each tick; completion
/// events only shorten the wait, so a lost event costs at most one tick.
pub(super) fn control_loop(shared: Arc<Shared>, events: Receiver<ControlEvent>) {
    info!("Task controller loop started");

    while !shared.is_shut_down() {
        match events.recv_timeout(shared.tick_interval) {
            Ok(ControlEvent::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(event) => debug!(?event, "control loop woken"),
            Err(RecvTimeoutError::Timeout) => {}
        }
        if events.try_iter().any(|e| e == ControlEvent::Shutdown) || shared.is_shut_down() {
            break;
        }

        if panic::catch_unwind(AssertUnwindSafe(|| shared.tick())).is_err() {
            error!("control loop fault during tick, continuing");
            shared.with_metrics(|m| m.record_fault());
        }
    }

    info!("Task controller loop stopped");
}

impl Scheduler {
    /// Stop the control loop.
    ///
    /// Waiting tasks are canceled, running tasks get a cancellation request
    /// and keep their threads until they return; nothing is dispatched
    /// afterwards. Idempotent.
    pub fn shutdown(&self) {
        let first = !self.shared.shutdown.swap(true, Ordering::AcqRel);
        if first {
            info!("Scheduler shutdown requested");
        }

        let (waiting, running) = {
            let mut control = self.shared.lock_control();
            (control.queue.drain(), control.pool.running())
        };
        let mut canceled = 0;
        for handle in &waiting {
            if handle.cancel() {
                canceled += 1;
            }
        }
        for handle in &running {
            handle.cancel();
        }
        self.shared.with_metrics(|m| {
            for handle in &waiting {
                m.record_completion(handle.status(), None);
            }
        });
        if !waiting.is_empty() || !running.is_empty() {
            info!(
                canceled,
                running = running.len(),
                "canceled waiting tasks, requested cancellation of running tasks"
            );
        }

        let _ = self.shared.events.send(ControlEvent::Shutdown);
        let thread = self
            .control_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(thread) = thread {
            if thread.join().is_err() {
                error!("control thread panicked");
            }
            info!("Scheduler stopped");
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
