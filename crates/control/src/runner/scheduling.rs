use std::io;

use tracing::{error, trace, Level};

use crate::handle::TaskHandle;
use crate::types::TaskOutcome;

use super::core::{ControlState, Shared};

/// What a single tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Slots cleared because their task became terminal.
    pub reclaimed: usize,
    /// Handles bound to a slot and started.
    pub dispatched: usize,
    /// Queued handles dropped because they were canceled while waiting.
    pub discarded: usize,
    /// Handles still waiting after the tick.
    pub queued: usize,
    /// Slots bound after the tick.
    pub running: usize,
    /// Worker threads of freed slots still running completion hooks.
    pub exiting: usize,
}

impl Shared {
    /// Reclaim finished slots, then fill idle slots from the wait queue in
    /// priority order. Completion bookkeeping and spawn-failure handling run
    /// after the lock is released.
    pub(super) fn tick(&self) -> TickReport {
        let mut report = TickReport::default();
        let mut finished: Vec<TaskHandle> = Vec::new();
        let mut failed_spawns: Vec<(TaskHandle, io::Error)> = Vec::new();

        let (pending, traced) = {
            let mut control = self.lock_control();
            let ControlState { queue, pool, active } = &mut *control;

            let reclaimed = pool.reclaim_finished();
            report.reclaimed = reclaimed.len();
            finished.extend(reclaimed);

            let discarded = queue.purge_inactive();
            report.discarded = discarded.len();
            finished.extend(discarded);

            'slots: for index in pool.idle_slots() {
                while let Some(handle) = queue.pop() {
                    match pool.dispatch(index, handle.clone(), &self.events) {
                        Ok(true) => {
                            report.dispatched += 1;
                            continue 'slots;
                        }
                        Ok(false) => {
                            report.discarded += 1;
                            finished.push(handle);
                        }
                        Err(e) => failed_spawns.push((handle, e)),
                    }
                }
                break;
            }

            active.retain(|_, handle| !handle.is_terminal());
            report.queued = queue.len();
            report.running = pool.busy_count();
            report.exiting = pool.exiting();

            let traced = if tracing::enabled!(Level::TRACE) {
                let mut handles = pool.running();
                handles.extend(queue.ordered());
                handles
            } else {
                Vec::new()
            };
            (queue.pending_by_priority(), traced)
        };

        for (handle, e) in failed_spawns {
            error!(task = %handle.id(), error = %e, "failed to start worker thread");
            handle
                .state()
                .complete(TaskOutcome::error(format!("failed to start worker thread: {e}")));
            finished.push(handle);
        }

        for handle in &traced {
            let snapshot = handle.snapshot();
            trace!(
                task = %snapshot.id,
                slot = ?snapshot.slot,
                "Task {} [{}] progress {:.2} error? {}",
                snapshot.description,
                snapshot.status,
                snapshot.progress,
                snapshot.error.as_deref().unwrap_or("none")
            );
        }

        self.with_metrics(|m| {
            for handle in &finished {
                m.record_completion(handle.status(), handle.run_duration());
            }
            m.record_tick(pending, report.running);
        });

        report
    }
}
