use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{TaskPriority, TaskStatus};

/// Scheduler operational metrics, refreshed every tick.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerMetrics {
    pub tasks_submitted: u64,
    pub tasks_finished: u64,
    pub tasks_failed: u64,
    pub tasks_canceled: u64,
    /// Number of waiting tasks per priority level.
    pub tasks_pending: HashMap<TaskPriority, usize>,
    /// Slots currently bound to a task.
    pub tasks_running: usize,
    pub pool_size: usize,
    /// Worker utilization ratio (0.0 - 1.0).
    pub worker_utilization: f64,
    /// Rolling mean of dispatch-to-terminal time over dispatched runs.
    pub avg_run_duration: Duration,
    /// Runs contributing to `avg_run_duration`.
    pub timed_runs: u64,
    pub last_completion: Option<DateTime<Utc>>,
    pub ticks: u64,
    pub control_loop_faults: u64,
}

impl SchedulerMetrics {
    pub fn new(pool_size: usize) -> Self {
        Self {
            pool_size,
            ..Self::default()
        }
    }

    pub fn record_submission(&mut self) {
        self.tasks_submitted += 1;
    }

    /// Record a task leaving the scheduler with a terminal status.
    pub fn record_completion(&mut self, status: TaskStatus, run_duration: Option<Duration>) {
        match status {
            TaskStatus::Finished => self.tasks_finished += 1,
            TaskStatus::Error => self.tasks_failed += 1,
            TaskStatus::Canceled => self.tasks_canceled += 1,
            TaskStatus::Waiting | TaskStatus::Processing => return,
        }
        self.last_completion = Some(Utc::now());

        let Some(duration) = run_duration else {
            return;
        };
        self.timed_runs += 1;

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        self.avg_run_duration = if self.timed_runs == 1 {
            duration
        } else {
            let prev_nanos = self.avg_run_duration.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / self.timed_runs as f64;
            Duration::from_nanos(avg_nanos as u64)
        };
    }

    pub fn record_tick(&mut self, pending: HashMap<TaskPriority, usize>, running: usize) {
        self.ticks += 1;
        self.tasks_pending = pending;
        self.tasks_running = running;
        self.worker_utilization = if self.pool_size == 0 {
            0.0
        } else {
            running as f64 / self.pool_size as f64
        };
    }

    pub fn record_fault(&mut self) {
        self.control_loop_faults += 1;
    }

    /// Submitted tasks that have not been accounted as terminal yet.
    pub fn in_flight(&self) -> u64 {
        self.tasks_submitted
            .saturating_sub(self.tasks_finished + self.tasks_failed + self.tasks_canceled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_single_completion() {
        let mut m = SchedulerMetrics::new(4);
        m.record_submission();
        m.record_completion(TaskStatus::Finished, Some(Duration::from_millis(100)));

        assert_eq!(m.tasks_finished, 1);
        assert!(m.last_completion.is_some());
        assert_eq!(m.avg_run_duration, Duration::from_millis(100));
        assert_eq!(m.in_flight(), 0);
    }

    #[test]
    fn record_multiple_completions_averages() {
        let mut m = SchedulerMetrics::new(4);
        m.record_completion(TaskStatus::Finished, Some(Duration::from_millis(100)));
        m.record_completion(TaskStatus::Error, Some(Duration::from_millis(200)));

        assert_eq!(m.tasks_finished, 1);
        assert_eq!(m.tasks_failed, 1);
        // Average of 100ms and 200ms = 150ms
        let avg = m.avg_run_duration.as_millis();
        assert!((140..=160).contains(&avg), "expected ~150ms, got {}ms", avg);
    }

    #[test]
    fn canceled_before_dispatch_has_no_duration() {
        let mut m = SchedulerMetrics::new(1);
        m.record_completion(TaskStatus::Canceled, None);
        assert_eq!(m.tasks_canceled, 1);
        assert_eq!(m.timed_runs, 0);
        assert_eq!(m.avg_run_duration, Duration::ZERO);
    }

    #[test]
    fn non_terminal_status_is_ignored() {
        let mut m = SchedulerMetrics::new(1);
        m.record_completion(TaskStatus::Processing, Some(Duration::from_millis(5)));
        assert_eq!(m.tasks_finished + m.tasks_failed + m.tasks_canceled, 0);
        assert!(m.last_completion.is_none());
    }

    #[test]
    fn utilization_from_tick() {
        let mut m = SchedulerMetrics::new(4);
        m.record_tick(HashMap::from([(TaskPriority::High, 2)]), 3);
        assert_eq!(m.ticks, 1);
        assert_eq!(m.tasks_running, 3);
        assert_eq!(m.worker_utilization, 0.75);
        assert_eq!(m.tasks_pending[&TaskPriority::High], 2);
    }
}
