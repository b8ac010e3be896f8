use std::thread;
use std::time::Duration;

use taskctl_control::{Task, TaskContext, TaskError};
use tracing::debug;

const STEPS: u32 = 10;

/// Stand-in job: sleeps through a fixed number of steps, reporting progress
/// and checking for cancellation between steps.
pub struct SimulatedTask {
    name: String,
    step: Duration,
    fail_at_step: Option<u32>,
}

impl SimulatedTask {
    pub fn new(name: impl Into<String>, duration: Duration) -> Self {
        Self {
            name: name.into(),
            step: duration / STEPS,
            fail_at_step: None,
        }
    }

    /// Fail partway through instead of finishing.
    pub fn failing(mut self) -> Self {
        self.fail_at_step = Some(STEPS / 2);
        self
    }
}

impl Task for SimulatedTask {
    fn description(&self) -> &str {
        &self.name
    }

    fn run(&self, ctx: &TaskContext) -> Result<(), TaskError> {
        for step in 0..STEPS {
            ctx.check_canceled()?;
            if self.fail_at_step == Some(step) {
                return Err(TaskError::failed(format!(
                    "{} gave up at step {step} of {STEPS}",
                    self.name
                )));
            }
            thread::sleep(self.step);
            ctx.set_progress(f64::from(step + 1) / f64::from(STEPS));
        }
        debug!(task = %ctx.task_id(), "{} done", self.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use taskctl_control::{Scheduler, TaskPriority, TaskStatus};

    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_simulated_task_finishes() {
        let scheduler = Scheduler::with_workers(1).unwrap();
        let task = Arc::new(SimulatedTask::new("quick", Duration::from_millis(10)));
        let outcome = scheduler.process(task, TaskPriority::Normal).unwrap();
        assert_eq!(outcome.status, TaskStatus::Finished);
    }

    #[test]
    fn test_failing_task_reports_step() {
        let scheduler = Scheduler::with_workers(1).unwrap();
        let task = Arc::new(SimulatedTask::new("flaky", Duration::from_millis(10)).failing());
        let outcome = scheduler.process(task, TaskPriority::Low).unwrap();
        assert_eq!(outcome.status, TaskStatus::Error);
        assert!(outcome.error.unwrap().contains("step 5"));
    }
}
