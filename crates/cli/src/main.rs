mod cli;
mod config;
mod simulated;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use taskctl_control::{GroupReport, Scheduler, TaskGroup, TaskPriority};

use crate::cli::CliArgs;
use crate::simulated::SimulatedTask;

/// How often group progress is logged while waiting.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

fn main() -> Result<()> {
    taskctl_core::load_dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();
    let config = config::load(&args).context("failed to load configuration")?;
    config.log_summary();

    let scheduler = Scheduler::new(config.control).context("failed to start scheduler")?;

    let duration = Duration::from_millis(args.duration_ms);
    let failing_from = args.tasks.saturating_sub(args.fail);
    let mut group = TaskGroup::new("simulated batch");
    for i in 0..args.tasks {
        let priority = TaskPriority::ALL[i % TaskPriority::ALL.len()];
        let mut task = SimulatedTask::new(format!("job-{i} ({priority})"), duration);
        if i >= failing_from {
            task = task.failing();
        }
        group.push(Arc::new(task), priority);
    }

    let group = group.start(&scheduler).context("failed to submit task group")?;
    let mut cancel = CancelDeadline::after(args.cancel_after_ms, Instant::now());

    let report = loop {
        if let Some(report) = group.wait_timeout(PROGRESS_INTERVAL) {
            break report;
        }
        let snapshot = scheduler.snapshot();
        info!(
            percent = (group.progress() * 100.0).round() as u64,
            outstanding = group.outstanding(),
            running = snapshot.processing_count(),
            queued = snapshot.queued.len(),
            "waiting for task group"
        );
        if cancel.take_due(Instant::now()) {
            let requested = group.cancel_all();
            warn!(requested, "canceling task group");
        }
    };

    scheduler.shutdown();
    let metrics = scheduler.metrics();
    info!(
        submitted = metrics.tasks_submitted,
        finished = metrics.tasks_finished,
        failed = metrics.tasks_failed,
        canceled = metrics.tasks_canceled,
        avg_run_ms = metrics.avg_run_duration.as_millis() as u64,
        "Scheduler metrics"
    );

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    let failed = report.failed().len();
    if failed > 0 {
        anyhow::bail!("{failed} of {} tasks failed", report.members.len());
    }
    Ok(())
}

/// One-shot deadline for `--cancel-after-ms`.
struct CancelDeadline {
    at: Option<Instant>,
}

impl CancelDeadline {
    fn after(ms: Option<u64>, now: Instant) -> Self {
        Self {
            at: ms.map(|ms| now + Duration::from_millis(ms)),
        }
    }

    /// True exactly once, on the first call at or past the deadline.
    fn take_due(&mut self, now: Instant) -> bool {
        match self.at {
            Some(at) if now >= at => {
                self.at = None;
                true
            }
            _ => false,
        }
    }
}

fn print_report(report: &GroupReport) {
    println!("Task group '{}' ({})", report.name, report.group_id);
    for member in &report.members {
        match &member.error {
            Some(error) => println!(
                "  {:<8} {:<20} {:<10} {}",
                member.task_id.to_string(),
                member.description,
                member.status,
                error
            ),
            None => println!(
                "  {:<8} {:<20} {}",
                member.task_id.to_string(),
                member.description,
                member.status
            ),
        }
    }
    println!(
        "{} finished, {} failed, {} canceled",
        report.succeeded().len(),
        report.failed().len(),
        report.canceled().len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_deadline_fires_once() {
        let start = Instant::now();
        let mut cancel = CancelDeadline::after(Some(100), start);
        assert!(!cancel.take_due(start));
        assert!(cancel.take_due(start + Duration::from_millis(100)));
        assert!(!cancel.take_due(start + Duration::from_millis(350)));
        assert!(!cancel.take_due(start + Duration::from_millis(600)));
    }

    #[test]
    fn test_no_deadline_never_fires() {
        let start = Instant::now();
        let mut cancel = CancelDeadline::after(None, start);
        assert!(!cancel.take_due(start + Duration::from_secs(60)));
    }
}
