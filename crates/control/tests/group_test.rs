//! Integration tests for TaskGroup.
//!
//! A group reports exactly once, after every member is terminal, whatever
//! mix of outcomes the members end with.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded};

use taskctl_control::{
    ControlConfig, FnTask, GroupReport, Scheduler, SubmissionError, TaskContext, TaskError,
    TaskGroup, TaskPriority, TaskStatus,
};

const TIMEOUT: Duration = Duration::from_secs(5);

fn scheduler(workers: usize) -> Scheduler {
    Scheduler::new(ControlConfig {
        worker_threads: workers,
        tick_interval_ms: 10,
    })
    .unwrap()
}

#[test]
fn listener_fires_once_with_mixed_outcomes() {
    let s = scheduler(2);
    let (report_tx, report_rx) = unbounded::<GroupReport>();
    let fired = Arc::new(AtomicUsize::new(0));
    let fired_in_listener = Arc::clone(&fired);

    let group = TaskGroup::new("mixed")
        .with_task(FnTask::shared("ok-1", |_: &TaskContext| Ok(())))
        .with_task(FnTask::shared("broken", |_: &TaskContext| {
            Err(TaskError::failed("disk full"))
        }))
        .with_task_priority(FnTask::shared("ok-2", |_: &TaskContext| Ok(())), TaskPriority::Low)
        .on_complete(move |report| {
            fired_in_listener.fetch_add(1, Ordering::SeqCst);
            report_tx.send(report.clone()).ok();
        });

    let handle = group.start(&s).unwrap();
    let report = report_rx.recv_timeout(TIMEOUT).unwrap();

    assert_eq!(report.members.len(), 3);
    assert!(report.members.iter().all(|m| m.status.is_terminal()));
    assert_eq!(report.succeeded().len(), 2);
    assert_eq!(report.failed().len(), 1);
    assert_eq!(report.failed()[0].description, "broken");
    assert_eq!(report.failed()[0].error.as_deref(), Some("disk full"));
    assert!(!report.is_success());

    let names: Vec<&str> = report.members.iter().map(|m| m.description.as_str()).collect();
    assert_eq!(names, vec!["ok-1", "broken", "ok-2"]);

    thread::sleep(Duration::from_millis(30));
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(handle.is_complete());
    assert_eq!(handle.outstanding(), 0);
}

#[test]
fn empty_group_completes_immediately() {
    let s = scheduler(1);
    let fired = Arc::new(AtomicUsize::new(0));
    let fired_in_listener = Arc::clone(&fired);

    let handle = TaskGroup::new("empty")
        .on_complete(move |report| {
            assert!(report.members.is_empty());
            fired_in_listener.fetch_add(1, Ordering::SeqCst);
        })
        .start(&s)
        .unwrap();

    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(handle.is_complete());
    assert!(handle.wait().is_success());
    assert_eq!(handle.progress(), 1.0);
}

#[test]
fn listener_waits_for_the_slowest_member() {
    let s = scheduler(2);
    let (gate_tx, gate_rx) = bounded::<()>(1);
    let completed = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&completed);

    let handle = TaskGroup::new("slow")
        .with_task(FnTask::shared("fast", |_: &TaskContext| Ok(())))
        .with_task(FnTask::shared("slow", move |_: &TaskContext| {
            gate_rx
                .recv_timeout(TIMEOUT)
                .map_err(|_| TaskError::failed("gate never opened"))
        }))
        .on_complete(move |report| {
            *slot.lock().unwrap() = Some(report.succeeded().len());
        })
        .start(&s)
        .unwrap();

    handle.handles()[0].wait_timeout(TIMEOUT).unwrap();
    thread::sleep(Duration::from_millis(30));
    assert!(completed.lock().unwrap().is_none());
    assert!(!handle.is_complete());
    assert_eq!(handle.outstanding(), 1);

    gate_tx.send(()).unwrap();
    let report = handle.wait_timeout(TIMEOUT).unwrap();
    assert!(report.is_success());
    assert_eq!(*completed.lock().unwrap(), Some(2));
}

#[test]
fn canceled_members_are_reported() {
    let s = scheduler(1);
    let (gate_tx, gate_rx) = bounded::<()>(1);

    let handle = TaskGroup::new("cancel")
        .with_task(FnTask::shared("blocker", move |_: &TaskContext| {
            gate_rx
                .recv_timeout(TIMEOUT)
                .map_err(|_| TaskError::failed("gate never opened"))
        }))
        .with_task(FnTask::shared("queued-1", |_: &TaskContext| Ok(())))
        .with_task(FnTask::shared("queued-2", |_: &TaskContext| Ok(())))
        .start(&s)
        .unwrap();

    assert!(handle.handles()[1].cancel());
    assert!(handle.handles()[2].cancel());
    gate_tx.send(()).unwrap();

    let report = handle.wait_timeout(TIMEOUT).unwrap();
    assert_eq!(report.canceled().len(), 2);
    assert_eq!(report.succeeded().len(), 1);
    assert_eq!(report.members[0].status, TaskStatus::Finished);
}

#[test]
fn cancel_all_cancels_every_member() {
    let s = scheduler(1);
    let handle = TaskGroup::new("abort")
        .with_task(FnTask::shared("looping", |ctx: &TaskContext| {
            loop {
                ctx.check_canceled()?;
                thread::sleep(Duration::from_millis(1));
            }
        }))
        .with_task(FnTask::shared("waiting", |_: &TaskContext| Ok(())))
        .start(&s)
        .unwrap();

    let first = handle.handles()[0].clone();
    let deadline = std::time::Instant::now() + TIMEOUT;
    while first.status() != TaskStatus::Processing && std::time::Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }

    assert_eq!(handle.cancel_all(), 2);
    let report = handle.wait_timeout(TIMEOUT).unwrap();
    assert_eq!(report.canceled().len(), 2);
}

#[test]
fn start_after_shutdown_is_rejected() {
    let s = scheduler(1);
    s.shutdown();

    let fired = Arc::new(AtomicUsize::new(0));
    let fired_in_listener = Arc::clone(&fired);
    let result = TaskGroup::new("late")
        .with_task(FnTask::shared("never", |_: &TaskContext| Ok(())))
        .on_complete(move |_| {
            fired_in_listener.fetch_add(1, Ordering::SeqCst);
        })
        .start(&s);

    assert!(matches!(result, Err(SubmissionError::ShutDown)));
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}

#[test]
fn panicking_listener_does_not_poison_the_scheduler() {
    let s = scheduler(1);
    let handle = TaskGroup::new("noisy")
        .with_task(FnTask::shared("ok", |_: &TaskContext| Ok(())))
        .on_complete(|_| panic!("listener bug"))
        .start(&s)
        .unwrap();

    assert!(handle.wait_timeout(TIMEOUT).is_some());
    let after = s
        .process(FnTask::shared("after", |_: &TaskContext| Ok(())), TaskPriority::Normal)
        .unwrap();
    assert_eq!(after.status, TaskStatus::Finished);
}

#[test]
fn listener_can_process_a_follow_up_task() {
    let s = Arc::new(scheduler(1));
    let (result_tx, result_rx) = bounded(1);
    let chained = Arc::clone(&s);

    TaskGroup::new("first stage")
        .with_task(FnTask::shared("stage-1", |_: &TaskContext| Ok(())))
        .on_complete(move |_| {
            let outcome = chained
                .process(FnTask::shared("stage-2", |_: &TaskContext| Ok(())), TaskPriority::Normal)
                .map(|o| o.status);
            result_tx.send(outcome).ok();
        })
        .start(&s)
        .unwrap();

    let outcome = result_rx.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(outcome.ok(), Some(TaskStatus::Finished));
}

#[test]
fn five_members_with_one_error_report_once() {
    let s = scheduler(2);
    let fired = Arc::new(AtomicUsize::new(0));
    let fired_in_listener = Arc::clone(&fired);
    let (report_tx, report_rx) = unbounded::<GroupReport>();

    let mut group = TaskGroup::new("five");
    for i in 0..4 {
        group = group.with_task(FnTask::shared(format!("ok-{i}"), |_: &TaskContext| Ok(())));
    }
    let handle = group
        .with_task(FnTask::shared("bad", |_: &TaskContext| Err(TaskError::failed("bad input"))))
        .on_complete(move |report| {
            fired_in_listener.fetch_add(1, Ordering::SeqCst);
            report_tx.send(report.clone()).ok();
        })
        .start(&s)
        .unwrap();

    let report = report_rx.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(report.members.len(), 5);
    assert_eq!(report.succeeded().len(), 4);
    assert_eq!(report.failed().len(), 1);
    assert_eq!(report.failed()[0].status, TaskStatus::Error);

    thread::sleep(Duration::from_millis(50));
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(report_rx.try_recv().is_err());
    let waited = handle.wait_timeout(TIMEOUT).unwrap();
    assert_eq!(waited.group_id, report.group_id);
    assert_eq!(waited.failed().len(), 1);
}
