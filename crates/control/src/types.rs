use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a submitted task: its submission sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl TaskId {
    pub fn sequence(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Lifecycle state of a task.
///
/// `Waiting -> Processing -> {Finished, Error, Canceled}`, plus
/// `Waiting -> Canceled`. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Enqueued, not yet bound to a slot.
    Waiting,
    /// Bound to a slot and executing.
    Processing,
    Finished,
    Error,
    Canceled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Error | Self::Canceled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "WAITING",
            Self::Processing => "PROCESSING",
            Self::Finished => "FINISHED",
            Self::Error => "ERROR",
            Self::Canceled => "CANCELED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Task scheduling priority. Lower numeric value = higher priority.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    High = 0,
    #[default]
    Normal = 1,
    Low = 2,
}

impl TaskPriority {
    pub const ALL: [TaskPriority; 3] = [Self::High, Self::Normal, Self::Low];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown priority '{0}', expected high, normal or low")]
pub struct ParsePriorityError(String);

impl FromStr for TaskPriority {
    type Err = ParsePriorityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Self::High),
            "normal" => Ok(Self::Normal),
            "low" => Ok(Self::Low),
            _ => Err(ParsePriorityError(s.to_string())),
        }
    }
}

/// Terminal result of a task, as seen by handles and completion hooks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub status: TaskStatus,
    /// Present only for `Error`.
    pub error: Option<String>,
}

impl TaskOutcome {
    pub fn finished() -> Self {
        Self { status: TaskStatus::Finished, error: None }
    }

    pub fn canceled() -> Self {
        Self { status: TaskStatus::Canceled, error: None }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { status: TaskStatus::Error, error: Some(message.into()) }
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Finished
    }
}

/// Point-in-time view of one task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub description: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub progress: f64,
    pub error: Option<String>,
    pub slot: Option<usize>,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Point-in-time view of the scheduler's queue and pool.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerSnapshot {
    pub pool_size: usize,
    /// Waiting tasks in dispatch order.
    pub queued: Vec<TaskSnapshot>,
    /// Tasks bound to a slot, ordered by slot index.
    pub running: Vec<TaskSnapshot>,
}

impl SchedulerSnapshot {
    pub fn idle_slots(&self) -> usize {
        self.pool_size.saturating_sub(self.running.len())
    }

    pub fn processing_count(&self) -> usize {
        self.running
            .iter()
            .filter(|t| t.status == TaskStatus::Processing)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ordering() {
        assert!(TaskPriority::High < TaskPriority::Normal);
        assert!(TaskPriority::Normal < TaskPriority::Low);
        assert_eq!(TaskPriority::default(), TaskPriority::Normal);
    }

    #[test]
    fn priority_parses_case_insensitively() {
        assert_eq!("HIGH".parse::<TaskPriority>().unwrap(), TaskPriority::High);
        assert_eq!(" normal ".parse::<TaskPriority>().unwrap(), TaskPriority::Normal);
        assert_eq!("Low".parse::<TaskPriority>().unwrap(), TaskPriority::Low);
        assert!("urgent".parse::<TaskPriority>().is_err());
    }

    #[test]
    fn terminal_states() {
        assert!(!TaskStatus::Waiting.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
        assert!(TaskStatus::Finished.is_terminal());
        assert!(TaskStatus::Error.is_terminal());
        assert!(TaskStatus::Canceled.is_terminal());
    }

    #[test]
    fn status_serializes_upper_case() {
        let json = serde_json::to_string(&TaskStatus::Processing).unwrap();
        assert_eq!(json, "\"PROCESSING\"");
        assert_eq!(TaskStatus::Canceled.to_string(), "CANCELED");
    }

    #[test]
    fn outcome_constructors() {
        assert!(TaskOutcome::finished().is_success());
        assert!(!TaskOutcome::canceled().is_success());
        let err = TaskOutcome::error("boom");
        assert_eq!(err.status, TaskStatus::Error);
        assert_eq!(err.error.as_deref(), Some("boom"));
    }
}
