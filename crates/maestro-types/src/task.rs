//! Runtime task types.
//!
//! A `Task` is one execution attempt of a step. It moves through
//! `Pending -> Running -> {Succeeded, Failed}`; terminal states are final.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TaskStateError;

// ---------------------------------------------------------------------------
// AgentRole
// ---------------------------------------------------------------------------

/// A resolved role: who performs a task.
///
/// Role aliases in step definitions resolve to these through the engine's
/// role table; unknown aliases become a bare role carrying only the name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRole {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

impl AgentRole {
    /// A role that is nothing more than its name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            model: None,
            instructions: None,
        }
    }
}

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }

    /// Whether `self -> next` is a legal transition.
    ///
    /// `Pending -> Failed` is allowed so a task that errors before it starts
    /// running can still be closed out.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Running)
                | (TaskStatus::Pending, TaskStatus::Failed)
                | (TaskStatus::Running, TaskStatus::Succeeded)
                | (TaskStatus::Running, TaskStatus::Failed)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// UUIDv7 task ID.
    pub id: Uuid,
    pub role: AgentRole,
    pub description: String,
    /// Workflow this task belongs to.
    pub workflow_name: String,
    /// Step this task executes. Spawned tasks use `<parent>::spawned::<id>`.
    pub step_name: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<HashMap<String, serde_json::Value>>,
    /// Error message of the final attempt, when failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a pending task.
    pub fn new(
        role: AgentRole,
        description: impl Into<String>,
        workflow_name: impl Into<String>,
        step_name: impl Into<String>,
        inputs: Option<HashMap<String, serde_json::Value>>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            role,
            description: description.into(),
            workflow_name: workflow_name.into(),
            step_name: step_name.into(),
            status: TaskStatus::Pending,
            inputs,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, refreshing `updated_at`.
    pub fn transition(&mut self, next: TaskStatus) -> Result<(), TaskStateError> {
        if !self.status.can_transition_to(next) {
            return Err(TaskStateError {
                task_id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Close out a non-terminal task as `Failed` with an error message.
    ///
    /// No-op on a task that already reached a terminal state.
    pub fn fail(&mut self, error: impl Into<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> Task {
        Task::new(AgentRole::named("dev"), "build", "wf", "build", None)
    }

    #[test]
    fn happy_path_transitions() {
        let mut t = task();
        assert_eq!(t.status, TaskStatus::Pending);
        t.transition(TaskStatus::Running).unwrap();
        t.transition(TaskStatus::Succeeded).unwrap();
        assert!(t.status.is_terminal());
    }

    #[test]
    fn terminal_states_are_final() {
        let mut t = task();
        t.transition(TaskStatus::Running).unwrap();
        t.transition(TaskStatus::Failed).unwrap();
        let err = t.transition(TaskStatus::Running).unwrap_err();
        assert_eq!(err.from, TaskStatus::Failed);
        assert_eq!(err.to, TaskStatus::Running);
        assert!(t.transition(TaskStatus::Succeeded).is_err());
    }

    #[test]
    fn pending_cannot_skip_to_succeeded() {
        let mut t = task();
        assert!(t.transition(TaskStatus::Succeeded).is_err());
    }

    #[test]
    fn fail_is_noop_on_terminal_task() {
        let mut t = task();
        t.transition(TaskStatus::Running).unwrap();
        t.transition(TaskStatus::Succeeded).unwrap();
        t.fail("late error");
        assert_eq!(t.status, TaskStatus::Succeeded);
        assert!(t.error.is_none());

        let mut t = task();
        t.fail("boom");
        assert_eq!(t.status, TaskStatus::Failed);
        assert_eq!(t.error.as_deref(), Some("boom"));
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&TaskStatus::Succeeded).unwrap();
        assert_eq!(json, "\"succeeded\"");
        assert_eq!(TaskStatus::Running.to_string(), "running");
    }
}
