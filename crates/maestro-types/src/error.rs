use thiserror::Error;
use uuid::Uuid;

use crate::task::TaskStatus;

/// Errors from repository operations (used by the store traits in maestro-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("storage connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// An illegal task lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("task {task_id}: illegal transition {from} -> {to}")]
pub struct TaskStateError {
    pub task_id: Uuid,
    pub from: TaskStatus,
    pub to: TaskStatus,
}
