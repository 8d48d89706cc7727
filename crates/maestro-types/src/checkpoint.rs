//! Checkpoint snapshot record.
//!
//! A checkpoint is an opaque progress snapshot owned by an external store.
//! `completed_tasks` and `failed_tasks` hold step names; a step appears in at
//! most one of them.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: Uuid,
    pub workflow_name: String,
    /// Serialized run context (`previous_results`, variables, ...).
    pub context: serde_json::Value,
    #[serde(default)]
    pub completed_tasks: Vec<String>,
    #[serde(default)]
    pub failed_tasks: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// A fresh, empty checkpoint for `workflow_name`.
    pub fn new(workflow_name: impl Into<String>, context: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            workflow_name: workflow_name.into(),
            context,
            completed_tasks: Vec::new(),
            failed_tasks: Vec::new(),
            current_step: None,
            metadata: HashMap::new(),
            started_at: now,
            updated_at: now,
        }
    }

    /// Record a step as completed, removing it from the failed list.
    pub fn mark_completed(&mut self, step: &str) {
        self.failed_tasks.retain(|s| s != step);
        if !self.completed_tasks.iter().any(|s| s == step) {
            self.completed_tasks.push(step.to_string());
        }
    }

    /// Record a step as failed, removing it from the completed list.
    pub fn mark_failed(&mut self, step: &str) {
        self.completed_tasks.retain(|s| s != step);
        if !self.failed_tasks.iter().any(|s| s == step) {
            self.failed_tasks.push(step.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_is_in_at_most_one_list() {
        let mut cp = Checkpoint::new("wf", serde_json::json!({}));
        cp.mark_failed("build");
        cp.mark_completed("build");
        assert_eq!(cp.completed_tasks, vec!["build"]);
        assert!(cp.failed_tasks.is_empty());

        cp.mark_failed("build");
        assert!(cp.completed_tasks.is_empty());
        assert_eq!(cp.failed_tasks, vec!["build"]);
    }

    #[test]
    fn test_mark_completed_is_idempotent() {
        let mut cp = Checkpoint::new("wf", serde_json::json!({}));
        cp.mark_completed("a");
        cp.mark_completed("a");
        assert_eq!(cp.completed_tasks.len(), 1);
    }

    #[test]
    fn test_checkpoint_json_roundtrip() {
        let mut cp = Checkpoint::new("wf", serde_json::json!({"previous_results": {}}));
        cp.current_step = Some("plan".into());
        cp.metadata
            .insert("max_concurrency".into(), serde_json::json!(4));
        let json = serde_json::to_string(&cp).unwrap();
        let back: Checkpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cp);
    }
}
