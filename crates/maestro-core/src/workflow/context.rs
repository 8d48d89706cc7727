//! Run context shared with runners and prompt builders.
//!
//! `RunContext` carries the results of earlier steps (`previous_results`) and
//! run-level variables. It is the only channel through which a step observes
//! the outcome of earlier steps, and it is what a checkpoint snapshots.

use std::collections::HashMap;

use maestro_types::agent::AgentResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    /// Results keyed by step name.
    #[serde(default)]
    pub previous_results: HashMap<String, AgentResult>,
    /// User-defined variables.
    #[serde(default)]
    pub variables: HashMap<String, Value>,
    /// Root of the repository the agents work in, when there is one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository_root: Option<String>,
    /// Feature under construction; rendered into prompts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_description: Option<String>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set a variable.
    pub fn with_variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    /// Builder: set the feature description.
    pub fn with_feature(mut self, description: impl Into<String>) -> Self {
        self.feature_description = Some(description.into());
        self
    }

    /// Record the result of a step, replacing any earlier one.
    pub fn record(&mut self, step_name: impl Into<String>, result: AgentResult) {
        self.previous_results.insert(step_name.into(), result);
    }

    pub fn result_of(&self, step_name: &str) -> Option<&AgentResult> {
        self.previous_results.get(step_name)
    }

    /// Serialize for a checkpoint snapshot.
    pub fn to_json(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Restore from a checkpoint snapshot.
    pub fn from_json(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_replaces_previous_result() {
        let mut ctx = RunContext::new();
        ctx.record("build", AgentResult::failed("boom"));
        ctx.record("build", AgentResult::succeeded("ok"));
        assert!(ctx.result_of("build").unwrap().success);
        assert!(ctx.result_of("missing").is_none());
    }

    #[test]
    fn test_json_snapshot_roundtrip() {
        let mut ctx = RunContext::new()
            .with_variable("region", json!("eu"))
            .with_feature("dark mode");
        ctx.record("plan", AgentResult::succeeded("planned").with_raw_output("{}"));

        let snapshot = ctx.to_json().unwrap();
        assert_eq!(snapshot["previous_results"]["plan"]["summary"], "planned");
        let back = RunContext::from_json(snapshot).unwrap();
        assert_eq!(back, ctx);
    }

    #[test]
    fn test_from_empty_object_uses_defaults() {
        let ctx = RunContext::from_json(json!({})).unwrap();
        assert!(ctx.previous_results.is_empty());
        assert!(ctx.feature_description.is_none());
    }
}
