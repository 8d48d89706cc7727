//! Workflow domain types for Maestro.
//!
//! A workflow is a named list of steps with inter-step dependencies. Steps are
//! authored externally (YAML files, an SDK, a dashboard) and are immutable once
//! handed to the engine. Spawn conditions use a small tagged expression tree
//! rather than free-form code so they can be evaluated without executing
//! anything.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// A complete workflow: the unit the engine resolves and executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Workflow name. Nested workflow references use this name.
    pub name: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Steps in authoring order. Order is preserved inside each resolved group.
    pub steps: Vec<StepDefinition>,
    /// Extensible metadata (for custom integrations).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl WorkflowDefinition {
    /// Build a workflow from a name and steps with no metadata.
    pub fn new(name: impl Into<String>, steps: Vec<StepDefinition>) -> Self {
        Self {
            name: name.into(),
            description: None,
            steps,
            metadata: HashMap::new(),
        }
    }

    /// Names of the workflows referenced by `nested_workflow` steps.
    pub fn nested_references(&self) -> impl Iterator<Item = &str> {
        self.steps
            .iter()
            .filter_map(|s| s.nested_workflow.as_deref())
    }
}

// ---------------------------------------------------------------------------
// Step Definition
// ---------------------------------------------------------------------------

/// A single declarative step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Step name. Unique within a workflow.
    pub name: String,
    /// Role alias (resolved through the engine's role table).
    #[serde(alias = "agent")]
    pub role: String,
    /// What the step should accomplish.
    #[serde(default)]
    pub description: String,
    /// Names of the steps this step depends on.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Explicit parallelism hint: `Some(false)` forces its group sequential.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel: Option<bool>,
    /// Name of a workflow to run in place of this step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nested_workflow: Option<String>,
    /// Tasks spawned after this step succeeds.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spawn_tasks: Vec<SpawnDefinition>,
    /// Input bindings handed to the runner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<HashMap<String, serde_json::Value>>,
}

impl StepDefinition {
    /// Build a step with a name, role and description and no dependencies.
    pub fn new(
        name: impl Into<String>,
        role: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            description: description.into(),
            depends_on: Vec::new(),
            parallel: None,
            nested_workflow: None,
            spawn_tasks: Vec::new(),
            inputs: None,
        }
    }

    /// Builder: add dependencies.
    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(deps.into_iter().map(Into::into));
        self
    }

    /// Builder: set the parallelism hint.
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = Some(parallel);
        self
    }

    /// Builder: run a nested workflow instead of the runner.
    pub fn nested(mut self, workflow: impl Into<String>) -> Self {
        self.nested_workflow = Some(workflow.into());
        self
    }

    /// Builder: add a spawn definition.
    pub fn spawn(mut self, spawn: SpawnDefinition) -> Self {
        self.spawn_tasks.push(spawn);
        self
    }
}

/// A task created dynamically after its parent step succeeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnDefinition {
    /// Role alias for the spawned task.
    #[serde(alias = "agent")]
    pub role: String,
    /// What the spawned task should do.
    pub description: String,
    /// Spawn only when this evaluates to true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<SpawnCondition>,
    /// Input bindings handed to the runner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<HashMap<String, serde_json::Value>>,
}

// ---------------------------------------------------------------------------
// Spawn conditions
// ---------------------------------------------------------------------------

/// Restricted boolean expression over named context fields.
///
/// Fields are dotted paths into the evaluation scope, e.g. `result.success`,
/// `task.status`, `inputs.region`, `previous.fetch.success`.
///
/// ```yaml
/// condition:
///   kind: all
///   conditions:
///     - { kind: compare, field: result.success, op: eq, value: true }
///     - { kind: exists, field: inputs.region }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SpawnCondition {
    /// Compare a field against a literal.
    Compare {
        field: String,
        op: CompareOp,
        value: serde_json::Value,
    },
    /// True when the field resolves to a non-null value.
    Exists { field: String },
    /// True when every child is true (vacuously true when empty).
    All { conditions: Vec<SpawnCondition> },
    /// True when any child is true.
    Any { conditions: Vec<SpawnCondition> },
    /// Negation.
    Not { condition: Box<SpawnCondition> },
}

/// Comparison operator for [`SpawnCondition::Compare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    /// Substring for strings, membership for arrays.
    Contains,
}
