//! Workflow definition parsing, validation, discovery and the nested workflow
//! registry.
//!
//! Definitions are authored as YAML files, validated structurally on load,
//! and registered by name so `nested_workflow` steps can refer to them.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use maestro_types::workflow::WorkflowDefinition;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur while loading or validating workflow definitions.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// YAML parse failure.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// A step references an unknown dependency.
    #[error("unknown dependency: {0}")]
    UnknownDependency(String),

    /// Two definitions registered under the same name.
    #[error("workflow '{0}' is already registered")]
    DuplicateWorkflow(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML string into a validated `WorkflowDefinition`.
pub fn parse_workflow_yaml(yaml: &str) -> Result<WorkflowDefinition, WorkflowError> {
    let def: WorkflowDefinition =
        serde_yaml_ng::from_str(yaml).map_err(|e| WorkflowError::ParseError(e.to_string()))?;
    validate_definition(&def)?;
    Ok(def)
}

/// Serialize a `WorkflowDefinition` to a YAML string.
pub fn serialize_workflow_yaml(def: &WorkflowDefinition) -> Result<String, WorkflowError> {
    serde_yaml_ng::to_string(def).map_err(|e| WorkflowError::ParseError(e.to_string()))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a `WorkflowDefinition`.
///
/// Checks:
/// - Name is non-empty
/// - At least one step exists
/// - Step names are non-empty and unique
/// - Every step names a role
/// - All `depends_on` references point to existing steps
///
/// Cycles are reported by the resolver and nested references by the
/// registry, both at execution time.
pub fn validate_definition(def: &WorkflowDefinition) -> Result<(), WorkflowError> {
    if def.name.trim().is_empty() {
        return Err(WorkflowError::ValidationError(
            "workflow name must not be empty".to_string(),
        ));
    }

    if def.steps.is_empty() {
        return Err(WorkflowError::ValidationError(format!(
            "workflow '{}' must have at least one step",
            def.name
        )));
    }

    let mut seen = HashSet::new();
    for step in &def.steps {
        if step.name.trim().is_empty() {
            return Err(WorkflowError::ValidationError(
                "step name must not be empty".to_string(),
            ));
        }
        if !seen.insert(step.name.as_str()) {
            return Err(WorkflowError::ValidationError(format!(
                "duplicate step name: '{}'",
                step.name
            )));
        }
        if step.role.trim().is_empty() && step.nested_workflow.is_none() {
            return Err(WorkflowError::ValidationError(format!(
                "step '{}' has no role",
                step.name
            )));
        }
    }

    for step in &def.steps {
        for dep in &step.depends_on {
            if !seen.contains(dep.as_str()) {
                return Err(WorkflowError::UnknownDependency(format!(
                    "step '{}' depends on unknown step '{}'",
                    step.name, dep
                )));
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Filesystem operations
// ---------------------------------------------------------------------------

/// Load a workflow definition from a YAML file.
pub fn load_workflow_file(path: &Path) -> Result<WorkflowDefinition, WorkflowError> {
    let content = std::fs::read_to_string(path)?;
    parse_workflow_yaml(&content)
}

/// Save a workflow definition to a YAML file, creating parent directories.
pub fn save_workflow_file(path: &Path, def: &WorkflowDefinition) -> Result<(), WorkflowError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let yaml = serialize_workflow_yaml(def)?;
    std::fs::write(path, yaml)?;
    Ok(())
}

/// Discover all workflow YAML files under `base_dir`, recursively.
///
/// Files that fail to parse or validate are skipped with a warning. A
/// missing directory yields an empty list.
pub fn discover_workflows(
    base_dir: &Path,
) -> Result<Vec<(PathBuf, WorkflowDefinition)>, WorkflowError> {
    let mut results = Vec::new();
    if !base_dir.exists() {
        return Ok(results);
    }
    discover_recursive(base_dir, &mut results)?;
    results.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(results)
}

fn discover_recursive(
    dir: &Path,
    results: &mut Vec<(PathBuf, WorkflowDefinition)>,
) -> Result<(), WorkflowError> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            discover_recursive(&path, results)?;
        } else if path
            .extension()
            .is_some_and(|ext| ext == "yaml" || ext == "yml")
        {
            match load_workflow_file(&path) {
                Ok(def) => results.push((path, def)),
                Err(e) => {
                    tracing::warn!(?path, error = %e, "skipping unparseable workflow file");
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Named workflow definitions available to `nested_workflow` steps.
#[derive(Debug, Clone, Default)]
pub struct WorkflowRegistry {
    workflows: BTreeMap<String, Arc<WorkflowDefinition>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from every workflow file under `dir`.
    pub fn from_dir(dir: &Path) -> Result<Self, WorkflowError> {
        let mut registry = Self::new();
        for (path, def) in discover_workflows(dir)? {
            tracing::debug!(?path, workflow = def.name.as_str(), "registered workflow");
            registry.register(def)?;
        }
        Ok(registry)
    }

    /// Validate and register a definition. Names must be unique.
    pub fn register(&mut self, def: WorkflowDefinition) -> Result<(), WorkflowError> {
        validate_definition(&def)?;
        if self.workflows.contains_key(&def.name) {
            return Err(WorkflowError::DuplicateWorkflow(def.name));
        }
        self.workflows.insert(def.name.clone(), Arc::new(def));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<WorkflowDefinition>> {
        self.workflows.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.workflows.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.workflows.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
