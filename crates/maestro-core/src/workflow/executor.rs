//! Workflow engine: resolves a workflow into groups and drives them to
//! completion with checkpointing, caching, retry and cooperative shutdown.
//!
//! # Execution flow
//!
//! 1. Validate options, resolve the step graph, and validate every nested
//!    workflow reference reachable from this workflow (before any side effect).
//! 2. Start a fresh checkpoint, or resume one: restore previous results and
//!    skip the steps it already completed.
//! 3. For each group: stop on shutdown (flushing the checkpoint), stop when
//!    `abort_on_error` is set and something failed, otherwise run the group.
//! 4. Final checkpoint save, auto-save disabled, result returned.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use maestro_types::agent::{AgentResult, RunnerError};
use maestro_types::config::{ConfigError, EngineConfig, ExecutionOptions};
use maestro_types::task::{AgentRole, Task, TaskStatus};
use maestro_types::workflow::WorkflowDefinition;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::agent::box_runner::{BoxAgentRunner, BoxPromptBuilder};
use crate::agent::runner::{AgentRunner, DefaultPromptBuilder, PromptBuilder};
use crate::repository::checkpoint::{BoxCheckpointStore, CheckpointStore};

use super::cache::{CacheStats, ResultCache};
use super::checkpoint::{CheckpointCoordinator, CheckpointError};
use super::context::RunContext;
use super::dag::{self, ResolveError, StepGroup};
use super::definition::WorkflowRegistry;
use super::group::{self, RunState};
use super::shutdown::ShutdownSignal;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Progress callback, invoked on every task status transition.
pub type TaskObserver = Arc<dyn Fn(&Task) + Send + Sync>;

/// Errors that end a run. Task failures are not errors; they are reported
/// in [`ExecutionResult::failed_tasks`].
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("step '{step}' references unknown workflow '{workflow}'")]
    NestedWorkflowNotFound { step: String, workflow: String },

    #[error("nested workflow cycle: {}", chain.join(" -> "))]
    NestedWorkflowCycle { chain: Vec<String> },

    /// Shutdown was requested. The checkpoint (if any) has been flushed and
    /// the run can be resumed from it.
    #[error("workflow interrupted")]
    Interrupted { checkpoint_id: Option<Uuid> },

    #[error("invalid execution options: {0}")]
    InvalidOptions(#[from] ConfigError),

    #[error("a checkpoint id was supplied but no checkpoint store is configured")]
    CheckpointStoreMissing,
}

/// Final outcome of a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// True when no task failed.
    pub success: bool,
    pub completed_tasks: Vec<Task>,
    pub failed_tasks: Vec<Task>,
    /// Results of nested workflows, keyed by workflow name.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub nested_workflows: HashMap<String, ExecutionResult>,
    /// Every step's result, keyed by step name.
    pub previous_results: HashMap<String, AgentResult>,
    /// Checkpoint written by this run. `None` when nothing was persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<Uuid>,
}

/// What a run would do, without doing it.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub groups: Vec<StepGroup>,
    /// One pending task per step, in group order.
    pub tasks: Vec<Task>,
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// Composition root for workflow execution. Cheap to clone.
#[derive(Clone)]
pub struct WorkflowEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    runner: BoxAgentRunner,
    prompts: BoxPromptBuilder,
    store: Option<Arc<BoxCheckpointStore>>,
    cache: ResultCache,
    registry: WorkflowRegistry,
    config: EngineConfig,
    shutdown: ShutdownSignal,
}

/// Builder for [`WorkflowEngine`].
pub struct WorkflowEngineBuilder {
    runner: BoxAgentRunner,
    prompts: Option<BoxPromptBuilder>,
    store: Option<Arc<BoxCheckpointStore>>,
    registry: WorkflowRegistry,
    config: EngineConfig,
    shutdown: ShutdownSignal,
}

impl WorkflowEngineBuilder {
    pub fn prompt_builder<P: PromptBuilder + 'static>(mut self, prompts: P) -> Self {
        self.prompts = Some(BoxPromptBuilder::new(prompts));
        self
    }

    pub fn checkpoint_store<S: CheckpointStore + 'static>(mut self, store: S) -> Self {
        self.store = Some(Arc::new(BoxCheckpointStore::new(store)));
        self
    }

    /// Share an already-boxed store (e.g. with a dashboard listing checkpoints).
    pub fn shared_checkpoint_store(mut self, store: Arc<BoxCheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn registry(mut self, registry: WorkflowRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn build(self) -> WorkflowEngine {
        let cache = ResultCache::new(&self.config.cache);
        WorkflowEngine {
            inner: Arc::new(EngineInner {
                runner: self.runner,
                prompts: self
                    .prompts
                    .unwrap_or_else(|| BoxPromptBuilder::new(DefaultPromptBuilder)),
                store: self.store,
                cache,
                registry: self.registry,
                config: self.config,
                shutdown: self.shutdown,
            }),
        }
    }
}

impl WorkflowEngine {
    pub fn builder<R: AgentRunner + 'static>(runner: R) -> WorkflowEngineBuilder {
        WorkflowEngineBuilder {
            runner: BoxAgentRunner::new(runner),
            prompts: None,
            store: None,
            registry: WorkflowRegistry::new(),
            config: EngineConfig::default(),
            shutdown: ShutdownSignal::new(),
        }
    }

    /// Execute `workflow` to completion (or interruption).
    pub async fn execute(
        &self,
        workflow: &WorkflowDefinition,
        context: RunContext,
        options: &ExecutionOptions,
        observer: Option<TaskObserver>,
    ) -> Result<ExecutionResult, ExecutorError> {
        let visited = vec![workflow.name.clone()];
        self.clone()
            .run_workflow(
                Arc::new(workflow.clone()),
                context,
                options.clone(),
                observer,
                visited,
            )
            .await
    }

    /// Execute `workflow` with the engine's configured default options.
    pub async fn execute_with_defaults(
        &self,
        workflow: &WorkflowDefinition,
        context: RunContext,
        observer: Option<TaskObserver>,
    ) -> Result<ExecutionResult, ExecutorError> {
        let options = self.inner.config.defaults.clone();
        self.execute(workflow, context, &options, observer).await
    }

    /// Resolve `workflow` into groups and pending tasks without running it.
    pub fn execution_plan(&self, workflow: &WorkflowDefinition) -> Result<ExecutionPlan, ExecutorError> {
        let groups = dag::resolve(&workflow.steps)?;
        self.validate_nested(workflow, &mut vec![workflow.name.clone()])?;
        let tasks = groups
            .iter()
            .flat_map(|g| g.steps.iter())
            .map(|step| {
                Task::new(
                    self.resolve_role(&step.role),
                    step.description.clone(),
                    workflow.name.as_str(),
                    step.name.clone(),
                    step.inputs.clone(),
                )
            })
            .collect();
        Ok(ExecutionPlan { groups, tasks })
    }

    pub fn shutdown(&self) -> &ShutdownSignal {
        &self.inner.shutdown
    }

    pub fn cache(&self) -> &ResultCache {
        &self.inner.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    pub fn registry(&self) -> &WorkflowRegistry {
        &self.inner.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn checkpoint_store(&self) -> Option<&Arc<BoxCheckpointStore>> {
        self.inner.store.as_ref()
    }

    pub fn resolve_role(&self, alias: &str) -> AgentRole {
        self.inner.config.resolve_role(alias)
    }

    pub(crate) async fn run_task(
        &self,
        task: &Task,
        context: &RunContext,
    ) -> Result<AgentResult, RunnerError> {
        self.inner.runner.run_task(task, context).await
    }

    pub(crate) async fn build_prompt(
        &self,
        task: &Task,
        context: &RunContext,
    ) -> Result<String, RunnerError> {
        self.inner.prompts.build_prompt(task, context).await
    }

    /// Boxed so nested workflows can recurse.
    pub(crate) fn run_workflow(
        self,
        workflow: Arc<WorkflowDefinition>,
        context: RunContext,
        options: ExecutionOptions,
        observer: Option<TaskObserver>,
        visited: Vec<String>,
    ) -> BoxFuture<'static, Result<ExecutionResult, ExecutorError>> {
        Box::pin(async move { self.run(workflow, context, options, observer, visited).await })
    }

    async fn run(
        self,
        workflow: Arc<WorkflowDefinition>,
        context: RunContext,
        options: ExecutionOptions,
        observer: Option<TaskObserver>,
        visited: Vec<String>,
    ) -> Result<ExecutionResult, ExecutorError> {
        options.validate()?;
        let groups = dag::resolve(&workflow.steps)?;
        self.validate_nested(&workflow, &mut visited.clone())?;

        let started = Instant::now();
        tracing::info!(
            workflow = workflow.name.as_str(),
            steps = workflow.steps.len(),
            groups = groups.len(),
            depth = visited.len(),
            "starting workflow execution"
        );

        let (checkpoint, context, skip) = self.prepare_checkpoint(&workflow, context, &options).await?;
        let checkpoint_id = checkpoint
            .as_ref()
            .filter(|c| c.persists())
            .map(CheckpointCoordinator::id);

        let mut state = RunState::new(context, checkpoint, skip);
        self.restore_skipped(&workflow, &mut state);

        let scope = RunScope {
            engine: self.clone(),
            workflow_name: workflow.name.clone(),
            options: Arc::new(options),
            observer,
            visited: Arc::new(visited),
        };

        let run = self.run_groups(&scope, &groups, &mut state).await;

        if let Some(coordinator) = &state.checkpoint {
            if let Err(e) = coordinator.finish().await {
                tracing::warn!(
                    workflow = workflow.name.as_str(),
                    checkpoint_id = %coordinator.id(),
                    error = %e,
                    "final checkpoint save failed"
                );
            }
        }

        match run {
            Ok(()) => {}
            Err(ExecutorError::Interrupted { .. }) => {
                tracing::info!(
                    workflow = workflow.name.as_str(),
                    checkpoint_id = ?checkpoint_id,
                    completed = state.completed.len(),
                    "workflow interrupted"
                );
                return Err(ExecutorError::Interrupted { checkpoint_id });
            }
            Err(e) => return Err(e),
        }

        let result = state.into_result(checkpoint_id);
        tracing::info!(
            workflow = workflow.name.as_str(),
            success = result.success,
            completed = result.completed_tasks.len(),
            failed = result.failed_tasks.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "workflow execution finished"
        );
        Ok(result)
    }

    async fn run_groups(
        &self,
        scope: &RunScope,
        groups: &[StepGroup],
        state: &mut RunState,
    ) -> Result<(), ExecutorError> {
        for group in groups {
            if self.inner.shutdown.is_triggered() {
                let next = group
                    .steps
                    .iter()
                    .find(|s| !state.skip.contains(&s.name))
                    .map(|s| s.name.as_str());
                state.interrupt_at(next).await;
                return Err(ExecutorError::Interrupted { checkpoint_id: None });
            }

            if scope.options.abort_on_error && !state.failed.is_empty() {
                tracing::warn!(
                    workflow = scope.workflow_name.as_str(),
                    failed = state.failed.len(),
                    "aborting workflow due to previous errors"
                );
                break;
            }

            tracing::debug!(
                workflow = scope.workflow_name.as_str(),
                group = group.order,
                steps = group.steps.len(),
                parallel = group.can_run_in_parallel,
                "running group"
            );
            group::run_group(scope, group, state).await?;
        }
        Ok(())
    }

    /// Open the checkpoint for this run. Returns the coordinator (if any),
    /// the context to run with, and the steps to skip.
    async fn prepare_checkpoint(
        &self,
        workflow: &WorkflowDefinition,
        mut context: RunContext,
        options: &ExecutionOptions,
    ) -> Result<(Option<CheckpointCoordinator>, RunContext, HashSet<String>), ExecutorError> {
        let store = self.inner.store.clone();

        let (coordinator, skip) = match (options.checkpoint_id, store) {
            (Some(_), None) => return Err(ExecutorError::CheckpointStoreMissing),
            (Some(id), Some(store)) => {
                let resumed =
                    CheckpointCoordinator::resume(store, id, &workflow.name, options.enable_checkpoints)
                        .await?;
                merge_restored(&mut context, resumed.context);
                (resumed.coordinator, resumed.completed)
            }
            (None, Some(store)) if options.enable_checkpoints => {
                let metadata = HashMap::from([
                    ("max_concurrency".to_string(), json!(options.max_concurrency)),
                    ("continue_on_error".to_string(), Value::Bool(options.continue_on_error)),
                    ("abort_on_error".to_string(), Value::Bool(options.abort_on_error)),
                ]);
                let coordinator =
                    CheckpointCoordinator::start_fresh(store, &workflow.name, &context, metadata, true)?;
                (coordinator, HashSet::new())
            }
            (None, _) => return Ok((None, context, HashSet::new())),
        };

        coordinator.save().await?;
        coordinator.enable_auto_save(Duration::from_millis(options.auto_save_interval_ms));
        Ok((Some(coordinator), context, skip))
    }

    /// Report resumed steps as restored succeeded tasks.
    fn restore_skipped(&self, workflow: &WorkflowDefinition, state: &mut RunState) {
        for step in workflow.steps.iter().filter(|s| state.skip.contains(&s.name)) {
            let mut task = Task::new(
                self.resolve_role(&step.role),
                step.description.clone(),
                workflow.name.as_str(),
                step.name.clone(),
                step.inputs.clone(),
            );
            let restored = task
                .transition(TaskStatus::Running)
                .and_then(|()| task.transition(TaskStatus::Succeeded));
            if let Err(e) = restored {
                tracing::warn!(step = step.name.as_str(), error = %e, "could not restore task");
                continue;
            }
            state.completed.push(task);
        }
    }

    /// Depth-first walk over nested references. `path` holds the chain of
    /// workflow names from the root to `workflow`.
    fn validate_nested(
        &self,
        workflow: &WorkflowDefinition,
        path: &mut Vec<String>,
    ) -> Result<(), ExecutorError> {
        for step in &workflow.steps {
            let Some(name) = step.nested_workflow.as_deref() else {
                continue;
            };
            if path.iter().any(|p| p == name) {
                let mut chain = path.clone();
                chain.push(name.to_string());
                return Err(ExecutorError::NestedWorkflowCycle { chain });
            }
            let nested = self
                .inner
                .registry
                .get(name)
                .ok_or_else(|| ExecutorError::NestedWorkflowNotFound {
                    step: step.name.clone(),
                    workflow: name.to_string(),
                })?;
            dag::resolve(&nested.steps)?;

            path.push(name.to_string());
            self.validate_nested(&nested, path)?;
            path.pop();
        }
        Ok(())
    }
}

/// Fold a restored context into the caller's: restored results win, caller
/// variables win.
fn merge_restored(context: &mut RunContext, restored: RunContext) {
    context.previous_results.extend(restored.previous_results);
    for (name, value) in restored.variables {
        context.variables.entry(name).or_insert(value);
    }
    if context.repository_root.is_none() {
        context.repository_root = restored.repository_root;
    }
    if context.feature_description.is_none() {
        context.feature_description = restored.feature_description;
    }
}

// ---------------------------------------------------------------------------
// RunScope
// ---------------------------------------------------------------------------

/// Per-run state shared by every step of one workflow run. Cloned into
/// parallel children.
#[derive(Clone)]
pub(crate) struct RunScope {
    pub engine: WorkflowEngine,
    pub workflow_name: String,
    pub options: Arc<ExecutionOptions>,
    pub observer: Option<TaskObserver>,
    /// Workflow names from the root run down to this one.
    pub visited: Arc<Vec<String>>,
}

impl RunScope {
    pub fn notify(&self, task: &Task) {
        if let Some(observer) = &self.observer {
            observer(task);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
