//! Group execution.
//!
//! The coordinating task owns [`RunState`]; parallel children only return
//! their [`StepOutcome`] and never touch shared state. Parallel groups fan
//! out on a `JoinSet` bounded by `max_concurrency` and fan back in before the
//! next group starts.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use maestro_types::agent::AgentResult;
use maestro_types::task::Task;
use maestro_types::workflow::StepDefinition;
use tokio::task::JoinSet;
use uuid::Uuid;

use super::checkpoint::CheckpointCoordinator;
use super::context::RunContext;
use super::dag::StepGroup;
use super::executor::{ExecutionResult, ExecutorError, RunScope};
use super::task_executor::{StepOutcome, execute_step};

// ---------------------------------------------------------------------------
// RunState
// ---------------------------------------------------------------------------

/// Mutable state of one run, written only by the coordinating task.
pub(crate) struct RunState {
    pub context: RunContext,
    pub completed: Vec<Task>,
    pub failed: Vec<Task>,
    pub nested: HashMap<String, ExecutionResult>,
    pub checkpoint: Option<CheckpointCoordinator>,
    /// Steps completed by a previous run.
    pub skip: HashSet<String>,
}

impl RunState {
    pub fn new(
        context: RunContext,
        checkpoint: Option<CheckpointCoordinator>,
        skip: HashSet<String>,
    ) -> Self {
        Self {
            context,
            completed: Vec::new(),
            failed: Vec::new(),
            nested: HashMap::new(),
            checkpoint,
            skip,
        }
    }

    /// Fold one outcome in. Returns whether the step succeeded.
    fn apply(&mut self, outcome: StepOutcome) -> bool {
        let StepOutcome {
            task,
            result,
            success,
            from_cache,
            attempts,
            nested,
        } = outcome;

        tracing::debug!(
            step = task.step_name.as_str(),
            success,
            from_cache,
            attempts,
            "step finished"
        );

        self.context.record(task.step_name.clone(), result);
        if let Some((name, nested_result)) = nested {
            self.nested.insert(name, nested_result);
        }
        if success {
            self.completed.push(task);
        } else {
            self.failed.push(task);
        }
        success
    }

    /// Flush the checkpoint with `step` as the resume point.
    pub async fn interrupt_at(&self, step: Option<&str>) {
        let Some(coordinator) = &self.checkpoint else {
            return;
        };
        coordinator.set_current_step(step);
        if !coordinator.persists() {
            return;
        }
        match coordinator.save().await {
            Ok(()) => tracing::info!(
                checkpoint_id = %coordinator.id(),
                resume_at = ?step,
                "shutdown detected, checkpoint saved"
            ),
            Err(e) => tracing::warn!(
                checkpoint_id = %coordinator.id(),
                error = %e,
                "shutdown detected, checkpoint save failed"
            ),
        }
    }

    pub fn into_result(self, checkpoint_id: Option<Uuid>) -> ExecutionResult {
        ExecutionResult {
            success: self.failed.is_empty(),
            completed_tasks: self.completed,
            failed_tasks: self.failed,
            nested_workflows: self.nested,
            previous_results: self.context.previous_results,
            checkpoint_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Group dispatch
// ---------------------------------------------------------------------------

pub(crate) async fn run_group(
    scope: &RunScope,
    group: &StepGroup,
    state: &mut RunState,
) -> Result<(), ExecutorError> {
    if group.can_run_in_parallel && group.steps.len() > 1 {
        run_parallel(scope, group, state).await
    } else {
        run_sequential(scope, group, state).await
    }
}

async fn run_sequential(
    scope: &RunScope,
    group: &StepGroup,
    state: &mut RunState,
) -> Result<(), ExecutorError> {
    for step in &group.steps {
        if state.skip.contains(&step.name) {
            tracing::debug!(step = step.name.as_str(), "skipping already completed step");
            continue;
        }

        if scope.engine.shutdown().is_triggered() {
            state.interrupt_at(Some(step.name.as_str())).await;
            return Err(ExecutorError::Interrupted { checkpoint_id: None });
        }

        if scope.options.abort_on_error && !state.failed.is_empty() {
            break;
        }

        let run = AssertUnwindSafe(execute_step(scope, step, state.context.clone()));
        let outcome = match run.catch_unwind().await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e @ ExecutorError::Interrupted { .. })) => {
                state.interrupt_at(Some(step.name.as_str())).await;
                return Err(e);
            }
            Ok(Err(e)) => return Err(e),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(step = step.name.as_str(), error = %message, "step task panicked");
                panicked_outcome(scope, step, &message)
            }
        };

        let success = state.apply(outcome);
        if let Some(coordinator) = &state.checkpoint {
            coordinator.record_step(&step.name, success, &state.context)?;
        }

        if !success && !scope.options.continue_on_error {
            tracing::warn!(
                step = step.name.as_str(),
                "step failed, skipping the rest of its group"
            );
            break;
        }
    }
    Ok(())
}

async fn run_parallel(
    scope: &RunScope,
    group: &StepGroup,
    state: &mut RunState,
) -> Result<(), ExecutorError> {
    let limit = scope.options.max_concurrency.unwrap_or(usize::MAX).max(1);
    // Members of one group never depend on each other, so they all see the
    // results as they stood when the group started.
    let snapshot = state.context.clone();

    let mut join_set = JoinSet::new();
    let mut launched: HashMap<tokio::task::Id, &StepDefinition> = HashMap::new();
    let mut outcomes: Vec<(String, bool)> = Vec::new();
    let mut fatal: Option<ExecutorError> = None;
    let mut resume_at: Option<&str> = None;

    for step in &group.steps {
        if state.skip.contains(&step.name) {
            tracing::debug!(step = step.name.as_str(), "skipping already completed step");
            continue;
        }

        while join_set.len() >= limit {
            let Some(joined) = join_set.join_next_with_id().await else {
                break;
            };
            collect(scope, joined, &launched, state, &mut outcomes, &mut fatal);
        }

        if fatal.is_some() {
            break;
        }
        if scope.engine.shutdown().is_triggered() {
            resume_at = Some(step.name.as_str());
            break;
        }
        if scope.options.abort_on_error && !state.failed.is_empty() {
            break;
        }

        let child_scope = scope.clone();
        let child_step = step.clone();
        let child_context = snapshot.clone();
        let handle = join_set.spawn(async move {
            execute_step(&child_scope, &child_step, child_context).await
        });
        launched.insert(handle.id(), step);
    }

    while let Some(joined) = join_set.join_next_with_id().await {
        collect(scope, joined, &launched, state, &mut outcomes, &mut fatal);
    }

    if let Some(coordinator) = &state.checkpoint {
        coordinator.record_group(&outcomes, &state.context)?;
    }

    if resume_at.is_some() || matches!(fatal, Some(ExecutorError::Interrupted { .. })) {
        state.interrupt_at(resume_at).await;
        return Err(ExecutorError::Interrupted { checkpoint_id: None });
    }
    match fatal {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

type Joined = Result<(tokio::task::Id, Result<StepOutcome, ExecutorError>), tokio::task::JoinError>;

fn collect(
    scope: &RunScope,
    joined: Joined,
    launched: &HashMap<tokio::task::Id, &StepDefinition>,
    state: &mut RunState,
    outcomes: &mut Vec<(String, bool)>,
    fatal: &mut Option<ExecutorError>,
) {
    match joined {
        Ok((_, Ok(outcome))) => {
            let name = outcome.task.step_name.clone();
            let success = state.apply(outcome);
            outcomes.push((name, success));
        }
        Ok((_, Err(e))) => {
            if fatal.is_none() {
                *fatal = Some(e);
            }
        }
        Err(join_error) => {
            let Some(step) = launched.get(&join_error.id()) else {
                tracing::error!(error = %join_error, "unknown step task failed");
                return;
            };
            tracing::error!(step = step.name.as_str(), error = %join_error, "step task panicked");
            let message = if join_error.is_panic() {
                panic_message(join_error.into_panic().as_ref())
            } else {
                join_error.to_string()
            };
            let outcome = panicked_outcome(scope, step, &message);
            outcomes.push((step.name.clone(), false));
            state.apply(outcome);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// A step that panicked is reported as a failed task.
fn panicked_outcome(scope: &RunScope, step: &StepDefinition, detail: &str) -> StepOutcome {
    let message = format!("step task panicked: {detail}");
    let mut task = Task::new(
        scope.engine.resolve_role(&step.role),
        step.description.clone(),
        scope.workflow_name.as_str(),
        step.name.clone(),
        step.inputs.clone(),
    );
    task.fail(message.clone());
    scope.notify(&task);
    StepOutcome {
        task,
        result: AgentResult::failed(message),
        success: false,
        from_cache: false,
        attempts: 0,
        nested: None,
    }
}
