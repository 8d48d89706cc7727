//! Single-step execution.
//!
//! `execute_step` runs exactly one step once:
//!
//! 1. Resolve the role alias through the engine's role table.
//! 2. Create the task, move it to `Running` and notify the observer.
//! 3. Nested workflow steps recurse into the engine (never cached).
//! 4. Otherwise: cache lookup (single-flight), or the retry policy when the
//!    cache is disabled, or a direct runner call when both are disabled.
//! 5. On success, run the step's spawn definitions whose conditions hold and
//!    merge their outcomes into the parent's raw output.
//! 6. Move the task to its terminal state and notify the observer.
//!
//! Task-level failures never escape as errors: they come back as a failed
//! [`StepOutcome`]. The only errors returned are run-level ones (shutdown
//! interruption and nested workflow reference problems).

use std::time::Duration;

use maestro_types::agent::{AgentResult, RunnerError};
use maestro_types::config::ExecutionOptions;
use maestro_types::task::{Task, TaskStatus};
use maestro_types::workflow::{SpawnDefinition, StepDefinition};
use serde_json::{Value, json};

use super::cache::ResultCache;
use super::condition;
use super::context::RunContext;
use super::executor::{ExecutionResult, ExecutorError, RunScope};
use super::retry::{RetryPolicy, classify};

// ---------------------------------------------------------------------------
// StepOutcome
// ---------------------------------------------------------------------------

/// Outcome of one step execution.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub task: Task,
    pub result: AgentResult,
    pub success: bool,
    /// Served from the result cache.
    pub from_cache: bool,
    /// Runner attempts made (0 when served from cache or nested).
    pub attempts: u32,
    /// Result of the nested workflow this step ran, if any.
    pub nested: Option<(String, ExecutionResult)>,
}

/// How the runner was reached for one task.
struct Invocation {
    outcome: Result<AgentResult, RunnerError>,
    from_cache: bool,
    attempts: u32,
}

// ---------------------------------------------------------------------------
// execute_step
// ---------------------------------------------------------------------------

pub(crate) async fn execute_step(
    scope: &RunScope,
    step: &StepDefinition,
    context: RunContext,
) -> Result<StepOutcome, ExecutorError> {
    let role = scope.engine.resolve_role(&step.role);
    let mut task = Task::new(
        role,
        step.description.clone(),
        scope.workflow_name.as_str(),
        step.name.clone(),
        step.inputs.clone(),
    );
    start_task(scope, &mut task);

    if let Some(nested_name) = &step.nested_workflow {
        return run_nested(scope, step, nested_name, task, context).await;
    }

    let invocation = match invoke_runner(scope, &task, &context).await? {
        Ok(invocation) => invocation,
        Err(message) => {
            return Ok(finish(scope, task, AgentResult::failed(message), false, 0));
        }
    };

    let mut result = match invocation.outcome {
        Ok(result) => result,
        Err(error) => AgentResult::failed(error.to_string()),
    };

    if result.success && !step.spawn_tasks.is_empty() {
        result = run_spawns(scope, step, &task, result, &context).await;
    }

    if invocation.from_cache {
        tracing::debug!(step = step.name.as_str(), "served from cache");
    }

    Ok(finish(scope, task, result, invocation.from_cache, invocation.attempts))
}

/// Call the runner through the cache, the retry policy, or directly.
///
/// The outer `Err` is a run-level interruption. The inner `Err` is a message
/// describing why the task failed before reaching the runner.
async fn invoke_runner(
    scope: &RunScope,
    task: &Task,
    context: &RunContext,
) -> Result<Result<Invocation, String>, ExecutorError> {
    let options: &ExecutionOptions = &scope.options;
    let engine = &scope.engine;

    if options.enable_cache {
        let prompt = match engine.build_prompt(task, context).await {
            Ok(prompt) => prompt,
            Err(e) => return Ok(Err(format!("failed to build prompt: {e}"))),
        };
        let fingerprint = ResultCache::task_fingerprint(task, &prompt);
        let ttl = options.cache_ttl_ms.map(Duration::from_millis);

        let runner = engine.clone();
        let owned_task = task.clone();
        let owned_context = context.clone();
        let compute = async move { runner.run_task(&owned_task, &owned_context).await };

        let lookup = engine
            .cache()
            .get_or_compute(&fingerprint, &task.step_name, ttl, compute)
            .await;
        let attempts = if lookup.from_cache || lookup.joined { 0 } else { 1 };
        return Ok(Ok(Invocation {
            outcome: lookup.outcome,
            from_cache: lookup.from_cache,
            attempts,
        }));
    }

    if options.enable_retry {
        let policy = RetryPolicy::from_options(options);
        let retried = policy
            .retry(move |_| engine.run_task(task, context), classify, engine.shutdown())
            .await;

        if retried.interrupted {
            tracing::info!(
                step = task.step_name.as_str(),
                attempts = retried.attempts,
                "interrupted during retry"
            );
            return Err(ExecutorError::Interrupted { checkpoint_id: None });
        }

        let outcome = match (retried.result, retried.error) {
            (Some(result), _) => Ok(result),
            (None, Some(error)) => Err(error),
            (None, None) => Err(RunnerError::Other("no attempt was made".to_string())),
        };
        return Ok(Ok(Invocation {
            outcome,
            from_cache: false,
            attempts: retried.attempts,
        }));
    }

    Ok(Ok(Invocation {
        outcome: engine.run_task(task, context).await,
        from_cache: false,
        attempts: 1,
    }))
}

// ---------------------------------------------------------------------------
// Nested workflows
// ---------------------------------------------------------------------------

async fn run_nested(
    scope: &RunScope,
    step: &StepDefinition,
    nested_name: &str,
    task: Task,
    context: RunContext,
) -> Result<StepOutcome, ExecutorError> {
    if scope.visited.iter().any(|name| name == nested_name) {
        let mut chain = scope.visited.as_ref().clone();
        chain.push(nested_name.to_string());
        return Err(ExecutorError::NestedWorkflowCycle { chain });
    }

    let nested = scope
        .engine
        .registry()
        .get(nested_name)
        .ok_or_else(|| ExecutorError::NestedWorkflowNotFound {
            step: step.name.clone(),
            workflow: nested_name.to_string(),
        })?;

    // The parent's checkpoint covers the nested run.
    let options = ExecutionOptions {
        enable_checkpoints: false,
        checkpoint_id: None,
        ..scope.options.as_ref().clone()
    };
    let mut visited = scope.visited.as_ref().clone();
    visited.push(nested_name.to_string());

    tracing::debug!(
        step = step.name.as_str(),
        nested = nested_name,
        depth = visited.len(),
        "running nested workflow"
    );

    let run = scope
        .engine
        .clone()
        .run_workflow(nested, context, options, scope.observer.clone(), visited)
        .await;

    let nested_result = match run {
        Ok(result) => result,
        Err(e @ ExecutorError::Interrupted { .. })
        | Err(e @ ExecutorError::NestedWorkflowCycle { .. })
        | Err(e @ ExecutorError::NestedWorkflowNotFound { .. }) => return Err(e),
        Err(e) => {
            let message = format!("Nested workflow \"{nested_name}\" failed: {e}");
            return Ok(finish(scope, task, AgentResult::failed(message), false, 0));
        }
    };

    let success = nested_result.success;
    let result = AgentResult {
        success,
        summary: if success {
            format!("Nested workflow \"{nested_name}\" completed successfully")
        } else {
            format!("Nested workflow \"{nested_name}\" failed")
        },
        raw_output: serde_json::to_string(&nested_result).ok(),
        error: (!success).then(|| {
            format!(
                "{} task(s) failed in nested workflow \"{nested_name}\"",
                nested_result.failed_tasks.len()
            )
        }),
    };

    let mut outcome = finish(scope, task, result, false, 0);
    outcome.nested = Some((nested_name.to_string(), nested_result));
    Ok(outcome)
}

// ---------------------------------------------------------------------------
// Spawned tasks
// ---------------------------------------------------------------------------

/// Run every spawn definition whose condition holds and merge the outcomes
/// into the parent's raw output as `{"main": ..., "spawned": [...]}`.
///
/// Spawned tasks call the runner directly (no cache, no retry). Their
/// failures are reported in the merged output but do not fail the parent.
async fn run_spawns(
    scope: &RunScope,
    step: &StepDefinition,
    parent: &Task,
    mut result: AgentResult,
    context: &RunContext,
) -> AgentResult {
    let mut spawned = Vec::new();

    for spawn in &step.spawn_tasks {
        if !should_spawn(spawn, parent, &result, context) {
            continue;
        }

        let mut task = Task::new(
            scope.engine.resolve_role(&spawn.role),
            spawn.description.clone(),
            scope.workflow_name.as_str(),
            String::new(),
            spawn.inputs.clone(),
        );
        task.step_name = format!("{}::spawned::{}", step.name, task.id);
        start_task(scope, &mut task);

        let spawn_result = match scope.engine.run_task(&task, context).await {
            Ok(r) => r,
            Err(e) => AgentResult::failed(e.to_string()),
        };
        close_task(scope, &mut task, &spawn_result);

        tracing::debug!(
            parent = step.name.as_str(),
            spawned = task.step_name.as_str(),
            success = spawn_result.success,
            "spawned task finished"
        );

        spawned.push(json!({
            "step_name": task.step_name,
            "role": task.role.name,
            "success": spawn_result.success,
            "summary": spawn_result.summary,
            "raw_output": spawn_result.raw_output,
            "error": spawn_result.error,
        }));
    }

    if !spawned.is_empty() {
        let main = result
            .raw_output
            .as_deref()
            .map(|raw| serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string())))
            .unwrap_or(Value::Null);
        result.raw_output = Some(json!({ "main": main, "spawned": spawned }).to_string());
    }

    result
}

/// Unconditional spawns always run. Conditions that cannot be evaluated are
/// logged and treated as false.
fn should_spawn(spawn: &SpawnDefinition, parent: &Task, result: &AgentResult, context: &RunContext) -> bool {
    let Some(cond) = &spawn.condition else {
        return true;
    };
    let verdict = condition::evaluation_scope(parent, result, context)
        .and_then(|scope| condition::evaluate(cond, &scope));
    match verdict {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(
                parent = parent.step_name.as_str(),
                role = spawn.role.as_str(),
                error = %e,
                "spawn condition could not be evaluated, skipping"
            );
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Task lifecycle helpers
// ---------------------------------------------------------------------------

fn start_task(scope: &RunScope, task: &mut Task) {
    if let Err(e) = task.transition(TaskStatus::Running) {
        tracing::warn!(error = %e, "unexpected task transition");
    }
    scope.notify(task);
}

fn close_task(scope: &RunScope, task: &mut Task, result: &AgentResult) {
    if result.success {
        if let Err(e) = task.transition(TaskStatus::Succeeded) {
            tracing::warn!(error = %e, "unexpected task transition");
        }
    } else {
        let message = result.error.clone().unwrap_or_else(|| result.summary.clone());
        task.fail(message);
    }
    scope.notify(task);
}

fn finish(
    scope: &RunScope,
    mut task: Task,
    result: AgentResult,
    from_cache: bool,
    attempts: u32,
) -> StepOutcome {
    close_task(scope, &mut task, &result);
    StepOutcome {
        success: result.success,
        task,
        result,
        from_cache,
        attempts,
        nested: None,
    }
}
