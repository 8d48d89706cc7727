//! AgentRunner and PromptBuilder trait definitions.
//!
//! Both use native async fn in traits (RPITIT, Rust 2024 edition). They are
//! wrapped by `BoxAgentRunner` / `BoxPromptBuilder` for dynamic dispatch.

use std::fmt::Write as _;

use maestro_types::agent::{AgentResult, RunnerError};
use maestro_types::task::Task;

use crate::workflow::context::RunContext;

/// Performs the work of a single task.
///
/// `Ok(AgentResult { success: false, .. })` is a reported failure and is
/// recorded as-is. `Err(_)` is an exception the engine classifies and may
/// retry.
pub trait AgentRunner: Send + Sync {
    fn run_task(
        &self,
        task: &Task,
        context: &RunContext,
    ) -> impl std::future::Future<Output = Result<AgentResult, RunnerError>> + Send;
}

/// Renders the prompt a task would send to its runner.
pub trait PromptBuilder: Send + Sync {
    fn build_prompt(
        &self,
        task: &Task,
        context: &RunContext,
    ) -> impl std::future::Future<Output = Result<String, RunnerError>> + Send;
}

/// Prompt builder used when none is configured.
///
/// Renders the role, description, inputs and the summaries of previous
/// results in a stable order, so identical tasks fingerprint identically.
#[derive(Debug, Clone, Default)]
pub struct DefaultPromptBuilder;

impl PromptBuilder for DefaultPromptBuilder {
    async fn build_prompt(&self, task: &Task, context: &RunContext) -> Result<String, RunnerError> {
        let mut prompt = String::new();
        let _ = writeln!(prompt, "# Role: {}", task.role.name);
        if let Some(instructions) = &task.role.instructions {
            let _ = writeln!(prompt, "{instructions}");
        }
        let _ = writeln!(prompt, "\n# Task: {}\n{}", task.step_name, task.description);

        if let Some(inputs) = &task.inputs {
            let mut keys: Vec<&String> = inputs.keys().collect();
            keys.sort();
            let _ = writeln!(prompt, "\n# Inputs");
            for key in keys {
                let _ = writeln!(prompt, "- {key}: {}", inputs[key]);
            }
        }

        if let Some(feature) = &context.feature_description {
            let _ = writeln!(prompt, "\n# Feature\n{feature}");
        }

        if !context.previous_results.is_empty() {
            let mut steps: Vec<&String> = context.previous_results.keys().collect();
            steps.sort();
            let _ = writeln!(prompt, "\n# Previous results");
            for step in steps {
                let _ = writeln!(prompt, "- {step}: {}", context.previous_results[step].summary);
            }
        }

        Ok(prompt)
    }
}
