//! BoxAgentRunner / BoxPromptBuilder -- object-safe wrappers for the agent ports.
//!
//! Same blanket-impl pattern as the other boxed ports:
//! 1. Define an object-safe `*Dyn` trait with boxed futures
//! 2. Blanket-impl it for every implementor of the RPITIT trait
//! 3. The `Box*` type wraps `Box<dyn *Dyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use maestro_types::agent::{AgentResult, RunnerError};
use maestro_types::task::Task;

use super::runner::{AgentRunner, PromptBuilder};
use crate::workflow::context::RunContext;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// ---------------------------------------------------------------------------
// AgentRunner
// ---------------------------------------------------------------------------

/// Object-safe version of [`AgentRunner`].
pub trait AgentRunnerDyn: Send + Sync {
    fn run_task_boxed<'a>(
        &'a self,
        task: &'a Task,
        context: &'a RunContext,
    ) -> BoxFuture<'a, Result<AgentResult, RunnerError>>;
}

impl<T: AgentRunner> AgentRunnerDyn for T {
    fn run_task_boxed<'a>(
        &'a self,
        task: &'a Task,
        context: &'a RunContext,
    ) -> BoxFuture<'a, Result<AgentResult, RunnerError>> {
        Box::pin(self.run_task(task, context))
    }
}

/// Type-erased agent runner.
pub struct BoxAgentRunner {
    inner: Box<dyn AgentRunnerDyn + Send + Sync>,
}

impl BoxAgentRunner {
    pub fn new<T: AgentRunner + 'static>(runner: T) -> Self {
        Self {
            inner: Box::new(runner),
        }
    }

    pub async fn run_task(
        &self,
        task: &Task,
        context: &RunContext,
    ) -> Result<AgentResult, RunnerError> {
        self.inner.run_task_boxed(task, context).await
    }
}

// ---------------------------------------------------------------------------
// PromptBuilder
// ---------------------------------------------------------------------------

/// Object-safe version of [`PromptBuilder`].
pub trait PromptBuilderDyn: Send + Sync {
    fn build_prompt_boxed<'a>(
        &'a self,
        task: &'a Task,
        context: &'a RunContext,
    ) -> BoxFuture<'a, Result<String, RunnerError>>;
}

impl<T: PromptBuilder> PromptBuilderDyn for T {
    fn build_prompt_boxed<'a>(
        &'a self,
        task: &'a Task,
        context: &'a RunContext,
    ) -> BoxFuture<'a, Result<String, RunnerError>> {
        Box::pin(self.build_prompt(task, context))
    }
}

/// Type-erased prompt builder.
pub struct BoxPromptBuilder {
    inner: Box<dyn PromptBuilderDyn + Send + Sync>,
}

impl BoxPromptBuilder {
    pub fn new<T: PromptBuilder + 'static>(builder: T) -> Self {
        Self {
            inner: Box::new(builder),
        }
    }

    pub async fn build_prompt(
        &self,
        task: &Task,
        context: &RunContext,
    ) -> Result<String, RunnerError> {
        self.inner.build_prompt_boxed(task, context).await
    }
}
