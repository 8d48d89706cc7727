//! Mock ports shared by the engine tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use maestro_types::agent::{AgentResult, RunnerError};
use maestro_types::task::Task;

use crate::agent::runner::AgentRunner;

use super::context::RunContext;
use super::shutdown::ShutdownSignal;

/// How the mock answers a given step.
#[derive(Debug, Clone, Copy)]
pub enum Script {
    /// `Ok(AgentResult { success: false, .. })`.
    Report,
    /// `Err(RunnerError::InvalidRequest)` (not retryable).
    Fatal,
    /// `Err(RunnerError::Transport)` for the first `n` calls, then success.
    TransientThenOk(usize),
    /// Panic inside `run_task`.
    Panic,
}

/// Records every call, tracks peak concurrency, and answers per script.
#[derive(Clone, Default)]
pub struct MockRunner {
    delay: Option<Duration>,
    scripts: Arc<Mutex<Vec<(String, bool, Script)>>>,
    triggers: Arc<Mutex<HashMap<String, ShutdownSignal>>>,
    calls: Arc<Mutex<Vec<(String, Vec<String>)>>>,
    per_step: Arc<Mutex<HashMap<String, usize>>>,
    running: Arc<AtomicUsize>,
    pub peak: Arc<AtomicUsize>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn script(self, step: &str, script: Script) -> Self {
        self.scripts.lock().unwrap().push((step.to_string(), false, script));
        self
    }

    /// Script every step whose name starts with `prefix`.
    pub fn script_prefix(self, prefix: &str, script: Script) -> Self {
        self.scripts.lock().unwrap().push((prefix.to_string(), true, script));
        self
    }

    /// Trigger `signal` once `step` has been called.
    pub fn trigger_after(self, step: &str, signal: ShutdownSignal) -> Self {
        self.triggers.lock().unwrap().insert(step.to_string(), signal);
        self
    }

    /// Step names in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(s, _)| s.clone()).collect()
    }

    /// Sorted names of the previous results visible to the first call of `step`.
    pub fn seen_previous(&self, step: &str) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .find(|(s, _)| s == step)
            .map(|(_, seen)| seen.clone())
            .unwrap_or_default()
    }

    fn script_for(&self, step: &str) -> Option<Script> {
        self.scripts
            .lock()
            .unwrap()
            .iter()
            .find(|(key, prefix, _)| if *prefix { step.starts_with(key.as_str()) } else { key == step })
            .map(|(_, _, script)| *script)
    }
}

impl AgentRunner for MockRunner {
    async fn run_task(&self, task: &Task, context: &RunContext) -> Result<AgentResult, RunnerError> {
        let step = task.step_name.clone();
        let mut seen: Vec<String> = context.previous_results.keys().cloned().collect();
        seen.sort();
        self.calls.lock().unwrap().push((step.clone(), seen));
        let call_index = {
            let mut per_step = self.per_step.lock().unwrap();
            let count = per_step.entry(step.clone()).or_insert(0);
            *count += 1;
            *count
        };

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);

        if let Some(signal) = self.triggers.lock().unwrap().get(&step) {
            signal.trigger();
        }

        match self.script_for(&step) {
            Some(Script::Report) => Ok(AgentResult::failed(format!("{step} reported failure"))),
            Some(Script::Fatal) => Err(RunnerError::InvalidRequest(format!("{step} is malformed"))),
            Some(Script::Panic) => panic!("{step} runner blew up"),
            Some(Script::TransientThenOk(n)) if call_index <= n => {
                Err(RunnerError::Transport(format!("{step} connection reset")))
            }
            _ => Ok(AgentResult::succeeded(format!("done {step}"))
                .with_raw_output(format!("output of {step}"))),
        }
    }
}
