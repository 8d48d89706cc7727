//! Checkpoint coordinator for workflow runs.
//!
//! Owns the in-memory [`Checkpoint`] of one run and persists it through a
//! [`BoxCheckpointStore`]. Three paths write to the store: the auto-save
//! timer, the shutdown flush and the final save. They share one async write
//! lock and each takes its snapshot only after acquiring it, so a later
//! writer never overwrites a newer snapshot with an older one.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use maestro_types::checkpoint::Checkpoint;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::context::RunContext;
use crate::repository::checkpoint::BoxCheckpointStore;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during checkpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Underlying store operation failed.
    #[error("checkpoint store error: {0}")]
    Repository(String),

    /// No checkpoint with this ID (for resume).
    #[error("checkpoint not found: {0}")]
    NotFound(Uuid),

    /// The checkpoint belongs to a different workflow.
    #[error("checkpoint {id} belongs to workflow '{found}', not '{expected}'")]
    WorkflowMismatch {
        id: Uuid,
        expected: String,
        found: String,
    },

    #[error("checkpoint context is invalid: {0}")]
    InvalidContext(String),
}

// ---------------------------------------------------------------------------
// CheckpointCoordinator
// ---------------------------------------------------------------------------

/// State restored from an earlier checkpoint.
pub struct Resumed {
    pub coordinator: CheckpointCoordinator,
    pub context: RunContext,
    /// Steps completed by the earlier run; these are not re-executed.
    pub completed: HashSet<String>,
    pub resumed_from: Uuid,
}

/// Cheap to clone; clones share the same checkpoint.
#[derive(Clone)]
pub struct CheckpointCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<BoxCheckpointStore>,
    current: Mutex<Checkpoint>,
    write_lock: tokio::sync::Mutex<()>,
    auto_save: Mutex<Option<CancellationToken>>,
    /// When false the coordinator tracks progress but never writes.
    persist: bool,
}

impl CheckpointCoordinator {
    /// Begin tracking a fresh run.
    pub fn start_fresh(
        store: Arc<BoxCheckpointStore>,
        workflow_name: &str,
        context: &RunContext,
        metadata: HashMap<String, Value>,
        persist: bool,
    ) -> Result<Self, CheckpointError> {
        let mut checkpoint = Checkpoint::new(workflow_name, snapshot_context(context)?);
        checkpoint.metadata = metadata;

        tracing::debug!(
            checkpoint_id = %checkpoint.id,
            workflow = workflow_name,
            "created checkpoint"
        );
        Ok(Self::from_checkpoint(store, checkpoint, persist))
    }

    /// Load checkpoint `id` and begin a new checkpoint seeded from it.
    pub async fn resume(
        store: Arc<BoxCheckpointStore>,
        id: Uuid,
        workflow_name: &str,
        persist: bool,
    ) -> Result<Resumed, CheckpointError> {
        let previous = store
            .load(&id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?
            .ok_or(CheckpointError::NotFound(id))?;

        if previous.workflow_name != workflow_name {
            return Err(CheckpointError::WorkflowMismatch {
                id,
                expected: workflow_name.to_string(),
                found: previous.workflow_name,
            });
        }

        let context = RunContext::from_json(previous.context.clone())
            .map_err(|e| CheckpointError::InvalidContext(e.to_string()))?;
        let completed: HashSet<String> = previous.completed_tasks.iter().cloned().collect();

        let mut checkpoint = Checkpoint::new(workflow_name, previous.context);
        checkpoint.completed_tasks = previous.completed_tasks;
        checkpoint.failed_tasks = previous.failed_tasks;
        checkpoint.current_step = previous.current_step;
        checkpoint.metadata = previous.metadata;
        checkpoint
            .metadata
            .insert("resumed_from".to_string(), json!(id.to_string()));

        tracing::info!(
            resumed_from = %id,
            checkpoint_id = %checkpoint.id,
            completed = completed.len(),
            failed = checkpoint.failed_tasks.len(),
            started_at = %previous.started_at,
            "resuming from checkpoint"
        );

        Ok(Resumed {
            coordinator: Self::from_checkpoint(store, checkpoint, persist),
            context,
            completed,
            resumed_from: id,
        })
    }

    fn from_checkpoint(store: Arc<BoxCheckpointStore>, checkpoint: Checkpoint, persist: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                current: Mutex::new(checkpoint),
                write_lock: tokio::sync::Mutex::new(()),
                auto_save: Mutex::new(None),
                persist,
            }),
        }
    }

    /// ID of the checkpoint this run writes.
    pub fn id(&self) -> Uuid {
        self.lock_current().id
    }

    /// Whether this coordinator writes to its store. A coordinator that does
    /// not persist has an id nobody can resume from.
    pub fn persists(&self) -> bool {
        self.inner.persist
    }

    /// Copy of the in-memory checkpoint.
    pub fn snapshot(&self) -> Checkpoint {
        self.lock_current().clone()
    }

    /// Record one step outcome in memory.
    pub fn record_step(
        &self,
        step_name: &str,
        success: bool,
        context: &RunContext,
    ) -> Result<(), CheckpointError> {
        let snapshot = snapshot_context(context)?;
        let mut current = self.lock_current();
        if success {
            current.mark_completed(step_name);
        } else {
            current.mark_failed(step_name);
        }
        current.current_step = Some(step_name.to_string());
        current.context = snapshot;
        current.updated_at = Utc::now();
        Ok(())
    }

    /// Record the outcomes of a finished parallel group in memory.
    pub fn record_group(
        &self,
        outcomes: &[(String, bool)],
        context: &RunContext,
    ) -> Result<(), CheckpointError> {
        let snapshot = snapshot_context(context)?;
        let mut current = self.lock_current();
        for (step_name, success) in outcomes {
            if *success {
                current.mark_completed(step_name);
            } else {
                current.mark_failed(step_name);
            }
        }
        if let Some((last, _)) = outcomes.last() {
            current.current_step = Some(last.clone());
        }
        current.context = snapshot;
        current.updated_at = Utc::now();
        Ok(())
    }

    /// Set the step the run will resume at.
    pub fn set_current_step(&self, step_name: Option<&str>) {
        let mut current = self.lock_current();
        current.current_step = step_name.map(str::to_string);
        current.updated_at = Utc::now();
    }

    /// Persist the in-memory checkpoint.
    pub async fn save(&self) -> Result<(), CheckpointError> {
        if !self.inner.persist {
            return Ok(());
        }
        let _write = self.inner.write_lock.lock().await;
        let snapshot = self.snapshot();
        self.inner
            .store
            .save(&snapshot)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;
        tracing::debug!(
            checkpoint_id = %snapshot.id,
            completed = snapshot.completed_tasks.len(),
            failed = snapshot.failed_tasks.len(),
            "checkpoint saved"
        );
        Ok(())
    }

    /// Start persisting every `interval` in the background. Replaces any
    /// running auto-save timer.
    pub fn enable_auto_save(&self, interval: Duration) {
        if !self.inner.persist {
            return;
        }
        let token = CancellationToken::new();
        if let Some(previous) = self.lock_auto_save().replace(token.clone()) {
            previous.cancel();
        }

        // The timer holds a weak reference so dropping the last coordinator
        // also ends the timer.
        let weak = Arc::downgrade(&self.inner);
        let period = interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(inner) = weak.upgrade() else { break };
                        let coordinator = CheckpointCoordinator { inner };
                        if let Err(e) = coordinator.save().await {
                            tracing::warn!(error = %e, "auto-save failed");
                        }
                    }
                }
            }
        });
    }

    pub fn disable_auto_save(&self) {
        if let Some(token) = self.lock_auto_save().take() {
            token.cancel();
        }
    }

    /// Final save at the end of a run, then stop the auto-save timer.
    pub async fn finish(&self) -> Result<(), CheckpointError> {
        let saved = self.save().await;
        self.disable_auto_save();
        saved
    }

    /// Stored checkpoints for a workflow (or all workflows).
    pub async fn list(
        store: &BoxCheckpointStore,
        workflow_name: Option<&str>,
    ) -> Result<Vec<Checkpoint>, CheckpointError> {
        store
            .list(workflow_name)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))
    }

    fn lock_current(&self) -> std::sync::MutexGuard<'_, Checkpoint> {
        self.inner.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_auto_save(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.inner.auto_save.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(token) = self.auto_save.get_mut().ok().and_then(Option::take) {
            token.cancel();
        }
    }
}

fn snapshot_context(context: &RunContext) -> Result<Value, CheckpointError> {
    context
        .to_json()
        .map_err(|e| CheckpointError::InvalidContext(e.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
