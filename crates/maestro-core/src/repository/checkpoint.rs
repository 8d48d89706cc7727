//! Checkpoint store trait definition.
//!
//! A checkpoint store persists opaque [`Checkpoint`] snapshots. The
//! infrastructure layer (maestro-infra) implements it with JSON files and
//! SQLite; [`InMemoryCheckpointStore`] covers tests and embedders that do not
//! need durability.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use maestro_types::checkpoint::Checkpoint;
use maestro_types::error::RepositoryError;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Storage port for checkpoints.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait CheckpointStore: Send + Sync {
    /// Upsert a checkpoint by ID.
    fn save(
        &self,
        checkpoint: &Checkpoint,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// Load a checkpoint by ID.
    fn load(
        &self,
        id: &Uuid,
    ) -> impl Future<Output = Result<Option<Checkpoint>, RepositoryError>> + Send;

    /// List checkpoints, optionally for one workflow, most recently updated first.
    fn list(
        &self,
        workflow_name: Option<&str>,
    ) -> impl Future<Output = Result<Vec<Checkpoint>, RepositoryError>> + Send;

    /// Delete a checkpoint. Returns `true` if it existed.
    fn delete(&self, id: &Uuid) -> impl Future<Output = Result<bool, RepositoryError>> + Send;
}

// ---------------------------------------------------------------------------
// BoxCheckpointStore
// ---------------------------------------------------------------------------

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe version of [`CheckpointStore`] with boxed futures.
pub trait CheckpointStoreDyn: Send + Sync {
    fn save_boxed<'a>(&'a self, checkpoint: &'a Checkpoint)
    -> BoxFuture<'a, Result<(), RepositoryError>>;

    fn load_boxed<'a>(&'a self, id: &'a Uuid)
    -> BoxFuture<'a, Result<Option<Checkpoint>, RepositoryError>>;

    fn list_boxed<'a>(
        &'a self,
        workflow_name: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Vec<Checkpoint>, RepositoryError>>;

    fn delete_boxed<'a>(&'a self, id: &'a Uuid) -> BoxFuture<'a, Result<bool, RepositoryError>>;
}

impl<T: CheckpointStore> CheckpointStoreDyn for T {
    fn save_boxed<'a>(
        &'a self,
        checkpoint: &'a Checkpoint,
    ) -> BoxFuture<'a, Result<(), RepositoryError>> {
        Box::pin(self.save(checkpoint))
    }

    fn load_boxed<'a>(
        &'a self,
        id: &'a Uuid,
    ) -> BoxFuture<'a, Result<Option<Checkpoint>, RepositoryError>> {
        Box::pin(self.load(id))
    }

    fn list_boxed<'a>(
        &'a self,
        workflow_name: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Vec<Checkpoint>, RepositoryError>> {
        Box::pin(self.list(workflow_name))
    }

    fn delete_boxed<'a>(&'a self, id: &'a Uuid) -> BoxFuture<'a, Result<bool, RepositoryError>> {
        Box::pin(self.delete(id))
    }
}

/// Type-erased checkpoint store for runtime backend selection.
pub struct BoxCheckpointStore {
    inner: Box<dyn CheckpointStoreDyn + Send + Sync>,
}

impl BoxCheckpointStore {
    pub fn new<T: CheckpointStore + 'static>(store: T) -> Self {
        Self {
            inner: Box::new(store),
        }
    }

    pub async fn save(&self, checkpoint: &Checkpoint) -> Result<(), RepositoryError> {
        self.inner.save_boxed(checkpoint).await
    }

    pub async fn load(&self, id: &Uuid) -> Result<Option<Checkpoint>, RepositoryError> {
        self.inner.load_boxed(id).await
    }

    pub async fn list(&self, workflow_name: Option<&str>) -> Result<Vec<Checkpoint>, RepositoryError> {
        self.inner.list_boxed(workflow_name).await
    }

    pub async fn delete(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        self.inner.delete_boxed(id).await
    }
}

// ---------------------------------------------------------------------------
// InMemoryCheckpointStore
// ---------------------------------------------------------------------------

/// Process-local checkpoint store.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: RwLock<HashMap<Uuid, Checkpoint>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), RepositoryError> {
        self.checkpoints
            .write()
            .await
            .insert(checkpoint.id, checkpoint.clone());
        Ok(())
    }

    async fn load(&self, id: &Uuid) -> Result<Option<Checkpoint>, RepositoryError> {
        Ok(self.checkpoints.read().await.get(id).cloned())
    }

    async fn list(&self, workflow_name: Option<&str>) -> Result<Vec<Checkpoint>, RepositoryError> {
        let guard = self.checkpoints.read().await;
        let mut out: Vec<Checkpoint> = guard
            .values()
            .filter(|c| workflow_name.is_none_or(|name| c.workflow_name == name))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(out)
    }

    async fn delete(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        Ok(self.checkpoints.write().await.remove(id).is_some())
    }
}
