//! JSON file checkpoint store.
//!
//! One pretty-printed JSON document per checkpoint at `{dir}/{id}.json`.
//! Writes go to a temporary sibling first and are renamed into place, so a
//! crash mid-write never leaves a truncated checkpoint behind.

use std::path::{Path, PathBuf};

use maestro_core::repository::checkpoint::CheckpointStore;
use maestro_types::checkpoint::Checkpoint;
use maestro_types::error::RepositoryError;
use uuid::Uuid;

const EXTENSION: &str = "json";

/// Filesystem-backed implementation of `CheckpointStore`.
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// Store checkpoints under `dir` (created on first save).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `{data_dir}/checkpoints`.
    pub fn in_data_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join("checkpoints"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &Uuid) -> PathBuf {
        self.dir.join(format!("{id}.{EXTENSION}"))
    }

    async fn read(path: &Path) -> Result<Option<Checkpoint>, RepositoryError> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(RepositoryError::Query(format!("read {}: {e}", path.display()))),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| RepositoryError::Serialization(format!("{}: {e}", path.display())))
    }
}

fn io_error(action: &str, path: &Path, e: std::io::Error) -> RepositoryError {
    RepositoryError::Query(format!("{action} {}: {e}", path.display()))
}

impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), RepositoryError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error("create", &self.dir, e))?;

        let json = serde_json::to_string_pretty(checkpoint)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;

        let path = self.path_for(&checkpoint.id);
        let tmp = path.with_extension(format!("{EXTENSION}.tmp"));
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| io_error("write", &tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_error("rename", &path, e))?;

        tracing::debug!(checkpoint_id = %checkpoint.id, path = %path.display(), "checkpoint written");
        Ok(())
    }

    async fn load(&self, id: &Uuid) -> Result<Option<Checkpoint>, RepositoryError> {
        Self::read(&self.path_for(id)).await
    }

    async fn list(&self, workflow_name: Option<&str>) -> Result<Vec<Checkpoint>, RepositoryError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error("list", &self.dir, e)),
        };

        let mut checkpoints = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error("list", &self.dir, e))?
        {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != EXTENSION) {
                continue;
            }
            match Self::read(&path).await {
                Ok(Some(checkpoint)) => {
                    if workflow_name.is_none_or(|name| name == checkpoint.workflow_name) {
                        checkpoints.push(checkpoint);
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable checkpoint"),
            }
        }

        checkpoints.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(checkpoints)
    }

    async fn delete(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let path = self.path_for(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error("delete", &path, e)),
        }
    }
}
