//! SQLite checkpoint store.
//!
//! Implements `CheckpointStore` from `maestro-core`. The full checkpoint is
//! stored as a JSON blob; the workflow name, progress counters and
//! timestamps are kept in columns for listing.

use chrono::{DateTime, SecondsFormat, Utc};
use maestro_core::repository::checkpoint::CheckpointStore;
use maestro_types::checkpoint::Checkpoint;
use maestro_types::error::RepositoryError;
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `CheckpointStore`.
pub struct SqliteCheckpointStore {
    pool: DatabasePool,
}

impl SqliteCheckpointStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn decode(row: &sqlx::sqlite::SqliteRow) -> Result<Checkpoint, RepositoryError> {
    let data: String = row
        .try_get("data")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    serde_json::from_str(&data)
        .map_err(|e| RepositoryError::Serialization(format!("invalid checkpoint JSON: {e}")))
}

// ---------------------------------------------------------------------------
// CheckpointStore impl
// ---------------------------------------------------------------------------

impl CheckpointStore for SqliteCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), RepositoryError> {
        let data = serde_json::to_string(checkpoint)
            .map_err(|e| RepositoryError::Serialization(format!("serialize checkpoint: {e}")))?;

        sqlx::query(
            r#"INSERT INTO checkpoints
                 (id, workflow_name, current_step, completed_count, failed_count, data, started_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 workflow_name = excluded.workflow_name,
                 current_step = excluded.current_step,
                 completed_count = excluded.completed_count,
                 failed_count = excluded.failed_count,
                 data = excluded.data,
                 updated_at = excluded.updated_at"#,
        )
        .bind(checkpoint.id.to_string())
        .bind(&checkpoint.workflow_name)
        .bind(checkpoint.current_step.as_deref())
        .bind(checkpoint.completed_tasks.len() as i64)
        .bind(checkpoint.failed_tasks.len() as i64)
        .bind(data)
        .bind(format_datetime(&checkpoint.started_at))
        .bind(format_datetime(&checkpoint.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn load(&self, id: &Uuid) -> Result<Option<Checkpoint>, RepositoryError> {
        let row = sqlx::query("SELECT data FROM checkpoints WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        row.as_ref().map(decode).transpose()
    }

    async fn list(&self, workflow_name: Option<&str>) -> Result<Vec<Checkpoint>, RepositoryError> {
        let rows = match workflow_name {
            Some(name) => {
                sqlx::query(
                    "SELECT data FROM checkpoints WHERE workflow_name = ? ORDER BY updated_at DESC",
                )
                .bind(name)
                .fetch_all(&self.pool.reader)
                .await
            }
            None => {
                sqlx::query("SELECT data FROM checkpoints ORDER BY updated_at DESC")
                    .fetch_all(&self.pool.reader)
                    .await
            }
        }
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter().map(decode).collect()
    }

    async fn delete(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM checkpoints WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    async fn test_store() -> (SqliteCheckpointStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());
        let pool = DatabasePool::new(&url).await.unwrap();
        (SqliteCheckpointStore::new(pool), dir)
    }

    fn checkpoint(workflow: &str) -> Checkpoint {
        let mut cp = Checkpoint::new(
            workflow,
            json!({ "previous_results": { "plan": { "success": true, "summary": "planned" } } }),
        );
        cp.mark_completed("plan");
        cp.current_step = Some("plan".to_string());
        cp
    }

    #[tokio::test]
    async fn save_and_load() {
        let (store, _dir) = test_store().await;
        let cp = checkpoint("feature");

        store.save(&cp).await.unwrap();

        let loaded = store.load(&cp.id).await.unwrap().unwrap();
        assert_eq!(loaded, cp);
        assert!(store.load(&Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_upserts() {
        let (store, _dir) = test_store().await;
        let mut cp = checkpoint("feature");
        store.save(&cp).await.unwrap();

        cp.mark_failed("build");
        cp.current_step = Some("build".to_string());
        store.save(&cp).await.unwrap();

        let loaded = store.load(&cp.id).await.unwrap().unwrap();
        assert_eq!(loaded.failed_tasks, vec!["build"]);
        assert_eq!(loaded.current_step.as_deref(), Some("build"));
        assert_eq!(store.list(None).await.unwrap().len(), 1);

        let (failed,): (i64,) = sqlx::query_as("SELECT failed_count FROM checkpoints WHERE id = ?")
            .bind(cp.id.to_string())
            .fetch_one(&store.pool.reader)
            .await
            .unwrap();
        assert_eq!(failed, 1);
    }

    #[tokio::test]
    async fn list_filters_and_sorts_newest_first() {
        let (store, _dir) = test_store().await;
        let mut old = checkpoint("feature");
        old.updated_at -= Duration::minutes(10);
        let new = checkpoint("feature");
        let other = checkpoint("release");
        for cp in [&old, &new, &other] {
            store.save(cp).await.unwrap();
        }

        assert_eq!(store.list(None).await.unwrap().len(), 3);
        let ids: Vec<Uuid> = store
            .list(Some("feature"))
            .await
            .unwrap()
            .iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![new.id, old.id]);
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let (store, _dir) = test_store().await;
        let cp = checkpoint("feature");
        store.save(&cp).await.unwrap();

        assert!(store.delete(&cp.id).await.unwrap());
        assert!(!store.delete(&cp.id).await.unwrap());
        assert!(store.load(&cp.id).await.unwrap().is_none());
    }
}
