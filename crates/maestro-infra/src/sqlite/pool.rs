//! Connections to the checkpoint database.
//!
//! Checkpoints are written by one run at a time but listed and loaded from
//! anywhere, so writes go through a single connection and reads through a
//! small read-only pool. The database runs in WAL mode so readers never wait
//! on an in-progress save.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

const DATABASE_FILE: &str = "maestro.db";
const READ_CONNECTIONS: u32 = 4;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Writer and reader pools over one checkpoint database.
#[derive(Clone)]
pub struct DatabasePool {
    /// Single connection; every checkpoint upsert and delete goes here.
    pub writer: SqlitePool,
    /// Read-only connections for `load` and `list`.
    pub reader: SqlitePool,
}

impl DatabasePool {
    /// Open (or create) the database at `database_url` and bring the
    /// `checkpoints` schema up to date before any reader connects.
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let options = connect_options(database_url)?;

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options.clone())
            .await?;
        sqlx::migrate!("../../migrations").run(&writer).await?;

        let reader = SqlitePoolOptions::new()
            .max_connections(READ_CONNECTIONS)
            .connect_with(options.read_only(true))
            .await?;

        tracing::debug!(url = database_url, "checkpoint database ready");
        Ok(Self { writer, reader })
    }

    /// Open `{data_dir}/maestro.db`, creating the directory if needed.
    pub async fn in_data_dir(data_dir: &Path) -> Result<Self, sqlx::Error> {
        tokio::fs::create_dir_all(data_dir).await?;
        Self::new(&database_url_for(data_dir)).await
    }

    /// Close both pools, waiting for in-flight queries.
    pub async fn close(&self) {
        self.writer.close().await;
        self.reader.close().await;
    }
}

fn connect_options(database_url: &str) -> Result<SqliteConnectOptions, sqlx::Error> {
    Ok(SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(BUSY_TIMEOUT))
}

fn database_url_for(data_dir: &Path) -> String {
    format!("sqlite://{}", data_dir.join(DATABASE_FILE).display())
}

/// The database URL under the resolved data directory
/// (`MAESTRO_DATA_DIR`, falling back to `~/.maestro`).
pub fn default_database_url() -> String {
    database_url_for(&crate::config::resolve_data_dir())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open(dir: &tempfile::TempDir) -> DatabasePool {
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("checkpoints.db").display());
        DatabasePool::new(&url).await.unwrap()
    }

    #[tokio::test]
    async fn migrations_create_only_the_checkpoint_table() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open(&dir).await;

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' AND name != '_sqlx_migrations'",
        )
        .fetch_all(&pool.reader)
        .await
        .unwrap();

        assert_eq!(tables, vec![("checkpoints".to_string(),)]);
    }

    #[tokio::test]
    async fn writer_runs_in_wal_mode() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open(&dir).await;

        let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&pool.writer)
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[tokio::test]
    async fn reader_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open(&dir).await;

        let result = sqlx::query("DELETE FROM checkpoints").execute(&pool.reader).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn in_data_dir_creates_directory_and_closes() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("nested").join("data");

        let pool = DatabasePool::in_data_dir(&data_dir).await.unwrap();
        pool.close().await;

        assert!(data_dir.join(DATABASE_FILE).exists());
        assert!(pool.writer.is_closed());
        assert!(pool.reader.is_closed());
    }

    #[test]
    fn default_url_points_at_maestro_db() {
        let url = default_database_url();
        assert!(url.starts_with("sqlite://"));
        assert!(url.ends_with(DATABASE_FILE));
    }
}
