/// SQLite persistence layer for workflow instance snapshots
///
/// Each instance is one row holding its current result, status and the
/// JSON-encoded list of pending signals. Rows are written after every state
/// change so instances survive a process restart.

use crate::workflow::types::{InstanceKey, InstanceSnapshot, InstanceStatus, PendingSignal};
use anyhow::{Context, Result};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions},
    Row,
};
use std::path::Path;

/// SQLite-based snapshot store
#[derive(Debug, Clone)]
pub struct InstanceStorage {
    /// SQLite connection pool for the namespace database
    pool: SqlitePool,
    /// Namespace every row is scoped to
    namespace: String,
}

impl InstanceStorage {
    /// Open (creating if missing) the database file and initialize its schema
    pub async fn open(path: &Path, namespace: &str) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create data directory '{}'", parent.display()))?;
        }

        tracing::info!("🗄️ Opening instance store: {}", path.display());

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let storage = Self::new(pool, namespace);
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Wrap an existing pool
    pub fn new(pool: SqlitePool, namespace: &str) -> Self {
        Self {
            pool,
            namespace: namespace.to_string(),
        }
    }

    /// Create the instances table; safe to call repeatedly
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflow_instances (
                namespace TEXT NOT NULL,
                workflow_id TEXT NOT NULL,
                run_id TEXT NOT NULL,
                task_queue TEXT NOT NULL,
                initial_message TEXT NOT NULL,
                current_result TEXT NOT NULL,
                status TEXT NOT NULL,
                pending JSON NOT NULL,
                version INTEGER NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (namespace, workflow_id, run_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_instances_status
            ON workflow_instances(namespace, status)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert or update an instance snapshot
    ///
    /// Result and status always come from the caller (the control loop is
    /// their only writer). The pending list is only replaced when the
    /// snapshot is at least as new as the stored one, so a racing enqueue
    /// cannot be rolled back.
    pub async fn save_snapshot(&self, snapshot: &InstanceSnapshot) -> Result<()> {
        let pending_json = serde_json::to_string(&snapshot.pending)?;

        sqlx::query(
            r#"
            INSERT INTO workflow_instances
                (namespace, workflow_id, run_id, task_queue, initial_message,
                 current_result, status, pending, version, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(namespace, workflow_id, run_id) DO UPDATE SET
                current_result = excluded.current_result,
                status = excluded.status,
                pending = CASE
                    WHEN excluded.version >= workflow_instances.version THEN excluded.pending
                    ELSE workflow_instances.pending
                END,
                version = MAX(excluded.version, workflow_instances.version),
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&self.namespace)
        .bind(&snapshot.key.workflow_id)
        .bind(&snapshot.key.run_id)
        .bind(&snapshot.task_queue)
        .bind(&snapshot.initial_message)
        .bind(&snapshot.current_result)
        .bind(snapshot.status.as_str())
        .bind(&pending_json)
        .bind(snapshot.version as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record only a new pending-signal list, leaving the result untouched
    pub async fn save_pending(&self, key: &InstanceKey, pending: &[PendingSignal], version: u64) -> Result<()> {
        let pending_json = serde_json::to_string(pending)?;

        sqlx::query(
            r#"
            UPDATE workflow_instances
            SET pending = ?, version = ?, updated_at = CURRENT_TIMESTAMP
            WHERE namespace = ? AND workflow_id = ? AND run_id = ? AND version < ?
            "#,
        )
        .bind(&pending_json)
        .bind(version as i64)
        .bind(&self.namespace)
        .bind(&key.workflow_id)
        .bind(&key.run_id)
        .bind(version as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Load one instance snapshot
    pub async fn get_snapshot(&self, key: &InstanceKey) -> Result<Option<InstanceSnapshot>> {
        let row = sqlx::query(
            r#"
            SELECT workflow_id, run_id, task_queue, initial_message, current_result,
                   status, pending, version
            FROM workflow_instances
            WHERE namespace = ? AND workflow_id = ? AND run_id = ?
            "#,
        )
        .bind(&self.namespace)
        .bind(&key.workflow_id)
        .bind(&key.run_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| snapshot_from_row(&row)).transpose()
    }

    /// Run id of the most recently started run of a workflow id
    pub async fn latest_run_id(&self, workflow_id: &str) -> Result<Option<String>> {
        let row = sqlx::query(
            r#"
            SELECT run_id FROM workflow_instances
            WHERE namespace = ? AND workflow_id = ?
            ORDER BY created_at DESC, rowid DESC
            LIMIT 1
            "#,
        )
        .bind(&self.namespace)
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| row.get("run_id")))
    }

    /// All instances that have not reached a terminal state
    pub async fn load_running(&self) -> Result<Vec<InstanceSnapshot>> {
        let rows = sqlx::query(
            r#"
            SELECT workflow_id, run_id, task_queue, initial_message, current_result,
                   status, pending, version
            FROM workflow_instances
            WHERE namespace = ? AND status = ?
            ORDER BY created_at, rowid
            "#,
        )
        .bind(&self.namespace)
        .bind(InstanceStatus::Running.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(snapshot_from_row).collect()
    }

    /// Close the connection pool
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn snapshot_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<InstanceSnapshot> {
    let status_raw: String = row.get("status");
    let status = InstanceStatus::parse(&status_raw)
        .ok_or_else(|| anyhow::anyhow!("Unknown instance status in store: {}", status_raw))?;
    let pending_json: String = row.get("pending");
    let version: i64 = row.get("version");

    Ok(InstanceSnapshot {
        key: InstanceKey::new(row.get::<String, _>("workflow_id"), row.get::<String, _>("run_id")),
        task_queue: row.get("task_queue"),
        initial_message: row.get("initial_message"),
        current_result: row.get("current_result"),
        status,
        pending: serde_json::from_str(&pending_json)?,
        version: version as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::{Signal, SignalKind};

    async fn temp_storage(namespace: &str) -> InstanceStorage {
        let path = std::env::temp_dir()
            .join(format!("chatway-storage-{}", uuid::Uuid::new_v4()))
            .join("store.db");
        InstanceStorage::open(&path, namespace).await.unwrap()
    }

    fn snapshot(version: u64, result: &str, status: InstanceStatus) -> InstanceSnapshot {
        InstanceSnapshot {
            key: InstanceKey::new("chat-workflow-1", "run-1"),
            task_queue: "my-task-queue".to_string(),
            initial_message: "Hello World".to_string(),
            current_result: result.to_string(),
            status,
            pending: vec![PendingSignal {
                seq: 0,
                signal: Signal::new(SignalKind::Confirm, "yes"),
            }],
            version,
        }
    }

    #[tokio::test]
    async fn snapshot_round_trips_through_sqlite() {
        let storage = temp_storage("default").await;
        let original = snapshot(1, "Hello, Hello World!", InstanceStatus::Running);
        storage.save_snapshot(&original).await.unwrap();

        let loaded = storage.get_snapshot(&original.key).await.unwrap().unwrap();
        assert_eq!(loaded, original);
        assert_eq!(storage.load_running().await.unwrap(), vec![original]);
    }

    #[tokio::test]
    async fn older_versions_do_not_roll_back_pending_signals() {
        let storage = temp_storage("default").await;
        let key = InstanceKey::new("chat-workflow-1", "run-1");
        storage.save_snapshot(&snapshot(1, "first", InstanceStatus::Running)).await.unwrap();
        storage.save_pending(&key, &[], 5).await.unwrap();

        // A loop snapshot taken before the enqueue at version 5 lands late.
        storage.save_snapshot(&snapshot(3, "second", InstanceStatus::Running)).await.unwrap();
        storage.save_pending(&key, &[], 4).await.unwrap();

        let loaded = storage.get_snapshot(&key).await.unwrap().unwrap();
        assert_eq!(loaded.current_result, "second");
        assert!(loaded.pending.is_empty());
        assert_eq!(loaded.version, 5);

        storage.save_snapshot(&snapshot(6, "third", InstanceStatus::Running)).await.unwrap();
        let loaded = storage.get_snapshot(&key).await.unwrap().unwrap();
        assert_eq!(loaded.pending.len(), 1);

        assert_eq!(loaded.version, 6);
    }

    #[tokio::test]
    async fn terminal_instances_are_not_reloaded() {
        let storage = temp_storage("default").await;
        storage
            .save_snapshot(&snapshot(2, "Chat ended: bye", InstanceStatus::Completed))
            .await
            .unwrap();

        assert!(storage.load_running().await.unwrap().is_empty());
        assert_eq!(
            storage.latest_run_id("chat-workflow-1").await.unwrap().as_deref(),
            Some("run-1")
        );
    }

    #[tokio::test]
    async fn namespaces_are_isolated() {
        let storage = temp_storage("default").await;
        storage.save_snapshot(&snapshot(1, "r", InstanceStatus::Running)).await.unwrap();

        let other = InstanceStorage::new(storage.pool.clone(), "other");
        let key = InstanceKey::new("chat-workflow-1", "run-1");
        assert!(other.get_snapshot(&key).await.unwrap().is_none());
        assert!(other.latest_run_id("chat-workflow-1").await.unwrap().is_none());
    }
}
