//! 异步 SQLite 检查点存储
//!
//! 使用 sqlx 提供完全异步的数据库操作，避免在 async 上下文中阻塞。
//! 需要启用 `async-sqlite` feature。版本号在事务内由 MAX(version)+1 得出，
//! (thread_id, version) 为主键，同一会话的并发写额外由进程内互斥锁串行化。

#[cfg(feature = "async-sqlite")]
mod sqlx_impl {
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Arc;

    use async_trait::async_trait;
    use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
    use sqlx::Row;
    use tokio::sync::{Mutex, RwLock};

    use crate::core::ConversationState;
    use crate::memory::checkpoint::{
        Checkpoint, CheckpointError, CheckpointMetadata, CheckpointSource, CheckpointStore,
    };

    fn storage(e: sqlx::Error) -> CheckpointError {
        CheckpointError::Storage(e.to_string())
    }

    /// 异步 SQLite 检查点存储
    pub struct SqliteCheckpointStore {
        pool: SqlitePool,
        locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
    }

    impl SqliteCheckpointStore {
        /// 打开（必要时创建）数据库并建表
        pub async fn new(db_path: impl AsRef<Path>) -> Result<Self, CheckpointError> {
            let db_url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());

            let pool = SqlitePoolOptions::new()
                .max_connections(5)
                .connect(&db_url)
                .await
                .map_err(storage)?;

            let store = Self {
                pool,
                locks: RwLock::new(HashMap::new()),
            };
            store.init_tables().await.map_err(storage)?;

            Ok(store)
        }

        async fn init_tables(&self) -> Result<(), sqlx::Error> {
            sqlx::query(
                "CREATE TABLE IF NOT EXISTS checkpoints (
                    thread_id TEXT NOT NULL,
                    version INTEGER NOT NULL,
                    source TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    message_count INTEGER NOT NULL,
                    state TEXT NOT NULL,
                    PRIMARY KEY (thread_id, version)
                )",
            )
            .execute(&self.pool)
            .await?;

            Ok(())
        }

        async fn lock_for(&self, thread_id: &str) -> Arc<Mutex<()>> {
            if let Some(l) = self.locks.read().await.get(thread_id) {
                return l.clone();
            }
            self.locks
                .write()
                .await
                .entry(thread_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        }

        pub async fn close(&self) {
            self.pool.close().await;
        }
    }

    #[async_trait]
    impl CheckpointStore for SqliteCheckpointStore {
        async fn put(
            &self,
            thread_id: &str,
            state: &ConversationState,
            source: CheckpointSource,
        ) -> Result<u64, CheckpointError> {
            let lock = self.lock_for(thread_id).await;
            let _guard = lock.lock().await;

            let state_json = serde_json::to_string(state)?;
            let mut tx = self.pool.begin().await.map_err(storage)?;
            let row = sqlx::query(
                "SELECT COALESCE(MAX(version), 0) AS v FROM checkpoints WHERE thread_id = ?",
            )
            .bind(thread_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(storage)?;
            let previous: i64 = row.get("v");
            let version = previous + 1;

            sqlx::query(
                "INSERT INTO checkpoints (thread_id, version, source, created_at, message_count, state)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(thread_id)
            .bind(version)
            .bind(source.as_str())
            .bind(chrono::Utc::now().to_rfc3339())
            .bind(state.len() as i64)
            .bind(state_json)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
            tx.commit().await.map_err(storage)?;

            Ok(version as u64)
        }

        async fn get_latest(
            &self,
            thread_id: &str,
        ) -> Result<Option<Checkpoint>, CheckpointError> {
            let row = sqlx::query(
                "SELECT version, source, created_at, state FROM checkpoints
                 WHERE thread_id = ? ORDER BY version DESC LIMIT 1",
            )
            .bind(thread_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

            let Some(row) = row else {
                return Ok(None);
            };
            let version: i64 = row.get("version");
            let source: String = row.get("source");
            let created_at: String = row.get("created_at");
            let state: String = row.get("state");
            Ok(Some(Checkpoint {
                thread_id: thread_id.to_string(),
                version: version as u64,
                source: CheckpointSource::parse(&source).ok_or_else(|| {
                    CheckpointError::Serialization(format!("unknown source {source}"))
                })?,
                created_at,
                state: serde_json::from_str(&state)?,
            }))
        }

        async fn list(
            &self,
            thread_id: &str,
            limit: Option<usize>,
        ) -> Result<Vec<CheckpointMetadata>, CheckpointError> {
            let limit = limit.map(|l| l as i64).unwrap_or(-1);
            let rows = sqlx::query(
                "SELECT version, source, created_at, message_count FROM checkpoints
                 WHERE thread_id = ? ORDER BY version DESC LIMIT ?",
            )
            .bind(thread_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;

            let mut items = Vec::with_capacity(rows.len());
            for row in rows.into_iter().rev() {
                let version: i64 = row.get("version");
                let source: String = row.get("source");
                let message_count: i64 = row.get("message_count");
                let Some(source) = CheckpointSource::parse(&source) else {
                    continue;
                };
                items.push(CheckpointMetadata {
                    version: version as u64,
                    source,
                    created_at: row.get("created_at"),
                    message_count: message_count as usize,
                });
            }
            Ok(items)
        }
    }

}

#[cfg(feature = "async-sqlite")]
pub use sqlx_impl::SqliteCheckpointStore;
