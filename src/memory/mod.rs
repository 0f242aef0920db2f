//! 记忆层：消息模型、检查点存储（内存 / 文件 / SQLite）、历史分析

pub mod analyzer;
pub mod async_persistence;
pub mod checkpoint;
pub mod in_memory;
pub mod message;
pub mod persistence;

use std::sync::Arc;

pub use analyzer::{analyze_messages, HistoryAnalysis, ToolUsage};
#[cfg(feature = "async-sqlite")]
pub use async_persistence::SqliteCheckpointStore;
pub use checkpoint::{
    Checkpoint, CheckpointError, CheckpointMetadata, CheckpointSource, CheckpointStore,
};
pub use in_memory::MemoryCheckpointStore;
pub use message::{Message, Role, ToolCallRequest, ToolResult};
pub use persistence::FileCheckpointStore;

use crate::config::CheckpointSection;

/// 按配置创建检查点存储
///
/// backend = memory / file / sqlite；sqlite 需要 async-sqlite feature，
/// 不可用或未知时回退到内存存储
pub async fn create_checkpoint_store(cfg: &CheckpointSection) -> Arc<dyn CheckpointStore> {
    match cfg.backend.to_lowercase().as_str() {
        "file" => {
            tracing::info!("Using file checkpoint store: {:?}", cfg.dir);
            return Arc::new(FileCheckpointStore::new(&cfg.dir));
        }
        #[cfg(feature = "async-sqlite")]
        "sqlite" => match SqliteCheckpointStore::new(&cfg.sqlite_path).await {
            Ok(store) => {
                tracing::info!("Using sqlite checkpoint store: {:?}", cfg.sqlite_path);
                return Arc::new(store);
            }
            Err(e) => {
                tracing::warn!("Failed to open sqlite checkpoint store, falling back to memory: {}", e);
            }
        },
        #[cfg(not(feature = "async-sqlite"))]
        "sqlite" => {
            tracing::warn!("sqlite checkpoint store requested but async-sqlite feature not enabled, using memory store");
        }
        "memory" => {}
        other => {
            tracing::warn!("Unknown checkpoint backend '{}', using memory store", other);
        }
    }

    tracing::info!("Using in-memory checkpoint store");
    Arc::new(MemoryCheckpointStore::with_retention(cfg.max_per_thread))
}
