//! 检查点存储抽象
//!
//! 以会话 id（thread_id）为键，每一步之后保存完整的 ConversationState 快照。
//! 约定：
//! - put 返回该会话内的新版本号（从 1 开始逐次加一）
//! - 写入要么完整可见要么不可见，不会读到半个快照
//! - 同一执行线程上 put 之后的 get_latest 至少能看到这次 put（read-your-writes）
//! - 同一会话的并发写由存储串行化，后写者胜；不同会话之间不加锁

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::ConversationState;

/// 检查点存储错误
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("serialization: {0}")]
    Serialization(String),
    #[error("storage: {0}")]
    Storage(String),
}

impl From<serde_json::Error> for CheckpointError {
    fn from(e: serde_json::Error) -> Self {
        CheckpointError::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for CheckpointError {
    fn from(e: std::io::Error) -> Self {
        CheckpointError::Storage(e.to_string())
    }
}

/// 检查点来源：模型步或工具步
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointSource {
    Model,
    Tools,
}

impl CheckpointSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointSource::Model => "model",
            CheckpointSource::Tools => "tools",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "model" => Some(CheckpointSource::Model),
            "tools" => Some(CheckpointSource::Tools),
            _ => None,
        }
    }
}

/// 检查点元数据（list 返回，用于统计与回溯）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub version: u64,
    pub source: CheckpointSource,
    /// RFC 3339
    pub created_at: String,
    pub message_count: usize,
}

/// 单个检查点：元数据 + 状态快照
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: String,
    pub version: u64,
    pub source: CheckpointSource,
    pub created_at: String,
    pub state: ConversationState,
}

impl Checkpoint {
    pub fn new(
        thread_id: &str,
        version: u64,
        source: CheckpointSource,
        state: ConversationState,
    ) -> Self {
        Self {
            thread_id: thread_id.to_string(),
            version,
            source,
            created_at: chrono::Utc::now().to_rfc3339(),
            state,
        }
    }

    pub fn metadata(&self) -> CheckpointMetadata {
        CheckpointMetadata {
            version: self.version,
            source: self.source,
            created_at: self.created_at.clone(),
            message_count: self.state.len(),
        }
    }
}

/// 检查点存储接口；控制循环只依赖此 trait，后端可替换
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// 保存新快照，返回版本号
    async fn put(
        &self,
        thread_id: &str,
        state: &ConversationState,
        source: CheckpointSource,
    ) -> Result<u64, CheckpointError>;

    /// 最新快照；会话不存在时为 None
    async fn get_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>, CheckpointError>;

    /// 元数据列表，按版本升序；limit 取最新的若干条
    async fn list(
        &self,
        thread_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<CheckpointMetadata>, CheckpointError>;
}

/// 只保留最新的 limit 条
pub(crate) fn tail<T>(mut items: Vec<T>, limit: Option<usize>) -> Vec<T> {
    if let Some(l) = limit {
        if items.len() > l {
            items.drain(..items.len() - l);
        }
    }
    items
}
