//! 内存检查点存储（权威实现）
//!
//! 外层 map 只在查找 / 创建会话条目时短暂加锁；同一会话的写入由该会话自己的互斥锁串行化。

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use crate::core::ConversationState;
use crate::memory::checkpoint::{
    tail, Checkpoint, CheckpointError, CheckpointMetadata, CheckpointSource, CheckpointStore,
};

#[derive(Default)]
struct ThreadLog {
    checkpoints: VecDeque<Checkpoint>,
    last_version: u64,
}

/// 内存检查点存储；max_per_thread > 0 时每个会话只保留最新 N 个检查点
#[derive(Default)]
pub struct MemoryCheckpointStore {
    threads: RwLock<HashMap<String, Arc<Mutex<ThreadLog>>>>,
    max_per_thread: usize,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(max_per_thread: usize) -> Self {
        Self {
            threads: RwLock::new(HashMap::new()),
            max_per_thread,
        }
    }

    async fn thread(&self, thread_id: &str) -> Option<Arc<Mutex<ThreadLog>>> {
        self.threads.read().await.get(thread_id).cloned()
    }

    async fn thread_or_create(&self, thread_id: &str) -> Arc<Mutex<ThreadLog>> {
        if let Some(t) = self.thread(thread_id).await {
            return t;
        }
        let mut threads = self.threads.write().await;
        threads
            .entry(thread_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ThreadLog::default())))
            .clone()
    }

    /// 当前保存的会话数
    pub async fn thread_count(&self) -> usize {
        self.threads.read().await.len()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn put(
        &self,
        thread_id: &str,
        state: &ConversationState,
        source: CheckpointSource,
    ) -> Result<u64, CheckpointError> {
        let thread = self.thread_or_create(thread_id).await;
        let mut log = thread.lock().await;
        let version = log.last_version + 1;
        log.checkpoints
            .push_back(Checkpoint::new(thread_id, version, source, state.clone()));
        log.last_version = version;
        if self.max_per_thread > 0 {
            while log.checkpoints.len() > self.max_per_thread {
                log.checkpoints.pop_front();
            }
        }
        Ok(version)
    }

    async fn get_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let Some(thread) = self.thread(thread_id).await else {
            return Ok(None);
        };
        let log = thread.lock().await;
        Ok(log.checkpoints.back().cloned())
    }

    async fn list(
        &self,
        thread_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<CheckpointMetadata>, CheckpointError> {
        let Some(thread) = self.thread(thread_id).await else {
            return Ok(Vec::new());
        };
        let log = thread.lock().await;
        let all = log.checkpoints.iter().map(Checkpoint::metadata).collect();
        Ok(tail(all, limit))
    }
}
