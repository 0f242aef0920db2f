//! 文件检查点存储
//!
//! 每个会话两份文件：`<key>.json` 是最新快照（先写临时文件再 rename，读者看不到半个快照），
//! `<key>.log.jsonl` 追加每次写入的元数据，供 list 与统计使用。
//! 写入顺序：临时快照 -> 日志行 -> rename。rename 才是提交点，日志中高于快照版本的行视为未提交。
//! 文件名由会话 id 编码而来，非 [A-Za-z0-9_-] 字符写成 %XX。

use std::collections::{BTreeMap, HashMap};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{Mutex, RwLock};

use crate::core::ConversationState;
use crate::memory::checkpoint::{
    tail, Checkpoint, CheckpointError, CheckpointMetadata, CheckpointSource, CheckpointStore,
};

/// 文件检查点存储：目录不存在时在首次写入时创建
#[derive(Debug)]
pub struct FileCheckpointStore {
    root: PathBuf,
    /// 会话 -> 已知最新版本（None 表示尚未从磁盘读取）
    locks: RwLock<HashMap<String, Arc<Mutex<Option<u64>>>>>,
}

impl FileCheckpointStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            locks: RwLock::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn snapshot_path(&self, thread_id: &str) -> PathBuf {
        self.root.join(format!("{}.json", encode_key(thread_id)))
    }

    fn log_path(&self, thread_id: &str) -> PathBuf {
        self.root.join(format!("{}.log.jsonl", encode_key(thread_id)))
    }

    async fn lock_for(&self, thread_id: &str) -> Arc<Mutex<Option<u64>>> {
        if let Some(l) = self.locks.read().await.get(thread_id) {
            return l.clone();
        }
        self.locks
            .write()
            .await
            .entry(thread_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    async fn read_snapshot(&self, thread_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let path = self.snapshot_path(thread_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(data) => Ok(Some(serde_json::from_str(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 追加一行元数据；上一次崩溃留下的半行先用换行隔开
    async fn append_log(
        &self,
        thread_id: &str,
        meta: &CheckpointMetadata,
    ) -> Result<(), CheckpointError> {
        let mut line = serde_json::to_string(meta)?;
        line.push('\n');
        let mut log = tokio::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(self.log_path(thread_id))
            .await?;
        if log.metadata().await?.len() > 0 {
            log.seek(SeekFrom::End(-1)).await?;
            let mut last = [0u8; 1];
            log.read_exact(&mut last).await?;
            if last[0] != b'\n' {
                line.insert(0, '\n');
            }
        }
        log.write_all(line.as_bytes()).await?;
        log.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn put(
        &self,
        thread_id: &str,
        state: &ConversationState,
        source: CheckpointSource,
    ) -> Result<u64, CheckpointError> {
        let lock = self.lock_for(thread_id).await;
        let mut last = lock.lock().await;
        let previous = match *last {
            Some(v) => v,
            None => self
                .read_snapshot(thread_id)
                .await?
                .map(|c| c.version)
                .unwrap_or(0),
        };
        let version = previous + 1;
        let checkpoint = Checkpoint::new(thread_id, version, source, state.clone());

        tokio::fs::create_dir_all(&self.root).await?;
        let final_path = self.snapshot_path(thread_id);
        let tmp_path = final_path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, serde_json::to_vec_pretty(&checkpoint)?).await?;

        if let Err(e) = self.append_log(thread_id, &checkpoint.metadata()).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e);
        }
        tokio::fs::rename(&tmp_path, &final_path).await?;

        *last = Some(version);
        Ok(version)
    }

    async fn get_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let lock = self.lock_for(thread_id).await;
        let _guard = lock.lock().await;
        self.read_snapshot(thread_id).await
    }

    async fn list(
        &self,
        thread_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<CheckpointMetadata>, CheckpointError> {
        let lock = self.lock_for(thread_id).await;
        let _guard = lock.lock().await;
        let data = match tokio::fs::read_to_string(self.log_path(thread_id)).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let committed = self
            .read_snapshot(thread_id)
            .await?
            .map(|c| c.version)
            .unwrap_or(0);
        // 崩溃时最后一行可能不完整，跳过无法解析的行；同一版本以最后一行为准
        let mut by_version = BTreeMap::new();
        for meta in data
            .lines()
            .filter_map(|l| serde_json::from_str::<CheckpointMetadata>(l).ok())
            .filter(|m| m.version <= committed)
        {
            by_version.insert(meta.version, meta);
        }
        let items = by_version.into_values().collect();
        Ok(tail(items, limit))
    }
}

/// 会话 id -> 文件名（可逆、无碰撞）
fn encode_key(thread_id: &str) -> String {
    let mut out = String::with_capacity(thread_id.len());
    for b in thread_id.bytes() {
        if b.is_ascii_alphanumeric() || b == b'_' || b == b'-' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    if out.is_empty() {
        out.push_str("%00");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Message;
    use tempfile::TempDir;

    #[test]
    fn test_encode_key() {
        assert_eq!(encode_key("abc-1_2"), "abc-1_2");
        assert_eq!(encode_key("a/b"), "a%2Fb");
        assert_eq!(encode_key("a.b"), "a%2Eb");
        assert_ne!(encode_key("a/b"), encode_key("a_b"));
    }

    #[tokio::test]
    async fn test_file_store_roundtrip_and_restart() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("checkpoints"));
        assert!(store.get_latest("s/1").await.unwrap().is_none());

        let mut state = ConversationState::from_messages(vec![Message::user("hi")]);
        assert_eq!(store.put("s/1", &state, CheckpointSource::Model).await.unwrap(), 1);
        state.push(Message::assistant("hello"));
        assert_eq!(store.put("s/1", &state, CheckpointSource::Model).await.unwrap(), 2);

        let latest = store.get_latest("s/1").await.unwrap().unwrap();
        assert_eq!(latest.version, 2);
        assert_eq!(latest.state, state);

        // 新实例从磁盘继续版本号
        let reopened = FileCheckpointStore::new(dir.path().join("checkpoints"));
        assert_eq!(reopened.put("s/1", &state, CheckpointSource::Tools).await.unwrap(), 3);
        let list = reopened.list("s/1", None).await.unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list[2].source, CheckpointSource::Tools);
        assert_eq!(list[1].message_count, 2);
    }

    #[tokio::test]
    async fn test_list_skips_truncated_line() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        let state = ConversationState::from_messages(vec![Message::user("hi")]);
        store.put("s", &state, CheckpointSource::Model).await.unwrap();

        let log = dir.path().join("s.log.jsonl");
        let mut data = std::fs::read_to_string(&log).unwrap();
        data.push_str("{\"version\": 2, \"sour");
        std::fs::write(&log, data).unwrap();

        assert_eq!(store.list("s", None).await.unwrap().len(), 1);

        // 下一次写入不会接在半行后面
        let v = store.put("s", &state, CheckpointSource::Tools).await.unwrap();
        assert_eq!(v, 2);
        let versions: Vec<_> = store
            .list("s", None)
            .await
            .unwrap()
            .iter()
            .map(|m| m.version)
            .collect();
        assert_eq!(versions, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_failed_log_append_commits_nothing() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        let mut state = ConversationState::from_messages(vec![Message::user("hi")]);
        assert_eq!(store.put("s", &state, CheckpointSource::Model).await.unwrap(), 1);

        let log = dir.path().join("s.log.jsonl");
        std::fs::remove_file(&log).unwrap();
        std::fs::create_dir(&log).unwrap();

        state.push(Message::assistant("hello"));
        assert!(store.put("s", &state, CheckpointSource::Model).await.is_err());
        let latest = store.get_latest("s").await.unwrap().unwrap();
        assert_eq!(latest.version, 1);
        assert_eq!(latest.state.len(), 1);
        assert!(!dir.path().join("s.json.tmp").exists());

        std::fs::remove_dir(&log).unwrap();
        assert_eq!(store.put("s", &state, CheckpointSource::Model).await.unwrap(), 2);
        assert_eq!(store.put("s", &state, CheckpointSource::Tools).await.unwrap(), 3);
        let versions: Vec<_> = store
            .list("s", None)
            .await
            .unwrap()
            .iter()
            .map(|m| m.version)
            .collect();
        assert_eq!(versions, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_list_ignores_uncommitted_log_lines() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        let state = ConversationState::from_messages(vec![Message::user("hi")]);
        store.put("s", &state, CheckpointSource::Model).await.unwrap();

        // 日志已追加、rename 未发生
        let orphan = Checkpoint::new("s", 2, CheckpointSource::Tools, state.clone());
        store.append_log("s", &orphan.metadata()).await.unwrap();
        assert_eq!(store.list("s", None).await.unwrap().len(), 1);

        assert_eq!(store.put("s", &state, CheckpointSource::Model).await.unwrap(), 2);
        let list = store.list("s", None).await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[1].source, CheckpointSource::Model);
    }
}
