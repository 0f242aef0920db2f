//! 对话门面（Chat Façade）
//!
//! 供终端与 HTTP 前端调用：把一句用户输入并入会话的最新检查点，驱动控制循环到 Done，
//! 提取最终回复与用过的工具名。流式版本按步产出事件，最后以一个结束元素收尾。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::{AgentError, ConversationState};
use crate::llm::create_gateway;
use crate::memory::{analyze_messages, create_checkpoint_store, Message, ToolResult, ToolUsage};
use crate::react::{ControlLoop, StepEvent};
use crate::tools::{default_registry, ToolDeclaration, ToolExecutor};

/// 新一轮开始时仍未执行的工具调用，以此文本补一个失败结果
pub const ABANDONED_TOOL_CALL: &str = "tool call abandoned before execution";

/// 生成新的会话 id（uuid v4）
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyMetadata {
    /// RFC 3339
    pub timestamp: String,
    pub model: String,
}

/// 单轮对话结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub response: String,
    pub session_id: String,
    /// 会话中出现过的工具名（去重，按首次使用顺序）
    pub tools_used: Vec<String>,
    pub metadata: ReplyMetadata,
}

/// 流式对话的元素：每步一个 Step，最后是 End 或 Failed 之一
#[derive(Debug)]
pub enum ChatChunk {
    Step(StepEvent),
    End(ChatReply),
    Failed(AgentError),
}

/// 会话统计
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStats {
    pub session_id: String,
    pub message_count: usize,
    pub user_messages: usize,
    pub assistant_messages: usize,
    pub tool_messages: usize,
    pub tools_used: Vec<String>,
    pub tool_usage: BTreeMap<String, ToolUsage>,
    pub failed_tool_results: usize,
    pub checkpoint_count: usize,
    pub latest_version: u64,
    pub first_message_time: Option<String>,
    pub last_message_time: Option<String>,
    /// 首个与最近检查点之间的秒数
    pub session_duration: f64,
}

/// 对话门面：持有控制循环，可跨会话共享
#[derive(Clone)]
pub struct ChatAgent {
    control: ControlLoop,
    system_prompt: Option<String>,
}

impl ChatAgent {
    pub fn new(control: ControlLoop) -> Self {
        Self {
            control,
            system_prompt: None,
        }
    }

    /// 新会话的第一条消息（System）
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// 按配置构建：模型网关（含重试）、内置工具、执行器、检查点存储、控制循环
    pub async fn from_config(cfg: &AppConfig) -> Result<Self, AgentError> {
        if cfg.agent.max_steps == 0 {
            return Err(AgentError::Config("agent.max_steps must be at least 1".to_string()));
        }
        let llm = create_gateway(cfg);
        let executor = ToolExecutor::new(default_registry(), cfg.tools.tool_timeout_secs)
            .with_parallel(cfg.tools.parallel);
        let store = create_checkpoint_store(&cfg.checkpoint).await;
        let control = ControlLoop::new(llm, executor, store)
            .with_max_steps(cfg.agent.max_steps)
            .with_model_timeout(Duration::from_secs(cfg.llm.timeouts.request));

        let agent = Self::new(control);
        Ok(match cfg.agent.system_prompt.as_deref() {
            Some(p) if !p.trim().is_empty() => agent.with_system_prompt(p),
            _ => agent,
        })
    }

    pub fn control_loop(&self) -> &ControlLoop {
        &self.control
    }

    pub fn model_name(&self) -> &str {
        self.control.llm().model_name()
    }

    pub fn tool_declarations(&self) -> Vec<ToolDeclaration> {
        self.control.executor().declarations()
    }

    /// 单轮对话：跑到 Done 并返回最终回复
    pub async fn chat(&self, user_text: &str, session_id: &str) -> Result<ChatReply, AgentError> {
        self.chat_with_cancel(user_text, session_id, CancellationToken::new())
            .await
    }

    pub async fn chat_with_cancel(
        &self,
        user_text: &str,
        session_id: &str,
        cancel: CancellationToken,
    ) -> Result<ChatReply, AgentError> {
        let state = self.prepare(session_id, user_text).await?;
        tracing::info!(session_id = %session_id, messages = state.len(), "chat turn");
        let outcome = self.control.run(session_id, state, cancel).await?;
        Ok(self.reply(session_id, &outcome.state))
    }

    /// 流式对话：惰性、有限；每次调用都从最新检查点重新开始
    pub async fn chat_stream(
        &self,
        user_text: &str,
        session_id: &str,
        cancel: CancellationToken,
    ) -> Result<BoxStream<'static, ChatChunk>, AgentError> {
        let state = self.prepare(session_id, user_text).await?;
        tracing::info!(session_id = %session_id, messages = state.len(), "chat stream turn");
        let events = self.control.steps(session_id, state.clone(), cancel);

        struct Cursor {
            agent: ChatAgent,
            session_id: String,
            state: ConversationState,
            events: BoxStream<'static, Result<StepEvent, AgentError>>,
            finished: bool,
        }

        let start = Cursor {
            agent: self.clone(),
            session_id: session_id.to_string(),
            state,
            events,
            finished: false,
        };

        Ok(stream::unfold(start, |mut c| async move {
            if c.finished {
                return None;
            }
            match c.events.next().await {
                Some(Ok(ev)) => {
                    ev.apply(&mut c.state);
                    Some((ChatChunk::Step(ev), c))
                }
                Some(Err(e)) => {
                    c.finished = true;
                    Some((ChatChunk::Failed(e), c))
                }
                None => {
                    c.finished = true;
                    let reply = c.agent.reply(&c.session_id, &c.state);
                    Some((ChatChunk::End(reply), c))
                }
            }
        })
        .boxed())
    }

    /// 从最新检查点继续一轮被中断的执行；已是 Done 时直接返回
    pub async fn resume(&self, session_id: &str) -> Result<ChatReply, AgentError> {
        let state = self
            .history(session_id)
            .await?
            .ok_or_else(|| AgentError::InvalidState(format!("unknown session {session_id}")))?;
        let outcome = self
            .control
            .run(session_id, state, CancellationToken::new())
            .await?;
        Ok(self.reply(session_id, &outcome.state))
    }

    /// 会话最新持久化的对话；未知会话为 None
    pub async fn history(&self, session_id: &str) -> Result<Option<ConversationState>, AgentError> {
        let latest = self
            .control
            .store()
            .get_latest(session_id)
            .await
            .map_err(AgentError::checkpoint_read)?;
        Ok(latest.map(|c| c.state))
    }

    pub async fn session_stats(&self, session_id: &str) -> Result<Option<SessionStats>, AgentError> {
        let store = self.control.store();
        let Some(latest) = store
            .get_latest(session_id)
            .await
            .map_err(AgentError::checkpoint_read)?
        else {
            return Ok(None);
        };
        let checkpoints = store
            .list(session_id, None)
            .await
            .map_err(AgentError::checkpoint_read)?;

        let analysis = analyze_messages(latest.state.messages());
        let first = checkpoints.first().map(|m| m.created_at.clone());
        let last = checkpoints.last().map(|m| m.created_at.clone());
        let session_duration = match (&first, &last) {
            (Some(a), Some(b)) => seconds_between(a, b),
            _ => 0.0,
        };

        Ok(Some(SessionStats {
            session_id: session_id.to_string(),
            message_count: analysis.total_messages,
            user_messages: analysis.user_messages,
            assistant_messages: analysis.assistant_messages,
            tool_messages: analysis.tool_messages,
            tools_used: latest.state.tools_used(),
            failed_tool_results: analysis.failed_tool_results(),
            tool_usage: analysis.tool_usage,
            checkpoint_count: checkpoints.len(),
            latest_version: latest.version,
            first_message_time: first,
            last_message_time: last,
            session_duration,
        }))
    }

    /// 最新检查点并入本轮用户输入；悬空的工具调用先以失败结果关闭
    async fn prepare(
        &self,
        session_id: &str,
        user_text: &str,
    ) -> Result<ConversationState, AgentError> {
        let mut state = match self.history(session_id).await? {
            Some(state) => state,
            None => {
                let mut state = ConversationState::new();
                if let Some(prompt) = &self.system_prompt {
                    state.push(Message::system(prompt.clone()));
                }
                state
            }
        };

        let pending = state.pending_tool_calls();
        if !pending.is_empty() {
            tracing::warn!(
                session_id = %session_id,
                pending = pending.len(),
                "closing tool calls left pending by an interrupted turn"
            );
            for call in &pending {
                state.push(Message::tool_result(ToolResult::failed(
                    call,
                    ABANDONED_TOOL_CALL,
                )));
            }
        }

        state.push(Message::user(user_text));
        Ok(state)
    }

    fn reply(&self, session_id: &str, state: &ConversationState) -> ChatReply {
        let response = state
            .last_assistant()
            .and_then(|m| m.text())
            .unwrap_or_default()
            .to_string();
        ChatReply {
            response,
            session_id: session_id.to_string(),
            tools_used: state.tools_used(),
            metadata: ReplyMetadata {
                timestamp: chrono::Utc::now().to_rfc3339(),
                model: self.model_name().to_string(),
            },
        }
    }
}

/// 创建只用内置工具与指定网关的门面（测试与嵌入场景）
pub fn agent_with(
    llm: Arc<dyn crate::llm::LlmClient>,
    store: Arc<dyn crate::memory::CheckpointStore>,
) -> ChatAgent {
    ChatAgent::new(ControlLoop::new(
        llm,
        ToolExecutor::new(default_registry(), 30),
        store,
    ))
}

fn seconds_between(a: &str, b: &str) -> f64 {
    match (
        chrono::DateTime::parse_from_rfc3339(a),
        chrono::DateTime::parse_from_rfc3339(b),
    ) {
        (Ok(a), Ok(b)) => (b - a).num_milliseconds() as f64 / 1000.0,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockLlmClient, ScriptedLlmClient};
    use crate::memory::{CheckpointSource, CheckpointStore, MemoryCheckpointStore, ToolCallRequest};
    use serde_json::json;

    #[tokio::test]
    async fn test_chat_with_mock() {
        let agent = agent_with(Arc::new(MockLlmClient), Arc::new(MemoryCheckpointStore::new()));
        let reply = agent.chat("Calculate 2 + 2", "s1").await.unwrap();
        assert_eq!(reply.response, "Result: 2 + 2 = 4");
        assert_eq!(reply.tools_used, vec!["calculate"]);
        assert_eq!(reply.session_id, "s1");
        assert_eq!(reply.metadata.model, "mock");
    }

    #[tokio::test]
    async fn test_pending_calls_closed_before_new_input() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let call = ToolCallRequest::from_json("c1", "echo", json!({"message": "x"}));
        let interrupted = ConversationState::from_messages(vec![
            Message::user("echo x"),
            Message::assistant_with_tool_calls(None, vec![call]),
        ]);
        store
            .put("s", &interrupted, CheckpointSource::Model)
            .await
            .unwrap();

        let llm = Arc::new(ScriptedLlmClient::new(vec![Ok(Message::assistant("fine"))]));
        let agent = agent_with(llm.clone(), store.clone());
        let reply = agent.chat("never mind", "s").await.unwrap();
        assert_eq!(reply.response, "fine");

        let seen = &llm.histories()[0];
        let closed = seen[2].as_tool_result().unwrap();
        assert_eq!(closed.call_id, "c1");
        assert!(!closed.success);
        assert_eq!(closed.content, ABANDONED_TOOL_CALL);
        assert_eq!(seen[3], Message::user("never mind"));
    }

    #[tokio::test]
    async fn test_system_prompt_only_for_new_sessions() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![
            Ok(Message::assistant("one")),
            Ok(Message::assistant("two")),
        ]));
        let agent = agent_with(llm.clone(), Arc::new(MemoryCheckpointStore::new()))
            .with_system_prompt("be brief");
        agent.chat("a", "s").await.unwrap();
        agent.chat("b", "s").await.unwrap();

        let second = &llm.histories()[1];
        assert_eq!(second[0], Message::system("be brief"));
        assert_eq!(
            second.iter().filter(|m| matches!(m, Message::System { .. })).count(),
            1
        );
    }

    #[tokio::test]
    async fn test_session_stats() {
        let agent = agent_with(Arc::new(MockLlmClient), Arc::new(MemoryCheckpointStore::new()));
        assert!(agent.session_stats("nope").await.unwrap().is_none());

        agent.chat("Calculate 2 + 2", "s").await.unwrap();
        let stats = agent.session_stats("s").await.unwrap().unwrap();
        assert_eq!(stats.message_count, 4);
        assert_eq!(stats.checkpoint_count, 3);
        assert_eq!(stats.latest_version, 3);
        assert_eq!(stats.tools_used, vec!["calculate"]);
        assert_eq!(stats.failed_tool_results, 0);
        assert!(stats.session_duration >= 0.0);
    }

    #[tokio::test]
    async fn test_resume_unknown_session() {
        let agent = agent_with(Arc::new(MockLlmClient), Arc::new(MemoryCheckpointStore::new()));
        assert!(matches!(
            agent.resume("ghost").await,
            Err(AgentError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_from_config_rejects_zero_steps() {
        let mut cfg = AppConfig::default();
        cfg.agent.max_steps = 0;
        assert!(matches!(
            ChatAgent::from_config(&cfg).await,
            Err(AgentError::Config(_))
        ));

        cfg.agent.max_steps = 5;
        let agent = ChatAgent::from_config(&cfg).await.unwrap();
        assert_eq!(agent.control_loop().max_steps(), 5);
    }

    #[test]
    fn test_seconds_between() {
        let d = seconds_between("2024-01-01T10:00:00Z", "2024-01-01T10:02:00.500Z");
        assert!((d - 120.5).abs() < 1e-9);
    }
}
