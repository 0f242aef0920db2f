//! 控制循环主体
//!
//! AwaitingModel -> 调用模型，追加 Assistant 消息，写检查点 -> AwaitingTools 或 Done；
//! AwaitingTools -> 按请求顺序执行全部工具调用，追加结果，写检查点 -> AwaitingModel。
//! 模型失败、检查点写入失败、超出步数、取消都会终止本轮；工具失败只在带内出现。

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, BoxStream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, ConversationState, LoopPhase};
use crate::llm::{LlmClient, LlmError};
use crate::memory::{CheckpointSource, CheckpointStore, Message};
use crate::react::StepEvent;
use crate::tools::ToolExecutor;

/// 单轮对话内最大步数（模型步 + 工具步），防止死循环
pub const MAX_STEPS: usize = 25;
/// 模型调用默认超时（秒）
const DEFAULT_MODEL_TIMEOUT_SECS: u64 = 60;

/// 一轮执行到 Done 的结果
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// 终止的 Assistant 消息
    pub final_message: Message,
    pub state: ConversationState,
    /// 本轮执行的步数（= 本轮写入的检查点数）
    pub steps: usize,
}

impl TurnOutcome {
    pub fn final_text(&self) -> String {
        self.final_message.text().unwrap_or_default().to_string()
    }
}

/// 控制循环：持有模型网关、工具执行器与检查点存储，可跨会话共享
#[derive(Clone)]
pub struct ControlLoop {
    llm: Arc<dyn LlmClient>,
    executor: ToolExecutor,
    store: Arc<dyn CheckpointStore>,
    max_steps: usize,
    model_timeout: Duration,
}

impl ControlLoop {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        executor: ToolExecutor,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            llm,
            executor,
            store,
            max_steps: MAX_STEPS,
            model_timeout: Duration::from_secs(DEFAULT_MODEL_TIMEOUT_SECS),
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_model_timeout(mut self, timeout: Duration) -> Self {
        self.model_timeout = timeout;
        self
    }

    pub fn llm(&self) -> &Arc<dyn LlmClient> {
        &self.llm
    }

    pub fn executor(&self) -> &ToolExecutor {
        &self.executor
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// 执行当前阶段对应的一步；Done 状态下调用返回 InvalidState
    pub async fn step(
        &self,
        session_id: &str,
        state: &mut ConversationState,
        step: usize,
        cancel: &CancellationToken,
    ) -> Result<StepEvent, AgentError> {
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        match state.phase() {
            LoopPhase::AwaitingModel => self.model_step(session_id, state, step, cancel).await,
            LoopPhase::AwaitingTools => self.tool_step(session_id, state, step, cancel).await,
            LoopPhase::Done => Err(AgentError::InvalidState(
                "conversation already ends with a final answer".to_string(),
            )),
        }
    }

    async fn model_step(
        &self,
        session_id: &str,
        state: &mut ConversationState,
        step: usize,
        cancel: &CancellationToken,
    ) -> Result<StepEvent, AgentError> {
        let declarations = self.executor.declarations();
        let call = tokio::time::timeout(
            self.model_timeout,
            self.llm.complete(state.messages(), &declarations),
        );
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            r = call => match r {
                Ok(r) => r?,
                Err(_) => {
                    return Err(LlmError::Timeout(self.model_timeout.as_millis() as u64).into())
                }
            },
        };
        let message = normalize_assistant(response)?;

        state.push(message.clone());
        let version = self
            .store
            .put(session_id, state, CheckpointSource::Model)
            .await
            .map_err(AgentError::checkpoint_write)?;
        let next = state.phase();
        tracing::info!(
            session_id = %session_id,
            step,
            version,
            tool_calls = message.tool_calls().len(),
            next = ?next,
            "model step"
        );

        Ok(StepEvent::Model {
            step,
            message,
            next,
            checkpoint_version: version,
        })
    }

    async fn tool_step(
        &self,
        session_id: &str,
        state: &mut ConversationState,
        step: usize,
        cancel: &CancellationToken,
    ) -> Result<StepEvent, AgentError> {
        let pending = state.pending_tool_calls();
        let results = tokio::select! {
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            r = self.executor.invoke_all(&pending) => r,
        };

        for r in &results {
            state.push(Message::tool_result(r.clone()));
        }
        let version = self
            .store
            .put(session_id, state, CheckpointSource::Tools)
            .await
            .map_err(AgentError::checkpoint_write)?;
        let failed = results.iter().filter(|r| !r.success).count();
        tracing::info!(
            session_id = %session_id,
            step,
            version,
            results = results.len(),
            failed,
            "tool step"
        );

        Ok(StepEvent::Tools {
            step,
            results,
            checkpoint_version: version,
        })
    }

    /// 从 state 当前阶段跑到 Done
    pub async fn run(
        &self,
        session_id: &str,
        mut state: ConversationState,
        cancel: CancellationToken,
    ) -> Result<TurnOutcome, AgentError> {
        check_state(&state)?;
        let mut steps = 0usize;
        while state.phase() != LoopPhase::Done {
            if steps >= self.max_steps {
                tracing::warn!(session_id = %session_id, steps, "step limit exceeded");
                return Err(AgentError::StepLimitExceeded(self.max_steps));
            }
            steps += 1;
            if let Err(e) = self.step(session_id, &mut state, steps, &cancel).await {
                tracing::warn!(session_id = %session_id, step = steps, "turn aborted: {}", e);
                return Err(e);
            }
        }
        finish(state, steps)
    }

    /// 惰性、有限的步事件流：每步一个元素，Done 或第一个错误之后结束
    pub fn steps(
        &self,
        session_id: &str,
        state: ConversationState,
        cancel: CancellationToken,
    ) -> BoxStream<'static, Result<StepEvent, AgentError>> {
        struct Cursor {
            lp: ControlLoop,
            session_id: String,
            state: ConversationState,
            cancel: CancellationToken,
            steps: usize,
            finished: bool,
        }

        let start = Cursor {
            lp: self.clone(),
            session_id: session_id.to_string(),
            state,
            cancel,
            steps: 0,
            finished: false,
        };

        stream::unfold(start, |mut c| async move {
            if c.finished {
                return None;
            }
            if c.steps == 0 {
                if let Err(e) = check_state(&c.state) {
                    c.finished = true;
                    return Some((Err(e), c));
                }
            }
            if c.state.phase() == LoopPhase::Done {
                return None;
            }
            if c.steps >= c.lp.max_steps {
                c.finished = true;
                tracing::warn!(session_id = %c.session_id, steps = c.steps, "step limit exceeded");
                return Some((Err(AgentError::StepLimitExceeded(c.lp.max_steps)), c));
            }
            c.steps += 1;
            let result = c
                .lp
                .step(&c.session_id, &mut c.state, c.steps, &c.cancel)
                .await;
            match &result {
                Ok(ev) if ev.is_done() => c.finished = true,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(session_id = %c.session_id, step = c.steps, "turn aborted: {}", e);
                    c.finished = true;
                }
            }
            Some((result, c))
        })
        .boxed()
    }
}

fn check_state(state: &ConversationState) -> Result<(), AgentError> {
    state.validate().map_err(|violations| {
        AgentError::InvalidState(
            violations
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join("; "),
        )
    })
}

fn finish(state: ConversationState, steps: usize) -> Result<TurnOutcome, AgentError> {
    let final_message = state
        .last_assistant()
        .cloned()
        .ok_or_else(|| AgentError::InvalidState("no assistant message".to_string()))?;
    Ok(TurnOutcome {
        final_message,
        state,
        steps,
    })
}

/// 校验模型响应：必须是 Assistant；空 id 补为 call_<uuid>；同一消息内 id 重复视为协议错误
fn normalize_assistant(message: Message) -> Result<Message, AgentError> {
    let (content, mut tool_calls) = match message {
        Message::Assistant {
            content,
            tool_calls,
        } => (content, tool_calls),
        other => {
            return Err(AgentError::ModelProtocol(format!(
                "expected assistant message, got {}",
                other.role().as_str()
            )))
        }
    };

    let mut seen = HashSet::new();
    for call in tool_calls.iter_mut() {
        if call.id.trim().is_empty() {
            call.id = format!("call_{}", uuid::Uuid::new_v4().simple());
        }
        if !seen.insert(call.id.clone()) {
            return Err(AgentError::ModelProtocol(format!(
                "duplicate tool call id {}",
                call.id
            )));
        }
        if call.name.trim().is_empty() {
            return Err(AgentError::ModelProtocol(
                "tool call without a tool name".to_string(),
            ));
        }
    }

    Ok(Message::Assistant {
        content,
        tool_calls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;
    use crate::memory::{MemoryCheckpointStore, ToolCallRequest};
    use crate::tools::default_registry;
    use serde_json::json;

    fn lp(script: Vec<Result<Message, LlmError>>) -> (ControlLoop, Arc<MemoryCheckpointStore>) {
        let store = Arc::new(MemoryCheckpointStore::new());
        let lp = ControlLoop::new(
            Arc::new(ScriptedLlmClient::new(script)),
            ToolExecutor::new(default_registry(), 5),
            store.clone(),
        );
        (lp, store)
    }

    #[test]
    fn test_normalize_fills_empty_ids() {
        let msg = Message::assistant_with_tool_calls(
            None,
            vec![
                ToolCallRequest::from_json("", "echo", json!({})),
                ToolCallRequest::from_json("", "echo", json!({})),
            ],
        );
        let msg = normalize_assistant(msg).unwrap();
        let ids: Vec<_> = msg.tool_calls().iter().map(|c| c.id.clone()).collect();
        assert!(ids.iter().all(|id| id.starts_with("call_")));
        assert_ne!(ids[0], ids[1]);
    }

    #[test]
    fn test_normalize_rejects_duplicates_and_non_assistant() {
        let msg = Message::assistant_with_tool_calls(
            None,
            vec![
                ToolCallRequest::from_json("x", "echo", json!({})),
                ToolCallRequest::from_json("x", "echo", json!({})),
            ],
        );
        assert!(matches!(
            normalize_assistant(msg),
            Err(AgentError::ModelProtocol(_))
        ));
        assert!(matches!(
            normalize_assistant(Message::user("hi")),
            Err(AgentError::ModelProtocol(_))
        ));
    }

    #[tokio::test]
    async fn test_step_on_done_state_is_invalid() {
        let (lp, _) = lp(vec![]);
        let mut state =
            ConversationState::from_messages(vec![Message::user("a"), Message::assistant("b")]);
        let err = lp
            .step("s", &mut state, 1, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_empty_tool_list_with_empty_text_is_terminal() {
        let (lp, store) = lp(vec![Ok(Message::assistant_with_tool_calls(
            Some(String::new()),
            vec![],
        ))]);
        let state = ConversationState::from_messages(vec![Message::user("hi")]);
        let out = lp.run("s", state, CancellationToken::new()).await.unwrap();
        assert_eq!(out.steps, 1);
        assert_eq!(out.final_text(), "");
        assert_eq!(store.list("s", None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_model_timeout_is_unavailable() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let llm = ScriptedLlmClient::new(vec![Ok(Message::assistant("late"))])
            .with_delay(Duration::from_millis(500));
        let lp = ControlLoop::new(
            Arc::new(llm),
            ToolExecutor::new(default_registry(), 5),
            store.clone(),
        )
        .with_model_timeout(Duration::from_millis(20));
        let state = ConversationState::from_messages(vec![Message::user("hi")]);
        let err = lp.run("s", state, CancellationToken::new()).await.unwrap_err();
        match err {
            AgentError::ModelUnavailable(msg) => assert!(msg.contains("20ms")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(store.get_latest("s").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_input_state_rejected() {
        let (lp, _) = lp(vec![]);
        let call = ToolCallRequest::from_json("c1", "echo", json!({}));
        let state = ConversationState::from_messages(vec![
            Message::user("hi"),
            Message::assistant_with_tool_calls(None, vec![call]),
            Message::user("again"),
        ]);
        let err = lp.run("s", state, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidState(_)));
    }
}
