//! Mock LLM 客户端（用于测试与本地演示，无需 API）
//!
//! - MockLlmClient：按关键词决定是否请求工具（time / calculate / echo），
//!   看到工具结果后把结果文本作为最终回答
//! - ScriptedLlmClient：按队列依次返回预设响应，并记录每次看到的历史

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::llm::{LlmClient, LlmError};
use crate::memory::{Message, ToolCallRequest};
use crate::tools::ToolDeclaration;

pub const MOCK_MODEL: &str = "mock";

/// Mock 客户端：关键词驱动的工具调用
#[derive(Debug, Default)]
pub struct MockLlmClient;

impl MockLlmClient {
    pub fn new() -> Self {
        Self
    }

    fn plan(text: &str, tools: &[ToolDeclaration]) -> Option<ToolCallRequest> {
        let has = |name: &str| tools.iter().any(|t| t.name == name);
        // ASCII 小写不改变字节偏移，可直接用下标切原文
        let lower = text.to_ascii_lowercase();

        if let Some(pos) = lower.find("calculate") {
            if has("calculate") {
                let expr = text[pos + "calculate".len()..]
                    .trim()
                    .trim_end_matches('?')
                    .trim();
                if !expr.is_empty() {
                    return Some(new_call("calculate", json!({ "expression": expr })));
                }
            }
        }
        if let Some(pos) = lower.find("echo") {
            if has("echo") {
                let message = text[pos + "echo".len()..].trim().trim_start_matches(':').trim();
                return Some(new_call("echo", json!({ "message": message })));
            }
        }
        if lower.contains("time") && has("get_current_time") {
            return Some(new_call("get_current_time", json!({})));
        }
        None
    }
}

fn new_call(name: &str, args: serde_json::Value) -> ToolCallRequest {
    ToolCallRequest::from_json(format!("call_{}", uuid::Uuid::new_v4().simple()), name, args)
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDeclaration],
    ) -> Result<Message, LlmError> {
        // 尾部是工具结果：汇总后给出最终回答
        let results: Vec<&str> = messages
            .iter()
            .rev()
            .map_while(|m| m.as_tool_result())
            .map(|r| r.content.as_str())
            .collect();
        if !results.is_empty() {
            let mut texts = results;
            texts.reverse();
            return Ok(Message::assistant(texts.join("\n")));
        }

        let last_user = messages
            .iter()
            .rev()
            .find_map(|m| match m {
                Message::User { content } => Some(content.as_str()),
                _ => None,
            })
            .unwrap_or("(no input)");

        match Self::plan(last_user, tools) {
            Some(call) => Ok(Message::assistant_with_tool_calls(None, vec![call])),
            None => Ok(Message::assistant(format!(
                "I received your message: {}",
                last_user
            ))),
        }
    }

    fn model_name(&self) -> &str {
        MOCK_MODEL
    }
}

/// 脚本客户端：依次弹出预设响应；队列耗尽时返回协议错误
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<Result<Message, LlmError>>>,
    seen: Mutex<Vec<Vec<Message>>>,
    delay: Option<Duration>,
}

impl ScriptedLlmClient {
    pub fn new(responses: Vec<Result<Message, LlmError>>) -> Self {
        Self {
            script: Mutex::new(responses.into()),
            seen: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// 每次调用前先等待（用于取消 / 超时场景）
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push(&self, response: Result<Message, LlmError>) {
        if let Ok(mut q) = self.script.lock() {
            q.push_back(response);
        }
    }

    /// 每次调用时看到的完整历史
    pub fn histories(&self) -> Vec<Vec<Message>> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.seen.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(
        &self,
        messages: &[Message],
        _tools: &[ToolDeclaration],
    ) -> Result<Message, LlmError> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(messages.to_vec());
        }
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        let next = self
            .script
            .lock()
            .map_err(|e| LlmError::Unavailable(e.to_string()))?
            .pop_front();
        next.unwrap_or_else(|| Err(LlmError::Protocol("script exhausted".to_string())))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}
