//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Mock / Scripted）实现 LlmClient：
//! 给定有序历史与可用工具声明，返回一条 Assistant 消息（可携带零或多个工具调用请求）。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::memory::Message;
use crate::tools::ToolDeclaration;

/// 模型网关错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    /// 上游不可达、限流、5xx 等，可重试
    #[error("LLM unavailable: {0}")]
    Unavailable(String),

    /// 响应无法解析或不符合约定，不重试
    #[error("LLM protocol error: {0}")]
    Protocol(String),

    /// 超时（毫秒）
    #[error("LLM request timed out after {0}ms")]
    Timeout(u64),
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, LlmError::Unavailable(_) | LlmError::Timeout(_))
    }
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成：返回的消息必须是 Assistant
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDeclaration],
    ) -> Result<Message, LlmError>;

    /// 模型标识（出现在对话回复的 metadata 中）
    fn model_name(&self) -> &str;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

/// 重试配置：第 n 次重试前等待 base_delay * 2^(n-1)
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    /// 单次尝试的超时；超时按 Timeout 处理并参与重试
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(200),
            attempt_timeout: None,
        }
    }
}

impl RetryConfig {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// 带指数退避的重试包装：仅对 Unavailable / Timeout 重试，协议错误直接返回
pub struct RetryingLlmClient {
    inner: Arc<dyn LlmClient>,
    config: RetryConfig,
}

impl RetryingLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl LlmClient for RetryingLlmClient {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDeclaration],
    ) -> Result<Message, LlmError> {
        let mut attempt = 0u32;
        loop {
            let result = match self.config.attempt_timeout {
                Some(limit) => tokio::time::timeout(limit, self.inner.complete(messages, tools))
                    .await
                    .unwrap_or_else(|_| Err(LlmError::Timeout(limit.as_millis() as u64))),
                None => self.inner.complete(messages, tools).await,
            };
            match result {
                Ok(msg) => return Ok(msg),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = self.config.delay_for(attempt);
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "LLM call failed, retrying: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.inner.token_usage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            attempt_timeout: None,
        }
    }

    /// 第一次调用挂起，之后立即返回
    struct HangsOnce {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmClient for HangsOnce {
        async fn complete(
            &self,
            _messages: &[Message],
            _tools: &[ToolDeclaration],
        ) -> Result<Message, LlmError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            Ok(Message::assistant("second try"))
        }

        fn model_name(&self) -> &str {
            "hangs-once"
        }
    }

    #[test]
    fn test_delay_doubles() {
        let cfg = RetryConfig {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            attempt_timeout: None,
        };
        assert_eq!(cfg.delay_for(1), Duration::from_millis(100));
        assert_eq!(cfg.delay_for(2), Duration::from_millis(200));
        assert_eq!(cfg.delay_for(3), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_retries_unavailable_then_succeeds() {
        let scripted = Arc::new(ScriptedLlmClient::new(vec![
            Err(LlmError::Unavailable("503".into())),
            Err(LlmError::Timeout(1)),
            Ok(Message::assistant("ok")),
        ]));
        let client = RetryingLlmClient::new(scripted.clone(), fast());
        let msg = client.complete(&[Message::user("hi")], &[]).await.unwrap();
        assert_eq!(msg.text(), Some("ok"));
        assert_eq!(scripted.call_count(), 3);
    }

    #[tokio::test]
    async fn test_slow_attempt_times_out_and_is_retried() {
        let inner = Arc::new(HangsOnce {
            calls: AtomicUsize::new(0),
        });
        let client = RetryingLlmClient::new(
            inner.clone(),
            RetryConfig {
                attempt_timeout: Some(Duration::from_millis(50)),
                ..fast()
            },
        );
        let msg = tokio::time::timeout(
            Duration::from_secs(5),
            client.complete(&[Message::user("hi")], &[]),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(msg.text(), Some("second try"));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_attempt_timeout_reported_in_millis() {
        let inner = Arc::new(HangsOnce {
            calls: AtomicUsize::new(0),
        });
        let client = RetryingLlmClient::new(
            inner,
            RetryConfig {
                max_retries: 0,
                attempt_timeout: Some(Duration::from_millis(20)),
                ..fast()
            },
        );
        let err = client.complete(&[], &[]).await.unwrap_err();
        assert_eq!(err, LlmError::Timeout(20));
        assert!(err.to_string().ends_with("20ms"));
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let scripted = Arc::new(ScriptedLlmClient::new(vec![
            Err(LlmError::Unavailable("a".into())),
            Err(LlmError::Unavailable("b".into())),
            Err(LlmError::Unavailable("c".into())),
            Ok(Message::assistant("never")),
        ]));
        let client = RetryingLlmClient::new(scripted.clone(), fast());
        let err = client.complete(&[], &[]).await.unwrap_err();
        assert_eq!(err, LlmError::Unavailable("c".into()));
        assert_eq!(scripted.call_count(), 3);
    }

    #[tokio::test]
    async fn test_protocol_error_not_retried() {
        let scripted = Arc::new(ScriptedLlmClient::new(vec![
            Err(LlmError::Protocol("garbage".into())),
            Ok(Message::assistant("never")),
        ]));
        let client = RetryingLlmClient::new(scripted.clone(), fast());
        assert!(matches!(
            client.complete(&[], &[]).await,
            Err(LlmError::Protocol(_))
        ));
        assert_eq!(scripted.call_count(), 1);
    }
}
