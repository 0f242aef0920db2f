//! LLM 层（模型网关）：客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock / Scripted）

pub mod deepseek;
pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;
use std::time::Duration;

pub use deepseek::{create_deepseek_client, DEEPSEEK_BASE_URL, DEEPSEEK_CHAT};
pub use mock::{MockLlmClient, ScriptedLlmClient, MOCK_MODEL};
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{LlmClient, LlmError, RetryConfig, RetryingLlmClient};

use crate::config::AppConfig;

/// 按配置创建模型网关（不含重试包装）
///
/// provider = openai / deepseek 且对应 API Key 存在时使用真实端点；
/// provider = mock、未知 provider 或缺少 Key 时回退到 MockLlmClient
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    match provider.as_str() {
        "deepseek" => {
            let key = std::env::var("DEEPSEEK_API_KEY")
                .or_else(|_| std::env::var("OPENAI_API_KEY"))
                .ok();
            if let Some(key) = key {
                let model = cfg.llm.deepseek.model.clone().unwrap_or_else(|| DEEPSEEK_CHAT.to_string());
                tracing::info!("Using DeepSeek LLM ({})", model);
                return Arc::new(create_deepseek_client(
                    Some(&model),
                    cfg.llm.base_url.as_deref(),
                    Some(&key),
                ));
            }
            tracing::warn!("provider=deepseek but no DEEPSEEK_API_KEY set, using Mock LLM");
        }
        "openai" => {
            if let Ok(key) = std::env::var("OPENAI_API_KEY") {
                tracing::info!("Using OpenAI LLM ({})", cfg.llm.model);
                return Arc::new(OpenAiClient::new(
                    cfg.llm.base_url.as_deref(),
                    &cfg.llm.model,
                    Some(&key),
                ));
            }
            tracing::warn!("provider=openai but no OPENAI_API_KEY set, using Mock LLM");
        }
        "mock" => {}
        other => tracing::warn!("Unknown LLM provider '{}', using Mock LLM", other),
    }
    Arc::new(MockLlmClient)
}

/// 模型网关 + 指数退避重试（max_retries = 0 时不包装）
///
/// 每次尝试受 llm.timeouts.attempt 约束；控制循环的 llm.timeouts.request 是外层总期限
pub fn create_gateway(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let base = create_llm_from_config(cfg);
    if cfg.llm.retry.max_retries == 0 {
        return base;
    }
    Arc::new(RetryingLlmClient::new(
        base,
        RetryConfig {
            max_retries: cfg.llm.retry.max_retries,
            base_delay: Duration::from_millis(cfg.llm.retry.base_delay_ms),
            attempt_timeout: Some(Duration::from_secs(cfg.llm.timeouts.attempt)),
        },
    ))
}
