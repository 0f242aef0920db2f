//! DeepSeek API 客户端（OpenAI 兼容格式，支持 function calling）
//!
//! - Base URL: https://api.deepseek.com
//! - 模型: deepseek-chat（支持工具调用）；deepseek-reasoner 不支持工具，不作为默认

use crate::llm::OpenAiClient;

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";

/// 创建 DeepSeek 客户端
///
/// - api_key 为空时读取环境变量 `DEEPSEEK_API_KEY`
/// - model 为空时读取 `DEEPSEEK_MODEL`，再退回 deepseek-chat
/// - base_url 为空时使用官方端点
pub fn create_deepseek_client(
    model: Option<&str>,
    base_url: Option<&str>,
    api_key: Option<&str>,
) -> OpenAiClient {
    let api_key = api_key
        .map(String::from)
        .or_else(|| std::env::var("DEEPSEEK_API_KEY").ok())
        .unwrap_or_default();

    let model = model
        .map(String::from)
        .or_else(|| std::env::var("DEEPSEEK_MODEL").ok())
        .unwrap_or_else(|| DEEPSEEK_CHAT.to_string());

    OpenAiClient::new(
        Some(base_url.unwrap_or(DEEPSEEK_BASE_URL)),
        &model,
        Some(api_key.as_str()),
    )
}
