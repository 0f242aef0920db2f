//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；支持 DeepSeek、OpenAI、自建代理等。
//! 工具声明以原生 function calling 发送，响应中的 tool_calls 解析回 ToolCallRequest；
//! Tool 消息以 tool 角色回传，tool_call_id 对应请求 id。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::chat::{
    ChatCompletionMessageToolCall, ChatCompletionMessageToolCalls,
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestToolMessageArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionTool, ChatCompletionTools,
    CreateChatCompletionRequestArgs, FunctionCall, FunctionObject,
};
use async_openai::Client;
use async_trait::async_trait;
use serde_json::Value;

use crate::llm::{LlmClient, LlmError};
use crate::memory::{Message, ToolCallRequest};
use crate::tools::ToolDeclaration;

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容客户端
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_default();

        let config = if let Some(url) = base_url {
            OpenAIConfig::new()
                .with_api_base(url)
                .with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            usage: TokenUsage::new(),
        }
    }

    fn to_openai_messages(
        messages: &[Message],
    ) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
        messages.iter().map(to_openai_message).collect()
    }

    fn to_openai_tools(tools: &[ToolDeclaration]) -> Vec<ChatCompletionTools> {
        tools
            .iter()
            .map(|t| {
                ChatCompletionTools::Function(ChatCompletionTool {
                    function: FunctionObject {
                        name: t.name.clone(),
                        description: Some(t.description.clone()),
                        parameters: Some(t.parameters.clone()),
                        ..Default::default()
                    },
                })
            })
            .collect()
    }
}

fn build_err(e: OpenAIError) -> LlmError {
    LlmError::Protocol(format!("request build failed: {}", e))
}

fn to_openai_message(m: &Message) -> Result<ChatCompletionRequestMessage, LlmError> {
    let msg = match m {
        Message::System { content } => ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(content.clone())
                .build()
                .map_err(build_err)?,
        ),
        Message::User { content } => ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content(content.clone())
                .build()
                .map_err(build_err)?,
        ),
        Message::Assistant {
            content,
            tool_calls,
        } => {
            let mut args = ChatCompletionRequestAssistantMessageArgs::default();
            if let Some(text) = content {
                args.content(text.clone());
            }
            if !tool_calls.is_empty() {
                let calls: Vec<ChatCompletionMessageToolCalls> = tool_calls
                    .iter()
                    .map(|c| {
                        ChatCompletionMessageToolCalls::Function(ChatCompletionMessageToolCall {
                            id: c.id.clone(),
                            function: FunctionCall {
                                name: c.name.clone(),
                                arguments: Value::Object(c.args.clone()).to_string(),
                            },
                        })
                    })
                    .collect();
                args.tool_calls(calls);
            }
            ChatCompletionRequestMessage::Assistant(args.build().map_err(build_err)?)
        }
        Message::Tool(result) => ChatCompletionRequestMessage::Tool(
            ChatCompletionRequestToolMessageArgs::default()
                .content(result.content.clone())
                .tool_call_id(result.call_id.clone())
                .build()
                .map_err(build_err)?,
        ),
    };
    Ok(msg)
}

/// 反序列化失败视为协议错误，其余（网络、API 返回错误、流中断）视为不可用
fn classify(e: OpenAIError) -> LlmError {
    match e {
        OpenAIError::JSONDeserialize(..) | OpenAIError::InvalidArgument(..) => {
            LlmError::Protocol(e.to_string())
        }
        other => LlmError::Unavailable(other.to_string()),
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDeclaration],
    ) -> Result<Message, LlmError> {
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&self.model);
        args.messages(Self::to_openai_messages(messages)?);
        if !tools.is_empty() {
            args.tools(Self::to_openai_tools(tools));
        }
        let request = args.build().map_err(build_err)?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(classify)?;

        // 提取 token 使用统计
        if let Some(usage) = &response.usage {
            self.usage.add(
                usage.prompt_tokens as u64,
                usage.completion_tokens as u64,
            );
        }

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Protocol("response has no choices".to_string()))?;

        let msg = choice.message;
        let mut calls = Vec::new();
        for tc in msg.tool_calls.unwrap_or_default() {
            if let ChatCompletionMessageToolCalls::Function(f) = tc {
                let args: Value = if f.function.arguments.trim().is_empty() {
                    Value::Object(Default::default())
                } else {
                    serde_json::from_str(&f.function.arguments).map_err(|e| {
                        LlmError::Protocol(format!(
                            "tool call '{}' has malformed arguments: {}",
                            f.function.name, e
                        ))
                    })?
                };
                calls.push(ToolCallRequest::from_json(f.id, f.function.name, args));
            }
        }

        Ok(Message::assistant_with_tool_calls(msg.content, calls))
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }
}
