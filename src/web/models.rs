//! HTTP 请求 / 响应模型与请求校验

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::{ChatReply, ReplyMetadata};

/// 会话 id 最大长度
pub const MAX_SESSION_ID_LEN: usize = 128;

/// POST /chat、/chat/stream 请求体
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl ChatRequest {
    /// 调用方给出的会话 id；缺省或为空时生成新的
    pub fn session_id_or_new(&self) -> String {
        self.session_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(String::from)
            .unwrap_or_else(crate::agent::new_session_id)
    }
}

/// 请求校验（纯函数）：返回全部违规说明，空表示合法
pub fn validate_chat_request(req: &ChatRequest) -> Vec<String> {
    let mut violations = Vec::new();
    if req.message.trim().is_empty() {
        violations.push("message: must not be empty".to_string());
    }
    if let Some(id) = &req.session_id {
        if id.chars().count() > MAX_SESSION_ID_LEN {
            violations.push(format!(
                "session_id: must be at most {} characters",
                MAX_SESSION_ID_LEN
            ));
        }
        if id.chars().any(char::is_control) {
            violations.push("session_id: must not contain control characters".to_string());
        }
    }
    violations
}

/// POST /chat 响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub session_id: String,
    pub tools_used: Vec<String>,
    pub timestamp: String,
    pub metadata: ReplyMetadata,
}

impl From<ChatReply> for ChatResponse {
    fn from(r: ChatReply) -> Self {
        Self {
            response: r.response,
            session_id: r.session_id,
            tools_used: r.tools_used,
            timestamp: r.metadata.timestamp.clone(),
            metadata: r.metadata,
        }
    }
}

/// SSE 单个数据块
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamChunk {
    /// agent / tools / end
    pub chunk_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub examples: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsInfoResponse {
    pub tools: Vec<ToolInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(message: &str, session_id: Option<&str>) -> ChatRequest {
        ChatRequest {
            message: message.to_string(),
            session_id: session_id.map(String::from),
        }
    }

    #[test]
    fn test_validate_ok() {
        assert!(validate_chat_request(&req("hi", None)).is_empty());
        assert!(validate_chat_request(&req("hi", Some("abc-123"))).is_empty());
    }

    #[test]
    fn test_validate_collects_all_violations() {
        let long = "x".repeat(MAX_SESSION_ID_LEN + 1);
        assert_eq!(validate_chat_request(&req("  ", Some(&long))).len(), 2);
        assert_eq!(validate_chat_request(&req("hi", Some("a\nb"))).len(), 1);
    }

    #[test]
    fn test_session_id_or_new() {
        assert_eq!(req("hi", Some("s1")).session_id_or_new(), "s1");
        let generated = req("hi", Some("")).session_id_or_new();
        assert!(uuid::Uuid::parse_str(&generated).is_ok());
    }
}
