//! 消息模型：User / Assistant / System / Tool 四种变体
//!
//! 消息创建后不可变；在对话中的顺序即因果顺序，只允许追加。
//! Assistant 消息可以不带文本、只携带若干工具调用请求；Tool 消息回答其中一个请求。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }
}

/// 模型发起的一次工具调用请求；id 在所属 Assistant 消息内唯一，用于匹配结果
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, args: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            args,
        }
    }

    /// 从任意 JSON 构造参数；非对象参数视为空映射
    pub fn from_json(id: impl Into<String>, name: impl Into<String>, args: Value) -> Self {
        let args = match args {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self::new(id, name, args)
    }
}

/// 工具执行结果：回答的请求 id、工具名、结果文本、是否成功
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub name: String,
    pub content: String,
    pub success: bool,
}

impl ToolResult {
    pub fn ok(call: &ToolCallRequest, content: impl Into<String>) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            content: content.into(),
            success: true,
        }
    }

    pub fn failed(call: &ToolCallRequest, content: impl Into<String>) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            content: content.into(),
            success: false,
        }
    }
}

/// 单条消息，按 role 打标签序列化
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    User {
        content: String,
    },
    Assistant {
        #[serde(default)]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCallRequest>,
    },
    System {
        content: String,
    },
    Tool(ToolResult),
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn assistant_with_tool_calls(
        content: Option<String>,
        tool_calls: Vec<ToolCallRequest>,
    ) -> Self {
        Message::Assistant {
            content,
            tool_calls,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            content: content.into(),
        }
    }

    pub fn tool_result(result: ToolResult) -> Self {
        Message::Tool(result)
    }

    pub fn role(&self) -> Role {
        match self {
            Message::User { .. } => Role::User,
            Message::Assistant { .. } => Role::Assistant,
            Message::System { .. } => Role::System,
            Message::Tool(_) => Role::Tool,
        }
    }

    /// 文本内容；只发起工具调用的 Assistant 消息返回 None
    pub fn text(&self) -> Option<&str> {
        match self {
            Message::User { content } | Message::System { content } => Some(content),
            Message::Assistant { content, .. } => content.as_deref(),
            Message::Tool(r) => Some(&r.content),
        }
    }

    /// Assistant 消息携带的工具调用请求；其它角色为空
    pub fn tool_calls(&self) -> &[ToolCallRequest] {
        match self {
            Message::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls().is_empty()
    }

    pub fn as_tool_result(&self) -> Option<&ToolResult> {
        match self {
            Message::Tool(r) => Some(r),
            _ => None,
        }
    }
}
