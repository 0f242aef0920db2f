//! 对话状态与循环阶段
//!
//! ConversationState 是纯数据记录（有序消息列表，只追加），由控制循环独占修改，每步之后写入检查点。
//! 循环阶段不单独存储，而是由消息尾部推导：任何检查点都可以直接恢复执行。
//! validate 是纯函数：输入候选消息序列，输出合法或违规列表。

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::memory::{Message, ToolCallRequest};

/// 控制循环所处阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    /// 等待模型给出下一步（初始阶段；最后一条是 User / Tool / System 或为空）
    AwaitingModel,
    /// 最近的 Assistant 消息仍有未回答的工具调用
    AwaitingTools,
    /// 最近一条是不带工具调用的 Assistant 消息（终态）
    Done,
}

/// 一次对话的完整状态快照
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    messages: Vec<Message>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// 由尾部推导当前阶段
    pub fn phase(&self) -> LoopPhase {
        match self.last_assistant_index() {
            Some(idx) => {
                let assistant = &self.messages[idx];
                let answered = self.messages[idx + 1..]
                    .iter()
                    .take_while(|m| m.as_tool_result().is_some())
                    .count();
                let trailing = self.messages.len() - idx - 1;
                if !assistant.has_tool_calls() {
                    if trailing == 0 {
                        LoopPhase::Done
                    } else {
                        LoopPhase::AwaitingModel
                    }
                } else if answered < assistant.tool_calls().len() && answered == trailing {
                    LoopPhase::AwaitingTools
                } else {
                    LoopPhase::AwaitingModel
                }
            }
            None => LoopPhase::AwaitingModel,
        }
    }

    pub fn last_assistant(&self) -> Option<&Message> {
        self.last_assistant_index().map(|i| &self.messages[i])
    }

    fn last_assistant_index(&self) -> Option<usize> {
        self.messages
            .iter()
            .rposition(|m| matches!(m, Message::Assistant { .. }))
    }

    /// 最近 Assistant 消息中尚未得到结果的工具调用（按请求顺序）
    pub fn pending_tool_calls(&self) -> Vec<ToolCallRequest> {
        let Some(idx) = self.last_assistant_index() else {
            return Vec::new();
        };
        let answered: HashSet<&str> = self.messages[idx + 1..]
            .iter()
            .filter_map(|m| m.as_tool_result())
            .map(|r| r.call_id.as_str())
            .collect();
        self.messages[idx]
            .tool_calls()
            .iter()
            .filter(|c| !answered.contains(c.id.as_str()))
            .cloned()
            .collect()
    }

    /// 所有工具调用请求中出现过的工具名（去重，按首次出现顺序）
    pub fn tools_used(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for call in self.messages.iter().flat_map(|m| m.tool_calls()) {
            if !names.iter().any(|n| n == &call.name) {
                names.push(call.name.clone());
            }
        }
        names
    }

    pub fn validate(&self) -> Result<(), Vec<StateViolation>> {
        validate(&self.messages)
    }
}

/// 状态不变量违规项
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StateViolation {
    /// 工具调用 id 为空
    EmptyToolCallId { index: usize },
    /// 同一 Assistant 消息内 id 重复
    DuplicateToolCallId { index: usize, call_id: String },
    /// Tool 结果前面没有可回答的 Assistant 请求
    OrphanToolResult { index: usize, call_id: String },
    /// Tool 结果与请求顺序不一致
    OutOfOrderToolResult {
        index: usize,
        expected: String,
        found: String,
    },
    /// 请求尚未全部回答时出现了其它消息
    UnansweredToolCalls { index: usize, pending: Vec<String> },
}

impl std::fmt::Display for StateViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateViolation::EmptyToolCallId { index } => {
                write!(f, "message {index}: tool call with empty id")
            }
            StateViolation::DuplicateToolCallId { index, call_id } => {
                write!(f, "message {index}: duplicate tool call id {call_id}")
            }
            StateViolation::OrphanToolResult { index, call_id } => {
                write!(f, "message {index}: tool result {call_id} answers no pending request")
            }
            StateViolation::OutOfOrderToolResult {
                index,
                expected,
                found,
            } => write!(
                f,
                "message {index}: expected result for {expected}, found {found}"
            ),
            StateViolation::UnansweredToolCalls { index, pending } => write!(
                f,
                "message {index}: tool calls still pending: {}",
                pending.join(", ")
            ),
        }
    }
}

/// 校验消息序列是否满足工具调用 / 结果配对不变量。
///
/// 末尾允许存在未回答的请求（AwaitingTools），中间不允许。
pub fn validate(messages: &[Message]) -> Result<(), Vec<StateViolation>> {
    let mut violations = Vec::new();
    // 当前 Assistant 消息尚待回答的请求 id（按顺序）
    let mut pending: Vec<String> = Vec::new();

    for (index, msg) in messages.iter().enumerate() {
        match msg {
            Message::Tool(result) => match pending.first() {
                Some(expected) if expected == &result.call_id => {
                    pending.remove(0);
                }
                Some(expected) => {
                    if pending.iter().any(|id| id == &result.call_id) {
                        violations.push(StateViolation::OutOfOrderToolResult {
                            index,
                            expected: expected.clone(),
                            found: result.call_id.clone(),
                        });
                        pending.retain(|id| id != &result.call_id);
                    } else {
                        violations.push(StateViolation::OrphanToolResult {
                            index,
                            call_id: result.call_id.clone(),
                        });
                    }
                }
                None => violations.push(StateViolation::OrphanToolResult {
                    index,
                    call_id: result.call_id.clone(),
                }),
            },
            other => {
                if !pending.is_empty() {
                    violations.push(StateViolation::UnansweredToolCalls {
                        index,
                        pending: std::mem::take(&mut pending),
                    });
                }
                let mut seen: HashSet<&str> = HashSet::new();
                for call in other.tool_calls() {
                    if call.id.is_empty() {
                        violations.push(StateViolation::EmptyToolCallId { index });
                    } else if !seen.insert(call.id.as_str()) {
                        violations.push(StateViolation::DuplicateToolCallId {
                            index,
                            call_id: call.id.clone(),
                        });
                    } else {
                        pending.push(call.id.clone());
                    }
                }
            }
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ToolResult;

    fn call(id: &str, name: &str) -> ToolCallRequest {
        ToolCallRequest::from_json(id, name, serde_json::json!({}))
    }

    #[test]
    fn test_phase_progression() {
        let mut state = ConversationState::new();
        assert_eq!(state.phase(), LoopPhase::AwaitingModel);

        state.push(Message::user("Calculate 2 + 2"));
        assert_eq!(state.phase(), LoopPhase::AwaitingModel);

        let a = call("c1", "calculate");
        let b = call("c2", "echo");
        state.push(Message::assistant_with_tool_calls(None, vec![a.clone(), b.clone()]));
        assert_eq!(state.phase(), LoopPhase::AwaitingTools);
        assert_eq!(state.pending_tool_calls().len(), 2);

        state.push(Message::tool_result(ToolResult::ok(&a, "4")));
        assert_eq!(state.phase(), LoopPhase::AwaitingTools);
        assert_eq!(state.pending_tool_calls(), vec![b.clone()]);

        state.push(Message::tool_result(ToolResult::ok(&b, "Echo: x")));
        assert_eq!(state.phase(), LoopPhase::AwaitingModel);

        state.push(Message::assistant("The answer is 4"));
        assert_eq!(state.phase(), LoopPhase::Done);
        assert!(state.validate().is_ok());
    }

    #[test]
    fn test_empty_assistant_without_calls_is_terminal() {
        let state = ConversationState::from_messages(vec![
            Message::user("hi"),
            Message::assistant_with_tool_calls(None, Vec::new()),
        ]);
        assert_eq!(state.phase(), LoopPhase::Done);
    }

    #[test]
    fn test_tools_used_keeps_first_use_order() {
        let state = ConversationState::from_messages(vec![
            Message::user("x"),
            Message::assistant_with_tool_calls(None, vec![call("1", "echo"), call("2", "calculate")]),
            Message::tool_result(ToolResult::ok(&call("1", "echo"), "a")),
            Message::tool_result(ToolResult::ok(&call("2", "calculate"), "b")),
            Message::assistant_with_tool_calls(None, vec![call("3", "echo")]),
        ]);
        assert_eq!(state.tools_used(), vec!["echo", "calculate"]);
    }

    #[test]
    fn test_validate_reports_orphan_and_unanswered() {
        let messages = vec![
            Message::tool_result(ToolResult::ok(&call("x", "echo"), "a")),
            Message::assistant_with_tool_calls(None, vec![call("1", "echo")]),
            Message::user("interrupt"),
        ];
        let violations = validate(&messages).unwrap_err();
        assert_eq!(violations.len(), 2);
        assert!(matches!(violations[0], StateViolation::OrphanToolResult { index: 0, .. }));
        assert!(matches!(violations[1], StateViolation::UnansweredToolCalls { index: 2, .. }));
    }

    #[test]
    fn test_validate_rejects_out_of_order_and_duplicates() {
        let messages = vec![
            Message::assistant_with_tool_calls(None, vec![call("1", "echo"), call("2", "echo")]),
            Message::tool_result(ToolResult::ok(&call("2", "echo"), "b")),
            Message::tool_result(ToolResult::ok(&call("1", "echo"), "a")),
            Message::assistant_with_tool_calls(None, vec![call("3", "echo"), call("3", "echo")]),
        ];
        let violations = validate(&messages).unwrap_err();
        assert!(violations
            .iter()
            .any(|v| matches!(v, StateViolation::OutOfOrderToolResult { index: 1, .. })));
        assert!(violations
            .iter()
            .any(|v| matches!(v, StateViolation::DuplicateToolCallId { index: 3, .. })));
    }

    #[test]
    fn test_pending_calls_allowed_at_tail() {
        let messages = vec![
            Message::user("go"),
            Message::assistant_with_tool_calls(None, vec![call("1", "echo")]),
        ];
        assert!(validate(&messages).is_ok());
    }
}
