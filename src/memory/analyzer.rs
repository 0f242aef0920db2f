//! 对话历史分析：按角色计数、工具使用次数与失败次数
//!
//! 供会话统计接口使用；只读消息，不依赖检查点后端。

use std::collections::BTreeMap;

use serde::Serialize;

use crate::memory::{Message, Role};

/// 单个工具的调用统计
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ToolUsage {
    pub requested: usize,
    pub failed: usize,
}

/// 消息历史分析结果
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct HistoryAnalysis {
    pub total_messages: usize,
    pub user_messages: usize,
    pub assistant_messages: usize,
    pub system_messages: usize,
    pub tool_messages: usize,
    /// 工具名 -> 统计（按名称排序，输出稳定）
    pub tool_usage: BTreeMap<String, ToolUsage>,
}

impl HistoryAnalysis {
    pub fn failed_tool_results(&self) -> usize {
        self.tool_usage.values().map(|u| u.failed).sum()
    }
}

pub fn analyze_messages(messages: &[Message]) -> HistoryAnalysis {
    let mut a = HistoryAnalysis {
        total_messages: messages.len(),
        ..Default::default()
    };
    for m in messages {
        match m.role() {
            Role::User => a.user_messages += 1,
            Role::Assistant => a.assistant_messages += 1,
            Role::System => a.system_messages += 1,
            Role::Tool => a.tool_messages += 1,
        }
        for call in m.tool_calls() {
            a.tool_usage.entry(call.name.clone()).or_default().requested += 1;
        }
        if let Some(r) = m.as_tool_result() {
            if !r.success {
                a.tool_usage.entry(r.name.clone()).or_default().failed += 1;
            }
        }
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{ToolCallRequest, ToolResult};

    #[test]
    fn test_analyze_counts_roles_and_tools() {
        let calc = ToolCallRequest::from_json("1", "calculate", serde_json::json!({"expression": "x"}));
        let ghost = ToolCallRequest::from_json("2", "ghost", serde_json::json!({}));
        let messages = vec![
            Message::user("Calculate x"),
            Message::assistant_with_tool_calls(None, vec![calc.clone(), ghost.clone()]),
            Message::tool_result(ToolResult::failed(&calc, "Error calculating x: unbound")),
            Message::tool_result(ToolResult::failed(&ghost, "not found")),
            Message::assistant("Sorry"),
        ];
        let a = analyze_messages(&messages);
        assert_eq!(a.total_messages, 5);
        assert_eq!(a.user_messages, 1);
        assert_eq!(a.assistant_messages, 2);
        assert_eq!(a.tool_messages, 2);
        assert_eq!(a.tool_usage["calculate"], ToolUsage { requested: 1, failed: 1 });
        assert_eq!(a.failed_tool_results(), 2);
    }

    #[test]
    fn test_analyze_empty() {
        assert_eq!(analyze_messages(&[]), HistoryAnalysis::default());
    }
}
