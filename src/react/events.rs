//! 控制循环过程事件：每个模型步 / 工具步各产出一个，可序列化为 JSON 供 SSE 展示

use serde::Serialize;

use crate::core::{ConversationState, LoopPhase};
use crate::memory::{Message, ToolResult};

/// 单步事件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepEvent {
    /// 模型步：追加的 Assistant 消息与之后的阶段（AwaitingTools 或 Done）
    Model {
        step: usize,
        message: Message,
        next: LoopPhase,
        checkpoint_version: u64,
    },
    /// 工具步：按请求顺序追加的结果
    Tools {
        step: usize,
        results: Vec<ToolResult>,
        checkpoint_version: u64,
    },
}

impl StepEvent {
    pub fn step(&self) -> usize {
        match self {
            StepEvent::Model { step, .. } | StepEvent::Tools { step, .. } => *step,
        }
    }

    pub fn checkpoint_version(&self) -> u64 {
        match self {
            StepEvent::Model {
                checkpoint_version, ..
            }
            | StepEvent::Tools {
                checkpoint_version, ..
            } => *checkpoint_version,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(
            self,
            StepEvent::Model {
                next: LoopPhase::Done,
                ..
            }
        )
    }

    /// 把本步追加的消息应用到状态副本上（流式消费方据此重建对话）
    pub fn apply(&self, state: &mut ConversationState) {
        match self {
            StepEvent::Model { message, .. } => state.push(message.clone()),
            StepEvent::Tools { results, .. } => {
                for r in results {
                    state.push(Message::tool_result(r.clone()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_shape() {
        let ev = StepEvent::Model {
            step: 1,
            message: Message::assistant("hi"),
            next: LoopPhase::Done,
            checkpoint_version: 3,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "model");
        assert_eq!(json["next"], "done");
        assert_eq!(json["message"]["role"], "assistant");
        assert!(ev.is_done());
    }
}
