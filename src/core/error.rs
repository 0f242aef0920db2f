//! 轮次级错误
//!
//! 这里的错误都会终止当前轮次并原样交给调用方；工具失败不在其中，
//! 它们在执行器里被转换成 success=false 的 ToolResult，循环继续。

use thiserror::Error;

use crate::llm::LlmError;
use crate::memory::CheckpointError;

/// 终止当前轮次的错误（模型不可用、协议错误、检查点写入失败、步数超限等）
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Model protocol error: {0}")]
    ModelProtocol(String),

    #[error("Checkpoint write failed: {0}")]
    CheckpointWrite(String),

    #[error("Checkpoint read failed: {0}")]
    CheckpointRead(String),

    /// 模型与工具交替次数超过上限
    #[error("Step limit exceeded: {0} steps without a final answer")]
    StepLimitExceeded(usize),

    #[error("Invalid conversation state: {0}")]
    InvalidState(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    Config(String),
}

impl From<LlmError> for AgentError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Protocol(msg) => AgentError::ModelProtocol(msg),
            other => AgentError::ModelUnavailable(other.to_string()),
        }
    }
}

impl AgentError {
    /// 检查点写入路径上的存储错误
    pub fn checkpoint_write(err: CheckpointError) -> Self {
        AgentError::CheckpointWrite(err.to_string())
    }

    pub fn checkpoint_read(err: CheckpointError) -> Self {
        AgentError::CheckpointRead(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_error_mapping() {
        let e: AgentError = LlmError::Protocol("bad json".into()).into();
        assert!(matches!(e, AgentError::ModelProtocol(_)));

        let e: AgentError = LlmError::Unavailable("connection refused".into()).into();
        assert!(matches!(e, AgentError::ModelUnavailable(_)));

        let e: AgentError = LlmError::Timeout(60_000).into();
        match e {
            AgentError::ModelUnavailable(msg) => assert!(msg.contains("60000ms")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_checkpoint_error_direction() {
        let e = AgentError::checkpoint_write(CheckpointError::Storage("disk full".into()));
        assert!(e.to_string().contains("disk full"));
        assert!(matches!(e, AgentError::CheckpointWrite(_)));
    }
}
