//! 核心层：轮次错误、对话状态、循环阶段与状态校验

pub mod error;
pub mod state;

pub use error::AgentError;
pub use state::{validate, ConversationState, LoopPhase, StateViolation};
