//! agentloop - 工具调用控制循环
//!
//! 模块划分：
//! - **agent**: 对话门面（会话合并、驱动循环、提取回复与工具名）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 轮次级错误、对话状态、循环阶段与状态校验
//! - **llm**: 模型网关抽象与实现（OpenAI 兼容 / DeepSeek / Mock / Scripted）
//! - **memory**: 消息模型、检查点存储（内存 / 文件 / SQLite）、历史分析
//! - **observability**: 日志初始化
//! - **react**: 控制循环与步事件
//! - **tools**: 工具注册表、执行器与内置工具
//! - **web**: HTTP 外观层（feature `web`）

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;
#[cfg(feature = "web")]
pub mod web;

pub use agent::{ChatAgent, ChatChunk, ChatReply};
pub use core::{AgentError, ConversationState, LoopPhase};
pub use react::{ControlLoop, StepEvent, TurnOutcome};
