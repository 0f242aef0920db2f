//! 控制循环：模型步与工具步交替，直到出现不带工具调用的 Assistant 消息

pub mod events;
pub mod loop_;

pub use events::StepEvent;
pub use loop_::{ControlLoop, TurnOutcome, MAX_STEPS};
