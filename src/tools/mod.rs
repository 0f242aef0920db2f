//! 工具层：注册表、执行器与内置工具（get_current_time / calculate / echo）

pub mod calculate;
pub mod clock;
pub mod echo;
pub mod executor;
pub mod registry;
pub mod schema;

pub use calculate::CalculateTool;
pub use clock::CurrentTimeTool;
pub use echo::EchoTool;
pub use executor::{ToolError, ToolExecutor};
pub use registry::{Tool, ToolDeclaration, ToolRegistry};

/// 内置工具注册表：时钟、算术、回显
pub fn default_registry() -> ToolRegistry {
    let mut tools = ToolRegistry::new();
    tools.register(CurrentTimeTool);
    tools.register(CalculateTool);
    tools.register(EchoTool);
    tools
}
