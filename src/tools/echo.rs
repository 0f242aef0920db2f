//! Echo 工具：原样回显，带 "Echo: " 前缀

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::tools::schema::{parameters_schema, parse_args};
use crate::tools::{Tool, ToolError};

#[derive(Deserialize, JsonSchema)]
struct EchoArgs {
    /// 要回显的消息
    message: String,
}

pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo back the input message."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<EchoArgs>()
    }

    fn examples(&self) -> Vec<String> {
        vec![r#"echo {"message": "hello"}"#.to_string()]
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let args: EchoArgs = parse_args(args)?;
        Ok(format!("Echo: {}", args.message))
    }
}
