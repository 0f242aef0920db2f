//! 时钟工具：返回本地当前时间

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::{Tool, ToolError};

pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        "get_current_time"
    }

    fn description(&self) -> &str {
        "Get the current date and time."
    }

    fn examples(&self) -> Vec<String> {
        vec!["get_current_time {}".to_string()]
    }

    async fn execute(&self, _args: Value) -> Result<String, ToolError> {
        Ok(format!(
            "Current time: {}",
            chrono::Local::now().format(TIME_FORMAT)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_format() {
        let out = CurrentTimeTool.execute(Value::Null).await.unwrap();
        let stamp = out.strip_prefix("Current time: ").unwrap();
        assert!(chrono::NaiveDateTime::parse_from_str(stamp, TIME_FORMAT).is_ok());
    }
}
