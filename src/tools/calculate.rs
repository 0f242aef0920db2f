//! 算术表达式工具（evalexpr 求值，不执行任意代码）
//!
//! 成功："Result: <expr> = <value>"；失败返回 Err，文本为 "Error calculating <expr>: <cause>"

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::tools::schema::{parameters_schema, parse_args};
use crate::tools::{Tool, ToolError};

#[derive(Deserialize, JsonSchema)]
struct CalculateArgs {
    /// 算术表达式，如 "2 + 2" 或 "(3 * 4) / 2"
    expression: String,
}

pub struct CalculateTool;

#[async_trait]
impl Tool for CalculateTool {
    fn name(&self) -> &str {
        "calculate"
    }

    fn description(&self) -> &str {
        "Calculate a mathematical expression safely."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<CalculateArgs>()
    }

    fn examples(&self) -> Vec<String> {
        vec![r#"calculate {"expression": "2 + 2"}"#.to_string()]
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let CalculateArgs { expression } = parse_args(args)?;
        match evalexpr::eval(&expression) {
            Ok(value) => Ok(format!("Result: {} = {}", expression, value)),
            Err(e) => Err(ToolError::Execution(format!(
                "Error calculating {}: {}",
                expression, e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_calculate_ok() {
        let out = CalculateTool
            .execute(json!({"expression": "2 + 2"}))
            .await
            .unwrap();
        assert_eq!(out, "Result: 2 + 2 = 4");

        let out = CalculateTool
            .execute(json!({"expression": "(3 * 4) - 5"}))
            .await
            .unwrap();
        assert_eq!(out, "Result: (3 * 4) - 5 = 7");
    }

    #[tokio::test]
    async fn test_calculate_error_text() {
        let err = CalculateTool
            .execute(json!({"expression": "invalid_expression"}))
            .await
            .unwrap_err();
        assert!(err
            .to_string()
            .starts_with("Error calculating invalid_expression: "));
    }

    #[tokio::test]
    async fn test_calculate_division() {
        let out = CalculateTool
            .execute(json!({"expression": "7 / 2"}))
            .await
            .unwrap();
        assert_eq!(out, "Result: 7 / 2 = 3");
        let out = CalculateTool
            .execute(json!({"expression": "7.0 / 2"}))
            .await
            .unwrap();
        assert_eq!(out, "Result: 7.0 / 2 = 3.5");
        assert!(CalculateTool
            .execute(json!({"expression": "1 / 0"}))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_calculate_missing_argument() {
        let err = CalculateTool.execute(json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
