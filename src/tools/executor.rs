//! 工具执行器
//!
//! 持有 ToolRegistry 与单次调用超时。invoke 在独立任务中执行工具：
//! 未知工具、参数错误、工具返回错误、超时、panic 都转成 success=false 的 ToolResult，从不向循环抛出。
//! 工具任务由 AbortOnDropHandle 持有：超时或调用方放弃（取消）时任务随之终止。
//! 每次调用输出一条结构化审计日志（JSON）。

use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use thiserror::Error;
use tokio::time::timeout;
use tokio_util::task::AbortOnDropHandle;

use crate::memory::{ToolCallRequest, ToolResult};
use crate::tools::{ToolDeclaration, ToolRegistry};

/// 工具失败原因（只在带内出现，渲染为 ToolResult.content）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    NotFound(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// 工具自身给出的失败文本，原样交给模型
    #[error("{0}")]
    Execution(String),

    /// 超时（毫秒）
    #[error("Tool timed out after {0}ms")]
    Timeout(u64),

    #[error("Tool panicked: {0}")]
    Panicked(String),
}

impl ToolError {
    fn outcome(&self) -> &'static str {
        match self {
            ToolError::NotFound(_) => "not_found",
            ToolError::InvalidArguments(_) => "invalid_arguments",
            ToolError::Execution(_) => "error",
            ToolError::Timeout(_) => "timeout",
            ToolError::Panicked(_) => "panic",
        }
    }
}

/// 工具执行器：对每次调用施加超时并隔离 panic
#[derive(Clone)]
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
    parallel: bool,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry: Arc::new(registry),
            timeout: Duration::from_secs(timeout_secs),
            parallel: false,
        }
    }

    /// 同一条 Assistant 消息内的多个调用并发执行（结果仍按请求顺序返回）
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        self.registry.declarations()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    /// 执行单个调用，总是返回 ToolResult
    pub async fn invoke(&self, call: &ToolCallRequest) -> ToolResult {
        let start = Instant::now();
        let args = serde_json::Value::Object(call.args.clone());
        let args_preview = args_preview(&args);

        let result = match self.registry.get(&call.name) {
            None => Err(ToolError::NotFound(call.name.clone())),
            Some(tool) => {
                let handle = AbortOnDropHandle::new(tokio::spawn(async move {
                    tool.execute(args).await
                }));
                match timeout(self.timeout, handle).await {
                    Ok(Ok(r)) => r,
                    Ok(Err(join_err)) if join_err.is_panic() => {
                        Err(ToolError::Panicked(panic_message(join_err.into_panic())))
                    }
                    Ok(Err(join_err)) => Err(ToolError::Execution(join_err.to_string())),
                    Err(_) => Err(ToolError::Timeout(self.timeout.as_millis() as u64)),
                }
            }
        };

        let (ok, outcome) = match &result {
            Ok(_) => (true, "ok"),
            Err(e) => (false, e.outcome()),
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": call.name,
            "call_id": call.id,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(content) => ToolResult::ok(call, content),
            Err(e) => {
                tracing::warn!(tool = %call.name, call_id = %call.id, "tool failed: {}", e);
                ToolResult::failed(call, e.to_string())
            }
        }
    }

    /// 执行全部调用，结果顺序与请求顺序一致
    pub async fn invoke_all(&self, calls: &[ToolCallRequest]) -> Vec<ToolResult> {
        if self.parallel {
            return join_all(calls.iter().map(|c| self.invoke(c))).await;
        }
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            results.push(self.invoke(call).await);
        }
        results
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
