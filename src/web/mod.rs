//! HTTP 外观层（axum）
//!
//! 对话、流式对话（SSE）、健康检查、工具信息与会话查询；
//! 校验失败返回 422 {detail: [...]}，轮次级错误返回 500 {detail}，未知会话返回 404。

pub mod handlers;
pub mod models;

use std::sync::Arc;

use axum::{
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use crate::agent::ChatAgent;

pub use models::{
    validate_chat_request, ChatRequest, ChatResponse, HealthResponse, StreamChunk, ToolInfo,
    ToolsInfoResponse,
};

/// 服务版本（/health 与 / 返回）
pub const API_VERSION: &str = env!("CARGO_PKG_VERSION");

/// 共享状态
pub struct AppState {
    pub agent: ChatAgent,
}

pub type ApiError = (StatusCode, Json<Value>);

pub(crate) fn api_error(status: StatusCode, detail: impl Into<Value>) -> ApiError {
    (status, Json(json!({ "detail": detail.into() })))
}

/// 构建路由
pub fn router(agent: ChatAgent) -> Router {
    let state = Arc::new(AppState { agent });
    Router::new()
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health))
        .route("/chat", post(handlers::chat))
        .route("/chat/modern", post(handlers::chat))
        .route("/chat/stream", post(handlers::chat_stream))
        .route("/chat/stream/modern", post(handlers::chat_stream))
        .route("/tools/info", get(handlers::tools_info))
        .route("/session/:session_id/stats", get(handlers::session_stats))
        .route("/session/:session_id/history", get(handlers::session_history))
        .with_state(state)
}
