//! 路由处理函数

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures_util::{Stream, StreamExt};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::agent::{ChatChunk, SessionStats};
use crate::react::StepEvent;
use crate::web::models::{
    validate_chat_request, ChatRequest, ChatResponse, HealthResponse, StreamChunk, ToolInfo,
    ToolsInfoResponse,
};
use crate::web::{api_error, ApiError, AppState, API_VERSION};

/// GET /：接口索引
pub async fn index() -> Json<Value> {
    Json(json!({
        "message": "agentloop API",
        "version": API_VERSION,
        "endpoints": {
            "health": "GET /health",
            "chat": "POST /chat",
            "chat_modern": "POST /chat/modern",
            "chat_stream": "POST /chat/stream",
            "chat_stream_modern": "POST /chat/stream/modern",
            "tools_info": "GET /tools/info",
            "session_stats": "GET /session/{session_id}/stats",
            "session_history": "GET /session/{session_id}/history",
        }
    }))
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        version: API_VERSION.to_string(),
    })
}

fn check(req: &ChatRequest) -> Result<(), ApiError> {
    let violations = validate_chat_request(req);
    if violations.is_empty() {
        Ok(())
    } else {
        Err(api_error(StatusCode::UNPROCESSABLE_ENTITY, violations))
    }
}

/// POST /chat、/chat/modern
pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    check(&req)?;
    let session_id = req.session_id_or_new();
    let reply = state
        .agent
        .chat(&req.message, &session_id)
        .await
        .map_err(|e| {
            tracing::warn!(session_id = %session_id, "chat failed: {}", e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;
    Ok(Json(reply.into()))
}

/// POST /chat/stream、/chat/stream/modern：每步一个 SSE 事件，最后一个 chunk_type=end
pub async fn chat_stream(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    check(&req)?;
    let session_id = req.session_id_or_new();
    let cancel = CancellationToken::new();
    let chunks = state
        .agent
        .chat_stream(&req.message, &session_id, cancel.clone())
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    // 客户端断开时流被丢弃，guard 随之取消本轮
    let guard = cancel.drop_guard();
    let events = chunks.map(move |chunk| {
        let _keep = &guard;
        let data = serde_json::to_string(&to_stream_chunk(&session_id, chunk))
            .unwrap_or_else(|_| r#"{"chunk_type":"end"}"#.to_string());
        Ok(Event::default().data(data))
    });

    Ok(Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(std::time::Duration::from_secs(15))
            .text("keepalive"),
    ))
}

/// 门面流元素 -> SSE 数据块
pub fn to_stream_chunk(session_id: &str, chunk: ChatChunk) -> StreamChunk {
    match chunk {
        ChatChunk::Step(StepEvent::Model {
            step,
            message,
            checkpoint_version,
            ..
        }) => StreamChunk {
            chunk_type: "agent".to_string(),
            content: message.text().filter(|t| !t.is_empty()).map(String::from),
            metadata: Some(json!({
                "step": step,
                "checkpoint_version": checkpoint_version,
                "tool_calls": message
                    .tool_calls()
                    .iter()
                    .map(|c| c.name.as_str())
                    .collect::<Vec<_>>(),
            })),
        },
        ChatChunk::Step(StepEvent::Tools {
            step,
            results,
            checkpoint_version,
        }) => StreamChunk {
            chunk_type: "tools".to_string(),
            content: Some(
                results
                    .iter()
                    .map(|r| r.content.as_str())
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
            metadata: Some(json!({
                "step": step,
                "checkpoint_version": checkpoint_version,
                "results": results
                    .iter()
                    .map(|r| json!({ "name": r.name, "success": r.success }))
                    .collect::<Vec<_>>(),
            })),
        },
        ChatChunk::End(reply) => StreamChunk {
            chunk_type: "end".to_string(),
            content: None,
            metadata: Some(json!({
                "session_id": reply.session_id,
                "tools_used": reply.tools_used,
            })),
        },
        ChatChunk::Failed(e) => {
            tracing::warn!(session_id = %session_id, "chat stream failed: {}", e);
            StreamChunk {
                chunk_type: "end".to_string(),
                content: None,
                metadata: Some(json!({
                    "session_id": session_id,
                    "error": e.to_string(),
                })),
            }
        }
    }
}

/// GET /tools/info
pub async fn tools_info(State(state): State<Arc<AppState>>) -> Json<ToolsInfoResponse> {
    let tools = state
        .agent
        .control_loop()
        .executor()
        .registry()
        .tools()
        .map(|t| ToolInfo {
            name: t.name().to_string(),
            description: t.description().to_string(),
            parameters: t.parameters_schema(),
            examples: t.examples(),
        })
        .collect();
    Json(ToolsInfoResponse { tools })
}

/// GET /session/:session_id/stats
pub async fn session_stats(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionStats>, ApiError> {
    match state.agent.session_stats(&session_id).await {
        Ok(Some(stats)) => Ok(Json(stats)),
        Ok(None) => Err(api_error(
            StatusCode::NOT_FOUND,
            format!("session {session_id} not found"),
        )),
        Err(e) => Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

/// GET /session/:session_id/history
pub async fn session_history(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    match state.agent.history(&session_id).await {
        Ok(Some(conversation)) => Ok(Json(json!({
            "session_id": session_id,
            "phase": conversation.phase(),
            "messages": conversation.messages(),
        }))),
        Ok(None) => Err(api_error(
            StatusCode::NOT_FOUND,
            format!("session {session_id} not found"),
        )),
        Err(e) => Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{AgentError, LoopPhase};
    use crate::memory::{Message, ToolCallRequest, ToolResult};

    #[test]
    fn test_chunk_mapping() {
        let call = ToolCallRequest::from_json("c1", "echo", json!({"message": "x"}));
        let model = ChatChunk::Step(StepEvent::Model {
            step: 1,
            message: Message::assistant_with_tool_calls(None, vec![call.clone()]),
            next: LoopPhase::AwaitingTools,
            checkpoint_version: 1,
        });
        let c = to_stream_chunk("s", model);
        assert_eq!(c.chunk_type, "agent");
        assert!(c.content.is_none());
        assert_eq!(c.metadata.unwrap()["tool_calls"][0], "echo");

        let tools = ChatChunk::Step(StepEvent::Tools {
            step: 2,
            results: vec![ToolResult::ok(&call, "Echo: x")],
            checkpoint_version: 2,
        });
        let c = to_stream_chunk("s", tools);
        assert_eq!(c.chunk_type, "tools");
        assert_eq!(c.content.as_deref(), Some("Echo: x"));

        let failed = to_stream_chunk("s", ChatChunk::Failed(AgentError::StepLimitExceeded(3)));
        assert_eq!(failed.chunk_type, "end");
        assert!(failed.metadata.unwrap()["error"]
            .as_str()
            .unwrap()
            .contains("Step limit"));
    }
}
