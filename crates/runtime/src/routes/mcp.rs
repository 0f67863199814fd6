/// MCP over streamable HTTP: JSON-RPC 2.0 requests answered through a
/// one-shot SSE body — a `message` event with the response, then an `end`
/// event.  Requests without an `id` are notifications and produce only the
/// `end` event.
use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use memgate_memory::MemoryWriteRequest;

use crate::error::{ApiError, ApiResult};
use crate::routes::tools::memory_tools;
use crate::state::SharedState;

const PROTOCOL_VERSION: &str = "2024-11-05";

const INVALID_PARAMS: i64 = -32602;
const INTERNAL_ERROR: i64 = -32603;
const METHOD_NOT_FOUND: i64 = -32601;

#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl JsonRpcResponse {
    fn result(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn error(id: Option<Value>, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(json!({ "code": code, "message": message.into() })),
        }
    }
}

fn tool_text_result(body: Value) -> Value {
    json!({
        "content": [
            { "type": "text", "text": body.to_string() }
        ]
    })
}

pub async fn mcp(State(state): State<SharedState>, body: String) -> ApiResult<Response> {
    let request: JsonRpcRequest = serde_json::from_str(&body)
        .map_err(|err| ApiError::bad_request(format!("Invalid JSON-RPC request: {err}")))?;
    let is_notification = request.id.is_none();
    info!(method = %request.method, notification = is_notification, "mcp request");

    let response = handle_request(&state, request).await;

    let mut sse = String::new();
    if !is_notification {
        let rendered = serde_json::to_string(&response).map_err(anyhow::Error::from)?;
        sse.push_str(&format!("event: message\ndata: {rendered}\n\n"));
    }
    sse.push_str("event: end\ndata: {}\n\n");

    Ok((
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from(sse),
    )
        .into_response())
}

async fn handle_request(state: &SharedState, request: JsonRpcRequest) -> JsonRpcResponse {
    let id = request.id.clone();
    match request.method.as_str() {
        "initialize" => JsonRpcResponse::result(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "serverInfo": { "name": "Memgate Memory Server", "version": env!("CARGO_PKG_VERSION") },
                "capabilities": { "tools": {}, "resources": {} },
            }),
        ),
        "tools/list" => {
            let tools: Vec<Value> = memory_tools()
                .as_array()
                .map(|tools| {
                    tools
                        .iter()
                        .map(|tool| {
                            json!({
                                "name": tool["function"]["name"],
                                "description": tool["function"]["description"],
                                "inputSchema": tool["function"]["parameters"],
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();
            JsonRpcResponse::result(id, json!({ "tools": tools }))
        }
        "resources/list" => JsonRpcResponse::result(
            id,
            json!({
                "resources": [
                    { "uri": "memory://list", "name": "List memories", "description": "List memories, filterable by persona and kind" },
                    { "uri": "memory://get", "name": "Get memory", "description": "Fetch one memory by id" },
                    { "uri": "memory://search", "name": "Search memories", "description": "Semantic search over stored memories" },
                ]
            }),
        ),
        "tools/call" => call_tool(state, id, request.params).await,
        other => JsonRpcResponse::error(id, METHOD_NOT_FOUND, format!("Method not found: {other}")),
    }
}

async fn call_tool(state: &SharedState, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
    let params = params.unwrap_or_default();
    let Some(name) = params.get("name").and_then(|n| n.as_str()) else {
        return JsonRpcResponse::error(id, INVALID_PARAMS, "Invalid params: tool name is required");
    };
    let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

    match name {
        "save_memory" => {
            let Some(content) = arguments.get("content").and_then(|c| c.as_str()) else {
                return JsonRpcResponse::error(id, INVALID_PARAMS, "Invalid params: content is required");
            };
            let entity_id = arguments
                .get("entity_id")
                .and_then(|e| e.as_str())
                .map(String::from);
            let importance = arguments.get("importance").and_then(|i| i.as_i64()).unwrap_or(5);
            let mut metadata = Map::new();
            metadata.insert("importance".to_string(), json!(importance));

            let outcome = state
                .write_coordinator()
                .create_memory(MemoryWriteRequest {
                    id: None,
                    persona_id: state.config.persona.default_id.clone(),
                    content: content.to_string(),
                    entity_id,
                    event_time: None,
                    metadata,
                })
                .await;
            match outcome {
                Ok(record) => JsonRpcResponse::result(
                    id,
                    tool_text_result(json!({
                        "success": true,
                        "memory_id": record.id,
                        "message": "memory saved",
                    })),
                ),
                Err(err) => {
                    warn!(%err, "save_memory tool failed");
                    JsonRpcResponse::error(id, INTERNAL_ERROR, "Failed to create memory")
                }
            }
        }
        "update_memory" => {
            let memory_id = arguments.get("memory_id").and_then(|m| m.as_str());
            let new_content = arguments.get("new_content").and_then(|c| c.as_str());
            let (Some(memory_id), Some(new_content)) = (memory_id, new_content) else {
                return JsonRpcResponse::error(
                    id,
                    INVALID_PARAMS,
                    "Invalid params: memory_id and new_content are required",
                );
            };

            match state
                .write_coordinator()
                .update_memory(memory_id, Some(new_content), None)
                .await
            {
                Ok(Some(_)) => JsonRpcResponse::result(
                    id,
                    tool_text_result(json!({
                        "success": true,
                        "memory_id": memory_id,
                        "message": "memory updated",
                    })),
                ),
                Ok(None) => JsonRpcResponse::error(
                    id,
                    INTERNAL_ERROR,
                    format!("Memory not found: {memory_id}"),
                ),
                Err(err) => {
                    warn!(%err, "update_memory tool failed");
                    JsonRpcResponse::error(id, INTERNAL_ERROR, "Failed to update memory")
                }
            }
        }
        "delete_memory" => {
            let Some(memory_id) = arguments.get("memory_id").and_then(|m| m.as_str()) else {
                return JsonRpcResponse::error(id, INVALID_PARAMS, "Invalid params: memory_id is required");
            };

            match state.write_coordinator().delete_memory(memory_id).await {
                Ok(true) => JsonRpcResponse::result(
                    id,
                    tool_text_result(json!({
                        "success": true,
                        "memory_id": memory_id,
                        "message": "memory deleted",
                    })),
                ),
                Ok(false) => JsonRpcResponse::error(
                    id,
                    INTERNAL_ERROR,
                    format!("Memory not found: {memory_id}"),
                ),
                Err(err) => {
                    warn!(%err, "delete_memory tool failed");
                    JsonRpcResponse::error(id, INTERNAL_ERROR, "Failed to delete memory")
                }
            }
        }
        "search_memories" => {
            let Some(query) = arguments.get("query").and_then(|q| q.as_str()) else {
                return JsonRpcResponse::error(id, INVALID_PARAMS, "Invalid params: query is required");
            };

            let engine = state.retrieval_engine().await;
            let top_k = state.vector_top_k().await;
            let results = engine
                .retrieve(query, &state.config.persona.default_id, top_k)
                .await;
            let count = results.len();
            JsonRpcResponse::result(
                id,
                tool_text_result(json!({
                    "success": true,
                    "results": results,
                    "count": count,
                })),
            )
        }
        other => JsonRpcResponse::error(id, METHOD_NOT_FOUND, format!("Tool not found: {other}")),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_without_id_is_a_notification() {
        let request: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc": "2.0", "method": "initialize"}"#).unwrap();
        assert!(request.id.is_none());

        let request: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc": "2.0", "id": 7, "method": "tools/list"}"#).unwrap();
        assert_eq!(request.id, Some(json!(7)));
    }

    #[test]
    fn responses_serialize_without_null_fields() {
        let ok = serde_json::to_value(JsonRpcResponse::result(Some(json!(1)), json!({"x": 1}))).unwrap();
        assert!(ok.get("error").is_none());
        assert_eq!(ok["jsonrpc"], "2.0");

        let err = serde_json::to_value(JsonRpcResponse::error(None, METHOD_NOT_FOUND, "nope")).unwrap();
        assert!(err.get("result").is_none());
        assert!(err.get("id").is_none());
        assert_eq!(err["error"]["code"], METHOD_NOT_FOUND);
    }
}
