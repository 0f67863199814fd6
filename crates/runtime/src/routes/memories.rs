/// Memory CRUD and semantic search.
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value};

use memgate_memory::{MemoryRecord, MemoryWriteRequest, ScoredMemory, parse_event_time};

use crate::error::{ApiError, ApiResult};
use crate::state::SharedState;

const DEFAULT_LIST_LIMIT: usize = 100;
const MAX_LIST_LIMIT: usize = 1000;

#[derive(Debug, Deserialize)]
pub struct MemoryCreateRequest {
    /// Caller-supplied id makes creation idempotent.
    #[serde(default)]
    pub id: Option<String>,
    pub persona_id: String,
    pub content: String,
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub event_time: Option<String>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
pub struct MemoryUpdateRequest {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
pub struct MemoryListQuery {
    #[serde(default)]
    pub persona_id: Option<String>,
    /// Memory kind filter (currently only "long_term" exists).
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct MemorySearchRequest {
    pub query: String,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub persona_id: Option<String>,
    /// Legacy carrier: `{"persona_id": "..."}`.
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

impl MemorySearchRequest {
    fn persona(&self) -> Option<String> {
        self.persona_id.clone().or_else(|| {
            self.metadata
                .as_ref()
                .and_then(|m| m.get("persona_id"))
                .and_then(|v| v.as_str())
                .map(String::from)
        })
    }
}

pub async fn create(
    State(state): State<SharedState>,
    Json(request): Json<MemoryCreateRequest>,
) -> ApiResult<(StatusCode, Json<MemoryRecord>)> {
    if request.content.trim().is_empty() {
        return Err(ApiError::bad_request("content must not be empty"));
    }
    let event_time = match request.event_time.as_deref() {
        None => None,
        Some(raw) => Some(
            parse_event_time(raw)
                .ok_or_else(|| ApiError::bad_request(format!("unparseable event_time: {raw}")))?,
        ),
    };

    // Direct creation implies the persona: materialize it when absent so the
    // memory is retrievable through the chat surface immediately.
    state
        .persona_manager()
        .create(&request.persona_id, None, None)
        .await?;

    let record = state
        .write_coordinator()
        .create_memory(MemoryWriteRequest {
            id: request.id,
            persona_id: request.persona_id,
            content: request.content,
            entity_id: request.entity_id,
            event_time,
            metadata: request.metadata.unwrap_or_default(),
        })
        .await
        .map_err(|err| ApiError::internal(format!("Failed to create memory: {err}")))?;

    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn list(
    State(state): State<SharedState>,
    Query(query): Query<MemoryListQuery>,
) -> ApiResult<Json<Vec<MemoryRecord>>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
    let mut records = state
        .metadata
        .list_memories(query.persona_id.as_deref(), limit)
        .await?;
    if let Some(kind) = query.kind.as_deref() {
        records.retain(|record| record.kind.as_str() == kind);
    }
    Ok(Json(records))
}

pub async fn get(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Json<MemoryRecord>> {
    match state.metadata.get_memory(&id).await? {
        Some(record) => Ok(Json(record)),
        None => Err(ApiError::not_found(format!("Memory not found: {id}"))),
    }
}

pub async fn update(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(request): Json<MemoryUpdateRequest>,
) -> ApiResult<Json<MemoryRecord>> {
    let updated = state
        .write_coordinator()
        .update_memory(&id, request.content.as_deref(), request.metadata)
        .await?;
    match updated {
        Some(record) => Ok(Json(record)),
        None => Err(ApiError::not_found(format!("Memory not found: {id}"))),
    }
}

pub async fn remove(State(state): State<SharedState>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    if state.write_coordinator().delete_memory(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("Memory not found: {id}")))
    }
}

/// Thin wrapper over the retrieval engine: full rescored candidate list,
/// not truncated to the injection budget.
pub async fn search(
    State(state): State<SharedState>,
    Json(request): Json<MemorySearchRequest>,
) -> ApiResult<Json<Vec<ScoredMemory>>> {
    let persona = request
        .persona()
        .unwrap_or_else(|| state.config.persona.default_id.clone());
    let limit = match request.top_k {
        Some(top_k) if top_k > 0 => top_k,
        _ => state.vector_top_k().await,
    };

    let engine = state.retrieval_engine().await;
    let results = engine.retrieve(&request.query, &persona, limit).await;
    Ok(Json(results))
}
