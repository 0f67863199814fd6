/// Persona CRUD.  Deletion cascades through every owned memory and vector.
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;

use memgate_memory::Persona;

use crate::error::{ApiError, ApiResult};
use crate::state::SharedState;

const DEFAULT_LIST_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
pub struct PersonaCreateRequest {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PersonaUpdateRequest {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PersonaListQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

pub async fn create(
    State(state): State<SharedState>,
    Json(request): Json<PersonaCreateRequest>,
) -> ApiResult<(StatusCode, Json<Persona>)> {
    if request.id.trim().is_empty() {
        return Err(ApiError::bad_request("persona id must not be empty"));
    }
    let persona = state
        .persona_manager()
        .create(&request.id, request.description, request.system_prompt)
        .await?;
    Ok((StatusCode::CREATED, Json(persona)))
}

pub async fn list(
    State(state): State<SharedState>,
    Query(query): Query<PersonaListQuery>,
) -> ApiResult<Json<Vec<Persona>>> {
    let personas = state
        .persona_manager()
        .list(query.limit.unwrap_or(DEFAULT_LIST_LIMIT))
        .await?;
    Ok(Json(personas))
}

pub async fn get(State(state): State<SharedState>, Path(id): Path<String>) -> ApiResult<Json<Persona>> {
    match state.persona_manager().get(&id).await? {
        Some(persona) => Ok(Json(persona)),
        None => Err(ApiError::not_found(format!("Persona not found: {id}"))),
    }
}

pub async fn update(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(request): Json<PersonaUpdateRequest>,
) -> ApiResult<Json<Persona>> {
    let updated = state
        .persona_manager()
        .update(&id, request.description, request.system_prompt)
        .await?;
    match updated {
        Some(persona) => Ok(Json(persona)),
        None => Err(ApiError::not_found(format!("Persona not found: {id}"))),
    }
}

pub async fn remove(State(state): State<SharedState>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    if state.persona_manager().delete(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("Persona not found: {id}")))
    }
}
