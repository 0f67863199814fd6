/// Persisted configuration reads and writes.  Known keys only; reads fall
/// back to compiled defaults until a row is written.
use axum::Json;
use axum::extract::{Path, State};
use serde_json::{Map, Value, json};

use memgate_config::{CONFIG_KEYS, default_configuration};

use crate::error::{ApiError, ApiResult};
use crate::state::SharedState;

async fn resolve_value(state: &SharedState, key: &str) -> ApiResult<Option<Value>> {
    if let Some(row) = state.metadata.get_config(key).await? {
        return Ok(Some(row.value));
    }
    Ok(default_configuration(&state.config, key).map(|(value, _)| value))
}

pub async fn list(State(state): State<SharedState>) -> ApiResult<Json<Value>> {
    let mut all = Map::new();
    for key in CONFIG_KEYS {
        if let Some(value) = resolve_value(&state, key).await? {
            all.insert((*key).to_string(), value);
        }
    }
    Ok(Json(Value::Object(all)))
}

pub async fn get(State(state): State<SharedState>, Path(key): Path<String>) -> ApiResult<Json<Value>> {
    if !CONFIG_KEYS.contains(&key.as_str()) {
        return Err(ApiError::not_found(format!("Unknown configuration key: {key}")));
    }
    match resolve_value(&state, &key).await? {
        Some(value) => Ok(Json(json!({ "key": key, "value": value }))),
        None => Err(ApiError::not_found(format!("Unknown configuration key: {key}"))),
    }
}

pub async fn put(
    State(state): State<SharedState>,
    Path(key): Path<String>,
    Json(value): Json<Value>,
) -> ApiResult<Json<Value>> {
    if !CONFIG_KEYS.contains(&key.as_str()) {
        return Err(ApiError::not_found(format!("Unknown configuration key: {key}")));
    }
    if !value.is_object() {
        return Err(ApiError::bad_request("configuration value must be a JSON object"));
    }

    let description = default_configuration(&state.config, &key)
        .map(|(_, description)| description)
        .unwrap_or_default();
    state.metadata.put_config(&key, value.clone(), description).await?;
    Ok(Json(json!({ "key": key, "value": value })))
}
