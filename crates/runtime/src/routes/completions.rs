/// Text-completion passthrough.  No memory pipeline: the body goes upstream
/// as-is (minus a defaulted model) and the provider's answer comes back.
use axum::Json;
use axum::extract::State;
use serde_json::Value;
use tracing::error;

use crate::error::{ApiError, ApiResult};
use crate::state::SharedState;

pub async fn completions(
    State(state): State<SharedState>,
    Json(payload): Json<Value>,
) -> ApiResult<Json<Value>> {
    if payload.get("prompt").is_none() {
        return Err(ApiError::bad_request("prompt is required"));
    }

    let body = state.primary.completion(payload).await.map_err(|err| {
        error!(%err, "upstream completion failed");
        ApiError::internal(err.to_string())
    })?;
    Ok(Json(body))
}
