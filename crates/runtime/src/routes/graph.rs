/// Knowledge-graph reads: a focused k-hop neighborhood or the persona's
/// whole graph.
use axum::Json;
use axum::extract::{Query, State};
use serde::Deserialize;

use memgate_memory::Neighborhood;

use crate::error::{ApiError, ApiResult};
use crate::state::SharedState;

const DEFAULT_DEPTH: usize = 2;
const MAX_DEPTH: usize = 5;

#[derive(Debug, Deserialize)]
pub struct GraphQuery {
    pub persona_id: String,
    #[serde(default)]
    pub entity_name: Option<String>,
    #[serde(default)]
    pub max_depth: Option<usize>,
}

pub async fn get_graph(
    State(state): State<SharedState>,
    Query(query): Query<GraphQuery>,
) -> ApiResult<Json<Neighborhood>> {
    if query.persona_id.trim().is_empty() {
        return Err(ApiError::bad_request("persona_id is required"));
    }
    let depth = query.max_depth.unwrap_or(DEFAULT_DEPTH);
    if depth == 0 || depth > MAX_DEPTH {
        return Err(ApiError::bad_request(format!(
            "max_depth must be between 1 and {MAX_DEPTH}"
        )));
    }

    let result = match query.entity_name.as_deref().filter(|name| !name.is_empty()) {
        Some(entity) => {
            state
                .graph
                .neighborhood(&query.persona_id, entity, depth)
                .await
                .map_err(|err| ApiError::bad_request(err.to_string()))?
        }
        None => state.graph.full_graph(&query.persona_id).await?,
    };
    Ok(Json(result))
}
