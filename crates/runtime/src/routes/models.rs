/// Public model catalog: the cartesian product of personas and upstream
/// models, each id shaped `persona_id/model_id`.
use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};
use tracing::warn;

use memgate_memory::now_ms;

use crate::error::ApiResult;
use crate::state::SharedState;

pub async fn list_models(State(state): State<SharedState>) -> ApiResult<Json<Value>> {
    let personas = state.persona_manager().list(usize::MAX).await?;

    let upstream = match state.primary.list_models().await {
        Ok(models) if !models.is_empty() => models,
        Ok(_) | Err(_) => {
            warn!("upstream model listing unavailable, using configured default");
            vec![json!({
                "id": state.config.llm.model,
                "object": "model",
                "created": now_ms() / 1000,
                "owned_by": "llm_provider",
            })]
        }
    };

    let mut data = Vec::with_capacity(personas.len() * upstream.len());
    for persona in &personas {
        for model in &upstream {
            let model_id = model.get("id").and_then(|id| id.as_str()).unwrap_or_default();
            if model_id.is_empty() {
                continue;
            }
            data.push(json!({
                "id": format!("{}/{}", persona.id, model_id),
                "object": "model",
                "created": persona.created_at / 1000,
                "owned_by": "you",
            }));
        }
    }

    Ok(Json(json!({ "object": "list", "data": data })))
}
