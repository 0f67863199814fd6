/// Post-turn memory work, detached from the request.
///
/// Tasks capture owned copies of everything they need (original messages,
/// persona id, gate inputs) and outlive the response; nothing here is ever
/// awaited by a request handler except the synchronous gate on the
/// non-streaming path.
use serde_json::Value;
use tracing::{error, info};

use memgate_memory::ScoredMemory;

use crate::state::SharedState;

/// Inputs for the turn's extraction decision, captured by copy.
#[derive(Debug, Clone)]
pub struct TurnCapture {
    pub persona_id: String,
    /// The caller's messages as received, before any injection.
    pub original_messages: Vec<Value>,
    pub user_message: String,
    pub assistant_response: String,
    pub injected: Vec<ScoredMemory>,
}

/// Gate then extract, both inside the detached task.  Used by the streaming
/// path after the final chunk went out.
pub fn spawn_gated_extraction(state: SharedState, capture: TurnCapture) {
    tokio::spawn(async move {
        let engine = state.extraction_engine().await;
        let should = engine
            .should_extract(
                &capture.user_message,
                &capture.assistant_response,
                &capture.injected,
            )
            .await;
        if !should {
            info!(persona = %capture.persona_id, "no new information, skipping extraction");
            return;
        }
        extract_and_store(&state, &capture).await;
    });
}

/// Extraction only, for the non-streaming path where the gate already ran
/// before the response returned.
pub fn spawn_extraction(state: SharedState, capture: TurnCapture) {
    tokio::spawn(async move {
        extract_and_store(&state, &capture).await;
    });
}

async fn extract_and_store(state: &SharedState, capture: &TurnCapture) {
    let engine = state.extraction_engine().await;
    let batch = match engine.extract(&capture.original_messages).await {
        Ok(batch) => batch,
        Err(err) => {
            // Malformed output drops the whole batch; the conversation has
            // already returned, so there is nobody to retry for.
            error!(%err, persona = %capture.persona_id, "extraction dropped");
            return;
        }
    };
    if batch.is_empty() {
        info!(persona = %capture.persona_id, "extraction found nothing to keep");
        return;
    }

    let coordinator = state.write_coordinator();
    let dedup = state.deduplicator().await;
    let saved = coordinator
        .write_extraction(&capture.persona_id, batch, &dedup)
        .await;
    info!(persona = %capture.persona_id, saved = saved.len(), "post-turn extraction finished");
}
