/// OpenAI-compatible chat completions with the memory pipeline wrapped
/// around the upstream call: retrieve → inject → forward → (after the turn)
/// gate → extract.
use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info};

use memgate_memory::{InjectionMode, append_persona_prompt, inject_memories};

use crate::background::{self, TurnCapture};
use crate::error::{ApiError, ApiResult};
use crate::state::SharedState;

fn default_true() -> bool {
    true
}

/// Per-request memory switches.  `enabled` gates retrieval and injection,
/// `auto_save` gates extraction — independently, so a caller can read
/// memories without writing or write without reading.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct MemoryConfigRequest {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub auto_save: bool,
}

impl Default for MemoryConfigRequest {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_save: true,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest {
    #[serde(default)]
    pub model: Option<String>,
    pub messages: Vec<Value>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u64>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub tools: Option<Value>,
    #[serde(default)]
    pub tool_choice: Option<Value>,
    #[serde(default)]
    pub memory_config: Option<MemoryConfigRequest>,
    /// Provider-specific extras (top_k, thinking, ...) passed through
    /// untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The public `model` field encodes `persona_id[/lm_model]`; a bare persona
/// id uses the configured default model, and a missing field the default
/// persona.
pub fn parse_model(param: Option<&str>, default_persona: &str, default_model: &str) -> (String, String) {
    let param = param.filter(|p| !p.is_empty()).unwrap_or(default_persona);
    match param.split_once('/') {
        Some((persona, model)) => (persona.to_string(), model.to_string()),
        None => (param.to_string(), default_model.to_string()),
    }
}

/// The body forwarded upstream: rewritten model and messages, everything
/// else carried over as the caller sent it.
fn upstream_payload(request: &ChatCompletionRequest, lm_model: &str, messages: Vec<Value>) -> Value {
    let mut payload = json!({
        "model": lm_model,
        "messages": messages,
    });
    if let Some(temperature) = request.temperature {
        payload["temperature"] = json!(temperature);
    }
    if let Some(max_tokens) = request.max_tokens {
        payload["max_tokens"] = json!(max_tokens);
    }
    if let Some(tools) = &request.tools {
        payload["tools"] = tools.clone();
    }
    if let Some(tool_choice) = &request.tool_choice {
        payload["tool_choice"] = tool_choice.clone();
    }
    for (key, value) in &request.extra {
        if !value.is_null() {
            payload[key.as_str()] = value.clone();
        }
    }
    payload
}

pub async fn chat_completions(
    State(state): State<SharedState>,
    Json(request): Json<ChatCompletionRequest>,
) -> ApiResult<Response> {
    let user_message = request
        .messages
        .iter()
        .rev()
        .find(|m| m.get("role").and_then(|r| r.as_str()) == Some("user"))
        .and_then(|m| m.get("content").and_then(|c| c.as_str()))
        .ok_or_else(|| ApiError::bad_request("No user message found"))?
        .to_string();

    let (persona_id, lm_model) = parse_model(
        request.model.as_deref(),
        &state.config.persona.default_id,
        &state.config.llm.model,
    );
    let persona = state
        .metadata
        .get_persona(&persona_id)
        .await?
        .ok_or_else(|| {
            ApiError::not_found(format!(
                "Persona '{persona_id}' not found. Create the persona first or use an existing one."
            ))
        })?;

    let settings = state.memory_settings().await;
    let memory_request = request.memory_config.unwrap_or_default();
    let memory_enabled = settings.enabled && memory_request.enabled;

    let memories = if memory_enabled && settings.max_long_term > 0 {
        let engine = state.retrieval_engine().await;
        engine
            .retrieve(&user_message, &persona_id, settings.max_long_term)
            .await
    } else {
        Vec::new()
    };
    if !memories.is_empty() {
        info!(persona = %persona_id, injected = memories.len(), "memories injected for turn");
    }

    let mut enhanced = request.messages.clone();
    if memory_enabled {
        let mode = InjectionMode::parse(&settings.injection_mode);
        enhanced = inject_memories(enhanced, &memories, mode);
    }
    if let Some(prompt) = persona.system_prompt.as_deref().filter(|p| !p.is_empty()) {
        enhanced = append_persona_prompt(enhanced, prompt);
    }

    let payload = upstream_payload(&request, &lm_model, enhanced);
    let capture = TurnCapture {
        persona_id,
        original_messages: request.messages,
        user_message,
        assistant_response: String::new(),
        injected: memories,
    };

    if request.stream {
        Ok(stream_chat(state, payload, capture, memory_request.auto_save))
    } else {
        unary_chat(state, payload, capture, memory_request.auto_save, &lm_model).await
    }
}

async fn unary_chat(
    state: SharedState,
    payload: Value,
    mut capture: TurnCapture,
    auto_save: bool,
    lm_model: &str,
) -> ApiResult<Response> {
    let mut body = state.primary.chat(payload).await.map_err(|err| {
        error!(%err, "upstream chat failed");
        ApiError::internal(err.to_string())
    })?;
    body["model"] = json!(lm_model);

    let choice = body.get("choices").and_then(|c| c.get(0));
    let assistant_response = choice
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let finish_reason = choice
        .and_then(|c| c.get("finish_reason"))
        .and_then(|v| v.as_str())
        .unwrap_or("stop");

    if auto_save && finish_reason == "stop" {
        capture.assistant_response = assistant_response;
        // The gate runs before the response returns; only the extraction
        // itself is detached.
        let engine = state.extraction_engine().await;
        let should = engine
            .should_extract(&capture.user_message, &capture.assistant_response, &capture.injected)
            .await;
        if should {
            background::spawn_extraction(state, capture);
        } else {
            info!("no new information, extraction not scheduled");
        }
    } else if finish_reason != "stop" {
        info!(finish_reason, "turn not complete, extraction skipped");
    }

    Ok(Json(body).into_response())
}

/// Proxy the upstream SSE stream chunk-for-chunk, then run the gate and
/// extraction in a task that outlives the response.
fn stream_chat(state: SharedState, payload: Value, mut capture: TurnCapture, auto_save: bool) -> Response {
    let (sse_tx, sse_rx) = mpsc::channel::<String>(64);
    let (chunk_tx, mut chunk_rx) = mpsc::channel::<Value>(64);

    tokio::spawn(async move {
        while let Some(chunk) = chunk_rx.recv().await {
            // A failed send means the client went away; keep draining so the
            // producer still reaches its summary.
            let _ = sse_tx.send(format!("data: {chunk}\n\n")).await;
        }
        let _ = sse_tx.send("data: [DONE]\n\n".to_string()).await;
    });

    tokio::spawn(async move {
        match state.primary.chat_stream(payload, chunk_tx).await {
            Ok(summary) => {
                if summary.finished_cleanly() {
                    if auto_save {
                        capture.assistant_response = summary.content;
                        background::spawn_gated_extraction(state, capture);
                    }
                } else {
                    info!(finish_reason = ?summary.finish_reason, "turn not complete, extraction skipped");
                }
            }
            Err(err) => {
                error!(%err, "upstream stream failed");
            }
        }
    });

    let body = Body::from_stream(ReceiverStream::new(sse_rx).map(Ok::<_, std::convert::Infallible>));
    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
