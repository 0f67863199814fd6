use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::error::ApiError;
use crate::state::SharedState;

/// Bearer-token check applied to every `/v1` route.  When no key is
/// configured the surface is anonymous; when one is, the header must match
/// `Bearer <token>` exactly.
pub async fn require_bearer(
    State(state): State<SharedState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let expected = &state.config.server.api_key;
    if expected.is_empty() {
        return Ok(next.run(request).await);
    }

    let header = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    match header.and_then(|value| value.strip_prefix("Bearer ")) {
        None => Err(ApiError::unauthorized(
            "Missing or invalid Authorization header. Expected: 'Bearer <token>'",
        )),
        Some(token) if token != expected => Err(ApiError::unauthorized("Invalid API key")),
        Some(_) => Ok(next.run(request).await),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
