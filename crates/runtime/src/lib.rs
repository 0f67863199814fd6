//! HTTP surface and request orchestration: the OpenAI-compatible gateway,
//! memory CRUD/search, persona and graph endpoints, persisted configuration
//! and the MCP tool surface — all under `/v1`.

use anyhow::{Context, Result};
use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tracing::info;

mod auth;
pub mod background;
mod error;
mod routes;
mod state;

pub use error::{ApiError, ApiResult};
pub use state::{AppState, LmJsonBackend, SharedState, embedding_fn};

pub fn build_router(state: SharedState) -> Router {
    let api = Router::new()
        .route("/chat/completions", post(routes::chat::chat_completions))
        .route("/completions", post(routes::completions::completions))
        .route("/models", get(routes::models::list_models))
        .route("/memory-tools", get(routes::tools::list_memory_tools))
        .route(
            "/memories",
            post(routes::memories::create).get(routes::memories::list),
        )
        .route("/memories/search", post(routes::memories::search))
        .route(
            "/memories/:id",
            get(routes::memories::get)
                .put(routes::memories::update)
                .delete(routes::memories::remove),
        )
        .route(
            "/personas",
            post(routes::personas::create).get(routes::personas::list),
        )
        .route(
            "/personas/:id",
            get(routes::personas::get)
                .put(routes::personas::update)
                .delete(routes::personas::remove),
        )
        .route("/graph", get(routes::graph::get_graph))
        .route("/config", get(routes::config::list))
        .route("/config/:key", get(routes::config::get).put(routes::config::put))
        .route("/mcp", post(routes::mcp::mcp))
        .layer(middleware::from_fn_with_state(state.clone(), auth::require_bearer));

    Router::new()
        .nest("/v1", api)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(state: SharedState) -> Result<()> {
    let addr = state.config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "memgate listening");
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
