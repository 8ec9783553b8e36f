//! API routes for the Q&A server

pub mod ask;
pub mod index;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};

use crate::server::state::AppState;

/// Build all API routes
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/ask", post(ask::ask))
        .route("/ask/stream", post(ask::ask_stream))
        .route("/index/rebuild", post(index::rebuild))
        .route("/info", get(info))
}

/// API info endpoint
async fn info(State(state): State<AppState>) -> Json<serde_json::Value> {
    let pipeline = state.pipeline();
    Json(serde_json::json!({
        "name": "docqa-rag",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Conversational document Q&A with grounded, cited answers",
        "embedding": {
            "provider": pipeline.embedder().name(),
            "model": pipeline.embedder().model_id(),
            "dimensions": pipeline.embedder().dimensions(),
        },
        "llm": {
            "provider": pipeline.llm().name(),
            "model": pipeline.llm().model(),
        },
        "index": pipeline.stats(),
        "endpoints": {
            "POST /api/ask": "Answer a question given the conversation so far",
            "POST /api/ask/stream": "Same as /api/ask, streamed as server-sent events",
            "POST /api/index/rebuild": "Rebuild the index from the corpus directory",
            "GET /api/info": "Models and index status"
        }
    }))
}
