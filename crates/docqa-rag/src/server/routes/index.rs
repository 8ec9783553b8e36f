//! Index maintenance endpoint

use axum::{extract::State, Json};

use crate::error::Result;
use crate::index::IndexStats;
use crate::server::state::AppState;

/// POST /api/index/rebuild - rebuild from the corpus and swap it in
pub async fn rebuild(State(state): State<AppState>) -> Result<Json<IndexStats>> {
    tracing::info!("Index rebuild requested");
    let stats = state.pipeline().rebuild().await?;
    Ok(Json(stats))
}
