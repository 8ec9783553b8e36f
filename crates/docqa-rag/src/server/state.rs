//! Application state for the Q&A server

use std::sync::Arc;

use crate::pipeline::RagPipeline;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<RagPipeline>,
}

impl AppState {
    pub fn new(pipeline: Arc<RagPipeline>) -> Self {
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &RagPipeline {
        &self.pipeline
    }

    /// Ready once an index is active
    pub fn is_ready(&self) -> bool {
        self.pipeline.index().is_ready()
    }
}
