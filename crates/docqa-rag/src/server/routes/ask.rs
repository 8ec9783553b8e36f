//! Question endpoints: complete answers and SSE-streamed answers

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::{self, Stream};
use serde::Deserialize;
use serde_json::json;

use crate::config::RetrievalConfig;
use crate::error::{Error, Result};
use crate::generation::AnswerStream;
use crate::index::SearchParams;
use crate::server::state::AppState;
use crate::types::{AskResponse, ConversationTurn};

/// Body of `POST /api/ask` and `POST /api/ask/stream`
#[derive(Debug, Clone, Deserialize)]
pub struct AskRequest {
    pub question: String,
    /// Completed turns of the conversation so far, oldest first
    #[serde(default)]
    pub history: Vec<ConversationTurn>,
    pub top_k: Option<usize>,
    pub similarity_threshold: Option<f32>,
}

impl AskRequest {
    /// Per-request overrides applied to the configured parameters
    fn search_params(&self, defaults: SearchParams) -> Result<SearchParams> {
        let params = RetrievalConfig {
            top_k: self.top_k.unwrap_or(defaults.top_k),
            similarity_threshold: self
                .similarity_threshold
                .unwrap_or(defaults.similarity_threshold),
        };
        params.validate()?;
        Ok(params.into())
    }
}

/// POST /api/ask - answer one turn
pub async fn ask(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskResponse>> {
    let pipeline = state.pipeline();
    let params = request.search_params(pipeline.search_params())?;

    tracing::info!(
        "Question: \"{}\" ({} prior turns)",
        request.question,
        request.history.len()
    );
    let response = pipeline
        .ask_with(&request.question, &request.history, params)
        .await?;
    Ok(Json(response))
}

enum Phase {
    Sources(AnswerStream),
    Fragments(AnswerStream),
    Done,
}

/// POST /api/ask/stream - answer one turn as server-sent events.
///
/// Emits `sources`, then `fragment` events, then `done` with the completed
/// answer or `error`. A client disconnect drops the stream, which cancels
/// the model request.
pub async fn ask_stream(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, axum::Error>>>> {
    let pipeline = state.pipeline();
    let params = request.search_params(pipeline.search_params())?;

    tracing::info!("Streaming question: \"{}\"", request.question);
    let answer = pipeline
        .ask_stream_with(&request.question, &request.history, params)
        .await?;

    let events = stream::unfold(Phase::Sources(answer), |phase| async move {
        match phase {
            Phase::Sources(answer) => {
                let event = Event::default().event("sources").json_data(answer.sources());
                Some((event, Phase::Fragments(answer)))
            }
            Phase::Fragments(mut answer) => match answer.next_fragment().await {
                Some(Ok(fragment)) => {
                    let event = Event::default()
                        .event("fragment")
                        .json_data(json!({ "text": fragment }));
                    Some((event, Phase::Fragments(answer)))
                }
                Some(Err(e)) => Some((error_event(&e), Phase::Done)),
                None => match answer.finish().await {
                    Ok(composed) => {
                        let event = Event::default().event("done").json_data(&composed);
                        Some((event, Phase::Done))
                    }
                    Err(e) => Some((error_event(&e), Phase::Done)),
                },
            },
            Phase::Done => None,
        }
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn error_event(error: &Error) -> std::result::Result<Event, axum::Error> {
    tracing::warn!("Answer stream failed: {}", error);
    Event::default().event("error").json_data(json!({
        "message": "couldn't complete the answer",
        "retryable": error.is_retryable(),
    }))
}
