//! Grounded answer composition over a streamed model response

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::Result;
use crate::types::conversation::history_messages;
use crate::types::{ConversationTurn, ScoredChunk, Source};

use super::prompt::PromptBuilder;
use super::stream::FragmentStream;
use super::{GenerationRequest, LlmProvider};

/// Composes the grounded answer request and opens the model stream
#[derive(Clone)]
pub struct AnswerComposer {
    llm: Arc<dyn LlmProvider>,
}

impl AnswerComposer {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    /// Build the answer request: grounded instruction, numbered context,
    /// history as chat messages, then the question
    pub fn build_request(
        question: &str,
        generated_question: &str,
        history: &[ConversationTurn],
        retrieval: &[ScoredChunk],
    ) -> GenerationRequest {
        GenerationRequest {
            system_instruction: PromptBuilder::grounded_instruction().to_string(),
            context: Some(PromptBuilder::build_context(retrieval)),
            history: history_messages(history),
            prompt: PromptBuilder::build_question_prompt(question, generated_question),
        }
    }

    /// Start answering. Sources are available on the returned stream before
    /// the first fragment arrives.
    pub async fn compose(
        &self,
        question: &str,
        generated_question: &str,
        history: &[ConversationTurn],
        retrieval: Vec<ScoredChunk>,
    ) -> Result<AnswerStream> {
        let request = Self::build_request(question, generated_question, history, &retrieval);
        tracing::debug!(
            "Composing answer from {} chunks with {} history messages",
            retrieval.len(),
            request.history.len()
        );

        let fragments = self.llm.generate_stream(&request).await?;
        Ok(AnswerStream {
            question: question.to_string(),
            generated_question: generated_question.to_string(),
            sources: retrieval.iter().map(Source::from_scored).collect(),
            fragments: Some(fragments),
            buffer: String::new(),
        })
    }
}

/// An answer being streamed.
///
/// Dropping it before [`AnswerStream::finish`] cancels the model request and
/// produces no turn.
pub struct AnswerStream {
    question: String,
    generated_question: String,
    sources: Vec<Source>,
    fragments: Option<FragmentStream>,
    buffer: String,
}

impl AnswerStream {
    /// Retrieved sources, in retrieval order
    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn generated_question(&self) -> &str {
        &self.generated_question
    }

    /// Text received so far
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Next fragment, appended to the buffer. `None` once the model is done
    /// or after an error has been returned.
    pub async fn next_fragment(&mut self) -> Option<Result<String>> {
        let fragments = self.fragments.as_mut()?;
        match fragments.next().await {
            Some(Ok(fragment)) => {
                self.buffer.push_str(&fragment);
                Some(Ok(fragment))
            }
            Some(Err(e)) => {
                self.fragments = None;
                Some(Err(e))
            }
            None => {
                self.fragments = None;
                None
            }
        }
    }

    /// Drain the remaining fragments into the completed answer
    pub async fn finish(mut self) -> Result<ComposedAnswer> {
        while let Some(fragment) = self.next_fragment().await {
            fragment?;
        }
        Ok(ComposedAnswer {
            question: self.question,
            generated_question: self.generated_question,
            answer: self.buffer,
            sources: self.sources,
        })
    }
}

/// A completed answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposedAnswer {
    pub question: String,
    pub generated_question: String,
    pub answer: String,
    pub sources: Vec<Source>,
}

impl ComposedAnswer {
    /// The turn to append to the caller's conversation
    pub fn into_turn(self) -> ConversationTurn {
        ConversationTurn::new(self.question, self.answer)
    }
}
