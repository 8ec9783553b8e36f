//! History-aware question reformulation

use std::sync::Arc;

use crate::error::Result;
use crate::types::ConversationTurn;

use super::prompt::PromptBuilder;
use super::{GenerationRequest, LlmProvider};

/// Rewrites a follow-up question into a standalone search query
#[derive(Clone)]
pub struct QueryReformulator {
    llm: Arc<dyn LlmProvider>,
}

impl QueryReformulator {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    /// Standalone form of `question` given the conversation so far.
    ///
    /// Without history the question is returned as is and the model is not
    /// called.
    pub async fn reformulate(&self, question: &str, history: &[ConversationTurn]) -> Result<String> {
        if history.is_empty() {
            return Ok(question.to_string());
        }

        let request = GenerationRequest {
            system_instruction: PromptBuilder::condense_instruction().to_string(),
            context: None,
            history: Vec::new(),
            prompt: PromptBuilder::build_condense_prompt(question, history),
        };

        let output = self.llm.generate(&request).await?;
        let standalone = output.trim();
        if standalone.is_empty() {
            tracing::warn!(
                "{} returned an empty standalone question, using the original",
                self.llm.name()
            );
            return Ok(question.to_string());
        }

        tracing::debug!("Reformulated '{}' as '{}'", question, standalone);
        Ok(standalone.to_string())
    }
}
