//! Prompt templates for history-aware RAG generation

use crate::types::{ConversationTurn, ScoredChunk};

/// Context text used when retrieval found nothing above the threshold
pub const NO_CONTEXT: &str = "No relevant context was found in the provided documents.";

const GROUNDED_INSTRUCTION: &str = r#"You are a document-grounded assistant that ONLY uses information from provided documents.

GROUNDING RULES:
1. ONLY use information that is EXPLICITLY stated in the CONTEXT FROM DOCUMENTS
2. If the context does not contain the answer, say that you don't know based on the provided documents
3. NEVER use external knowledge or make guesses beyond what is stated
4. Cite the supporting details of every claim inline in this format: [Source: filename, Page X]
5. For sources without pages, cite as [Source: filename]

RESPONSE STRUCTURE:
- Answer clearly and concisely using ONLY the context
- If multiple sources support a point, cite all of them
- Use the conversation so far to interpret the question, not as a source of facts"#;

const CONDENSE_INSTRUCTION: &str = r#"Given the following conversation and a follow up question, rephrase the follow up question to be a standalone question that can be understood without the chat history.

Do NOT answer the question. Return ONLY the standalone question. If the follow up question is already standalone, return it unchanged."#;

/// Prompt builder for the reformulation and answer calls
pub struct PromptBuilder;

impl PromptBuilder {
    /// System instruction for grounded answering
    pub fn grounded_instruction() -> &'static str {
        GROUNDED_INSTRUCTION
    }

    /// System instruction for question condensing
    pub fn condense_instruction() -> &'static str {
        CONDENSE_INSTRUCTION
    }

    /// Build the context block from retrieval results, numbered in retrieval order
    pub fn build_context(results: &[ScoredChunk]) -> String {
        if results.is_empty() {
            return NO_CONTEXT.to_string();
        }

        let mut context = String::new();
        for (i, result) in results.iter().enumerate() {
            context.push_str(&format!(
                "[{}] {}\n\nContent:\n{}\n\n---\n\n",
                i + 1,
                result.chunk.metadata.format_citation(),
                result.chunk.text
            ));
        }
        context
    }

    /// Condense-question prompt: the ordered chat history then the follow up
    pub fn build_condense_prompt(question: &str, history: &[ConversationTurn]) -> String {
        let transcript: Vec<String> = history
            .iter()
            .map(|turn| format!("Human: {}\nAssistant: {}", turn.question, turn.answer))
            .collect();

        format!(
            "Chat History:\n{}\n\nFollow Up Input: {}\n\nStandalone question:",
            transcript.join("\n"),
            question
        )
    }

    /// User prompt of the answer call. The standalone form is included when
    /// reformulation changed the question.
    pub fn build_question_prompt(question: &str, generated_question: &str) -> String {
        if question.trim() == generated_question.trim() {
            format!("QUESTION: {}", question)
        } else {
            format!(
                "QUESTION: {}\n(Standalone form: {})",
                question, generated_question
            )
        }
    }
}
