//! The question-answering pipeline: index lifecycle and conversational turns

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::RagConfig;
use crate::embeddings::{create_embedder, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::generation::{create_llm, AnswerComposer, AnswerStream, LlmProvider, QueryReformulator};
use crate::index::{snapshot_exists, ActiveIndex, IndexStats, SearchParams, VectorIndex};
use crate::ingestion::{DocumentLoader, TextChunker};
use crate::retrieval::Retriever;
use crate::types::{AskResponse, Chunk, ConversationTurn, ScoredChunk};

/// Owns the providers and the active index.
///
/// Conversation history stays with the caller and is passed into every
/// turn; the pipeline never stores it.
pub struct RagPipeline {
    config: RagConfig,
    loader: DocumentLoader,
    chunker: TextChunker,
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn LlmProvider>,
    retriever: Retriever,
    reformulator: QueryReformulator,
    composer: AnswerComposer,
    index: ActiveIndex,
    rebuild_lock: Mutex<()>,
}

impl RagPipeline {
    /// Validate `config` and create the configured providers
    pub async fn from_config(config: RagConfig) -> Result<Self> {
        config.validate()?;
        let embedder = create_embedder(&config).await?;
        let llm = create_llm(&config.llm)?;
        Self::with_providers(config, embedder, llm)
    }

    /// Assemble a pipeline around existing providers
    pub fn with_providers(
        config: RagConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LlmProvider>,
    ) -> Result<Self> {
        let chunker = TextChunker::new(config.chunking.chunk_size, config.chunking.chunk_overlap)?;
        config.retrieval.validate()?;

        Ok(Self {
            loader: DocumentLoader::default(),
            chunker,
            retriever: Retriever::new(embedder.clone()),
            reformulator: QueryReformulator::new(llm.clone()),
            composer: AnswerComposer::new(llm.clone()),
            embedder,
            llm,
            index: ActiveIndex::new(),
            rebuild_lock: Mutex::new(()),
            config,
        })
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn index(&self) -> &ActiveIndex {
        &self.index
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    pub fn llm(&self) -> &Arc<dyn LlmProvider> {
        &self.llm
    }

    /// Default search parameters from `[retrieval]`
    pub fn search_params(&self) -> SearchParams {
        SearchParams::from(self.config.retrieval)
    }

    /// Stats of the active index, if any
    pub fn stats(&self) -> Option<IndexStats> {
        self.index.snapshot().map(|index| index.stats())
    }

    /// Activate the persisted snapshot when one exists and loads cleanly,
    /// otherwise build from the corpus. `force_rebuild` ignores any snapshot.
    pub async fn open_or_build(&self, force_rebuild: bool) -> Result<IndexStats> {
        let path = self.config.index.path.clone();

        if !force_rebuild && snapshot_exists(&path) {
            let model = self.embedder.model_id().to_string();
            let load_path = path.clone();
            let loaded = tokio::task::spawn_blocking(move || VectorIndex::load(&load_path, &model))
                .await
                .map_err(join_error)?;

            match loaded {
                Ok(index) => {
                    let stats = index.stats();
                    self.index.swap(index);
                    return Ok(stats);
                }
                Err(e) => {
                    tracing::warn!(
                        "Could not load index from {}: {}; rebuilding from {}",
                        path.display(),
                        e,
                        self.config.corpus.dir.display()
                    );
                }
            }
        }

        self.rebuild().await
    }

    /// Build a new index from the corpus, persist it and make it active.
    ///
    /// The previous index keeps serving until the swap; on failure it stays
    /// active and nothing is written.
    pub async fn rebuild(&self) -> Result<IndexStats> {
        let _guard = self.rebuild_lock.lock().await;
        let start = Instant::now();

        let chunks = self.load_chunks().await?;
        let index = VectorIndex::build(
            chunks,
            self.embedder.as_ref(),
            self.config.embeddings.batch_size,
        )
        .await?;

        let path = self.config.index.path.clone();
        let index = tokio::task::spawn_blocking(move || -> Result<VectorIndex> {
            index.save(&path)?;
            Ok(index)
        })
        .await
        .map_err(join_error)??;

        let stats = index.stats();
        self.index.swap(index);
        tracing::info!(
            "Built index {} with {} chunks from {} files in {:?}",
            stats.snapshot_id,
            stats.entries,
            stats.files,
            start.elapsed()
        );
        Ok(stats)
    }

    async fn load_chunks(&self) -> Result<Vec<Chunk>> {
        let loader = self.loader.clone();
        let chunker = self.chunker;
        let dir = self.config.corpus.dir.clone();

        tokio::task::spawn_blocking(move || -> Result<Vec<Chunk>> {
            let documents = loader.load_directory(&dir)?;
            let chunks = chunker.chunk_documents(&documents);
            if chunks.is_empty() {
                return Err(Error::EmptyCorpus(dir.display().to_string()));
            }
            Ok(chunks)
        })
        .await
        .map_err(join_error)?
    }

    /// Search the active index for `query`
    pub async fn retrieve(&self, query: &str, params: &SearchParams) -> Result<Vec<ScoredChunk>> {
        self.retriever.retrieve_active(&self.index, query, params).await
    }

    /// Answer one turn with the configured search parameters
    pub async fn ask(&self, question: &str, history: &[ConversationTurn]) -> Result<AskResponse> {
        self.ask_with(question, history, self.search_params()).await
    }

    /// Answer one turn, waiting for the complete answer
    pub async fn ask_with(
        &self,
        question: &str,
        history: &[ConversationTurn],
        params: SearchParams,
    ) -> Result<AskResponse> {
        let start = Instant::now();
        let stream = self.ask_stream_with(question, history, params).await?;
        let composed = stream.finish().await?;
        let processing_time_ms = start.elapsed().as_millis() as u64;

        tracing::info!(
            "Answered in {}ms with {} sources",
            processing_time_ms,
            composed.sources.len()
        );
        Ok(AskResponse {
            answer: composed.answer,
            generated_question: composed.generated_question,
            sources: composed.sources,
            processing_time_ms,
            interaction_id: Uuid::new_v4(),
        })
    }

    /// Start a streamed answer with the configured search parameters
    pub async fn ask_stream(
        &self,
        question: &str,
        history: &[ConversationTurn],
    ) -> Result<AnswerStream> {
        self.ask_stream_with(question, history, self.search_params()).await
    }

    /// Reformulate, retrieve, and open the answer stream
    pub async fn ask_stream_with(
        &self,
        question: &str,
        history: &[ConversationTurn],
        params: SearchParams,
    ) -> Result<AnswerStream> {
        let question = question.trim();
        if question.is_empty() {
            return Err(Error::Config("question must not be empty".to_string()));
        }
        let index = self
            .index
            .snapshot()
            .ok_or_else(|| Error::internal("no index is loaded; build or load one first"))?;

        let generated_question = self.reformulator.reformulate(question, history).await?;
        let retrieval = self
            .retriever
            .retrieve(&index, &generated_question, &params)
            .await?;
        self.composer
            .compose(question, &generated_question, history, retrieval)
            .await
    }
}

fn join_error(e: tokio::task::JoinError) -> Error {
    Error::internal(format!("background task failed: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::prompt::NO_CONTEXT;
    use crate::index::ENTRIES_FILE;
    use crate::test_support::{write_pdf, KeywordEmbedder, ScriptedLlm};
    use std::path::Path;

    fn test_config(root: &Path) -> RagConfig {
        let mut config = RagConfig::default();
        config.corpus.dir = root.join("corpus");
        config.index.path = root.join("index");
        config
    }

    fn manual_corpus(root: &Path) {
        std::fs::create_dir_all(root.join("corpus")).unwrap();
        write_pdf(
            &root.join("corpus").join("manual.pdf"),
            &["The device requires 5 volts.", "Keep it dry."],
        );
    }

    fn pipeline(root: &Path, llm: Arc<ScriptedLlm>) -> RagPipeline {
        RagPipeline::with_providers(test_config(root), Arc::new(KeywordEmbedder::new()), llm).unwrap()
    }

    #[tokio::test]
    async fn test_answer_cites_manual() {
        let root = tempfile::tempdir().unwrap();
        manual_corpus(root.path());
        let llm = Arc::new(ScriptedLlm::new([
            "The device requires 5 volts [Source: manual.pdf, Page 1].",
        ]));
        let pipeline = pipeline(root.path(), llm.clone());

        assert_eq!(pipeline.search_params(), SearchParams::default());

        let stats = pipeline.open_or_build(false).await.unwrap();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.files, 1);
        assert!(snapshot_exists(&root.path().join("index")));

        let response = pipeline.ask("What voltage does it need?", &[]).await.unwrap();
        assert!(response.answer.contains('5'));
        assert_eq!(response.generated_question, "What voltage does it need?");
        assert_eq!(response.sources.len(), 1);
        assert_eq!(response.sources[0].filename, "manual.pdf");
        assert_eq!(response.sources[0].page, Some(1));

        let requests = llm.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].context.as_deref().unwrap().contains("5 volts"));
    }

    #[tokio::test]
    async fn test_follow_up_uses_standalone_question() {
        let root = tempfile::tempdir().unwrap();
        manual_corpus(root.path());
        let llm = Arc::new(ScriptedLlm::new([
            "How should the device be stored dry?",
            "Keep it dry [Source: manual.pdf, Page 2].",
        ]));
        let pipeline = pipeline(root.path(), llm.clone());
        pipeline.open_or_build(false).await.unwrap();

        let history = vec![ConversationTurn::new("What voltage does it need?", "5 volts.")];
        let params = SearchParams {
            top_k: 4,
            similarity_threshold: 0.3,
        };
        let response = pipeline.ask_with("And storage?", &history, params).await.unwrap();

        assert_eq!(response.generated_question, "How should the device be stored dry?");
        assert_eq!(response.sources[0].page, Some(2));
        assert_eq!(history.len(), 1);

        let answer_request = &llm.requests()[1];
        assert_eq!(answer_request.history.len(), 2);
        assert!(answer_request.prompt.contains("And storage?"));
        assert!(answer_request.prompt.contains("How should the device be stored dry?"));
    }

    #[tokio::test]
    async fn test_existing_snapshot_is_reused() {
        let root = tempfile::tempdir().unwrap();
        manual_corpus(root.path());
        let first = pipeline(root.path(), Arc::new(ScriptedLlm::new(Vec::<String>::new())))
            .open_or_build(false)
            .await
            .unwrap();

        let second = pipeline(root.path(), Arc::new(ScriptedLlm::new(Vec::<String>::new())))
            .open_or_build(false)
            .await
            .unwrap();
        assert_eq!(first.snapshot_id, second.snapshot_id);
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_falls_back_to_rebuild() {
        let root = tempfile::tempdir().unwrap();
        manual_corpus(root.path());
        let first = pipeline(root.path(), Arc::new(ScriptedLlm::new(Vec::<String>::new())))
            .open_or_build(false)
            .await
            .unwrap();
        std::fs::write(root.path().join("index").join(ENTRIES_FILE), b"garbage").unwrap();

        let rebuilt = pipeline(root.path(), Arc::new(ScriptedLlm::new(Vec::<String>::new())));
        let stats = rebuilt.open_or_build(false).await.unwrap();
        assert_ne!(stats.snapshot_id, first.snapshot_id);
        assert_eq!(stats.entries, 2);
        assert!(VectorIndex::load(&root.path().join("index"), "keyword-test").is_ok());
    }

    #[tokio::test]
    async fn test_force_rebuild_ignores_snapshot() {
        let root = tempfile::tempdir().unwrap();
        manual_corpus(root.path());
        let pipeline = pipeline(root.path(), Arc::new(ScriptedLlm::new(Vec::<String>::new())));
        let first = pipeline.open_or_build(false).await.unwrap();
        let second = pipeline.open_or_build(true).await.unwrap();
        assert_ne!(first.snapshot_id, second.snapshot_id);
        assert_eq!(pipeline.stats().unwrap().snapshot_id, second.snapshot_id);
    }

    #[tokio::test]
    async fn test_empty_corpus_writes_nothing() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("corpus")).unwrap();
        std::fs::write(root.path().join("corpus").join("data.xlsx"), b"x").unwrap();
        let pipeline = pipeline(root.path(), Arc::new(ScriptedLlm::new(Vec::<String>::new())));

        let err = pipeline.open_or_build(false).await.unwrap_err();
        assert!(matches!(err, Error::EmptyCorpus(_)));
        assert!(!root.path().join("index").exists());
        assert!(!pipeline.index().is_ready());
    }

    #[tokio::test]
    async fn test_ask_before_index_is_error() {
        let root = tempfile::tempdir().unwrap();
        let pipeline = pipeline(root.path(), Arc::new(ScriptedLlm::new(["unused"])));
        let err = pipeline.ask("What voltage?", &[]).await.unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[tokio::test]
    async fn test_failed_turn_is_retryable_and_leaves_history() {
        let root = tempfile::tempdir().unwrap();
        manual_corpus(root.path());
        let pipeline = pipeline(root.path(), Arc::new(ScriptedLlm::failing("rate limited")));
        pipeline.open_or_build(false).await.unwrap();

        let history = vec![ConversationTurn::new("Q", "A")];
        let err = pipeline.ask("What voltage does it need?", &history).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(history, vec![ConversationTurn::new("Q", "A")]);
    }

    #[tokio::test]
    async fn test_threshold_override_can_exclude_everything() {
        let root = tempfile::tempdir().unwrap();
        manual_corpus(root.path());
        let llm = Arc::new(ScriptedLlm::new(["I don't know."]));
        let pipeline = pipeline(root.path(), llm.clone());
        pipeline.open_or_build(false).await.unwrap();

        let params = SearchParams {
            top_k: 4,
            similarity_threshold: 0.95,
        };
        let response = pipeline
            .ask_with("What voltage does it need?", &[], params)
            .await
            .unwrap();
        assert!(response.sources.is_empty());
        assert_eq!(llm.requests()[0].context.as_deref(), Some(NO_CONTEXT));
    }

    #[tokio::test]
    async fn test_dropped_stream_records_nothing() {
        let root = tempfile::tempdir().unwrap();
        manual_corpus(root.path());
        let llm = Arc::new(ScriptedLlm::new(["The device requires 5 volts."]));
        let pipeline = pipeline(root.path(), llm.clone());
        pipeline.open_or_build(false).await.unwrap();

        let conversation = crate::types::Conversation::new();
        let mut stream = pipeline
            .ask_stream("What voltage does it need?", conversation.turns())
            .await
            .unwrap();
        assert_eq!(stream.sources().len(), 1);
        stream.next_fragment().await.unwrap().unwrap();
        drop(stream);

        assert_eq!(llm.open_streams(), 0);
        assert!(conversation.is_empty());
    }
}
