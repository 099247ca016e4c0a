//! Session chat: ingestion into a per-session index, then history-aware
//! question answering over it.
//!
//! # Ingest
//!
//! ```text
//! files ─► validate ─► save uploads ─► extract ─► chunk ─► embed ─► persist
//! ```
//!
//! # Chat turn
//!
//! ```text
//! question ─► load index ─► rewrite (history) ─► retrieve ─► answer ─► append turn
//! ```
//!
//! Turns of one session run strictly one at a time behind a per-session
//! async mutex; turns of different sessions never wait on each other.
//! Index rebuilds take the same lock, so a rebuild and a turn of the same
//! session are serialised too.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::answer::AnswerSynthesizer;
use crate::chunk::split_documents;
use crate::config::Config;
use crate::embedding::{create_embedder, Embedder};
use crate::error::{PortalError, Result};
use crate::extract::{extract_text, DocumentSource};
use crate::generation::{create_generator, CompletionOptions, Generator};
use crate::history::{ConversationStore, JsonlConversationStore};
use crate::index::{IndexLocation, VectorIndex};
use crate::models::{Answer, SourceDocument, Turn};
use crate::retrieve::Retriever;
use crate::rewrite::QueryRewriter;
use crate::session::SessionStore;

/// One uploaded file.
#[derive(Debug, Clone)]
pub struct InputFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl InputFile {
    pub fn read(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| PortalError::Input(format!("invalid file path {}", path.display())))?
            .to_string();
        let bytes = std::fs::read(path).map_err(|e| PortalError::io(path, e))?;
        Ok(Self { name, bytes })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub session_id: String,
    pub files: Vec<String>,
    pub pages: usize,
    pub chunks: usize,
    pub index_path: PathBuf,
}

/// Provenance of one retrieved chunk, returned with the answer.
#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    pub source: String,
    pub page: u32,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub session_id: String,
    pub answer: Answer,
    pub standalone_question: String,
    pub sources: Vec<SourceRef>,
}

pub struct ChatEngine {
    config: Config,
    sessions: SessionStore,
    embedder: Arc<dyn Embedder>,
    history: Arc<dyn ConversationStore>,
    rewriter: QueryRewriter,
    retriever: Retriever,
    synthesizer: AnswerSynthesizer,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ChatEngine {
    pub fn new(
        config: Config,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        history: Arc<dyn ConversationStore>,
    ) -> Self {
        let options = CompletionOptions::from(&config.generation);
        Self {
            sessions: SessionStore::new(&config.storage),
            rewriter: QueryRewriter::new(generator.clone(), options),
            retriever: Retriever::new(embedder.clone(), config.retrieval.clone()),
            synthesizer: AnswerSynthesizer::new(generator, options),
            embedder,
            history,
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Engine wired to the configured backends, with conversation history
    /// checkpointed in each session directory.
    pub fn from_config(config: Config) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let generator = create_generator(&config.generation)?;
        let history = Arc::new(JsonlConversationStore::new(SessionStore::new(&config.storage)));
        Ok(Self::new(config, embedder, generator, history))
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Index `files` for a session (created when `session_id` is `None`).
    ///
    /// With `shared` set the index is written to the shared root instead of
    /// the session's own index directory. Any previous index at that
    /// location is replaced.
    pub async fn ingest(
        &self,
        files: &[InputFile],
        session_id: Option<&str>,
        shared: bool,
    ) -> Result<IngestReport> {
        if files.is_empty() {
            return Err(PortalError::Input("no files to ingest".to_string()));
        }
        let mut sources = Vec::with_capacity(files.len());
        for file in files {
            let source = DocumentSource::from_file_name(&file.name)?;
            if file.bytes.is_empty() {
                return Err(PortalError::Input(format!("{} is empty", file.name)));
            }
            sources.push(source);
        }

        let session = self.sessions.create_or_get(session_id)?;
        let location = if shared {
            IndexLocation::SharedRoot
        } else {
            IndexLocation::Session(session.id.clone())
        };
        let index_path = self.sessions.index_path(&location)?;

        let mut documents = Vec::with_capacity(files.len());
        for (file, source) in files.iter().zip(sources) {
            self.sessions.save_upload(&session, &file.name, &file.bytes)?;
            let pages = extract_text(source, &file.name, &file.bytes)?;
            tracing::debug!(source = %file.name, pages = pages.len(), "extracted document");
            documents.push(SourceDocument {
                source: file.name.clone(),
                pages,
            });
        }

        let pages = documents.iter().map(|d| d.pages.len()).sum();
        let chunks = split_documents(&documents, &self.config.chunking);
        let chunk_count = chunks.len();

        let lock = self.lock_for(&index_path.to_string_lossy()).await;
        let _guard = lock.lock().await;
        let index = VectorIndex::build(chunks, self.embedder.as_ref(), self.config.embedding.batch_size).await?;
        index.persist(&index_path)?;

        tracing::info!(
            session_id = %session.id,
            files = files.len(),
            pages,
            chunks = chunk_count,
            path = %index_path.display(),
            "ingest complete"
        );

        Ok(IngestReport {
            session_id: session.id,
            files: files.iter().map(|f| f.name.clone()).collect(),
            pages,
            chunks: chunk_count,
            index_path,
        })
    }

    /// Answer one question in a session's conversation.
    ///
    /// `shared` reads the shared root index instead of the session's own;
    /// history is still kept per session. `k` overrides `retrieval.top_k`
    /// for this turn only.
    pub async fn chat(
        &self,
        session_id: &str,
        question: &str,
        shared: bool,
        k: Option<usize>,
    ) -> Result<ChatReply> {
        SessionStore::validate_session_id(session_id)?;
        let question = question.trim();
        if question.is_empty() {
            return Err(PortalError::Input("question must not be empty".to_string()));
        }
        if k == Some(0) {
            return Err(PortalError::Input("k must be at least 1".to_string()));
        }

        let location = if shared {
            IndexLocation::SharedRoot
        } else {
            IndexLocation::Session(session_id.to_string())
        };
        let index_path = self.sessions.index_path(&location)?;

        let session_lock = self.lock_for(session_id).await;
        let _turn = session_lock.lock().await;

        let index = {
            let index_lock = self.lock_for(&index_path.to_string_lossy()).await;
            let _guard = index_lock.lock().await;
            VectorIndex::load(&index_path, self.embedder.as_ref())?
        };

        let history = self.history.get(session_id).await?;
        let standalone = self.rewriter.rewrite(question, &history).await?;
        let results = self.retriever.retrieve(&standalone, &index, k).await?;
        let context = self.retriever.format_context(&results);
        let answer = self.synthesizer.answer(&standalone, &context, &history).await?;

        self.history
            .append(session_id, Turn::new(question, &standalone, answer.as_str()))
            .await?;

        tracing::info!(
            session_id,
            turn = history.len() + 1,
            retrieved = results.len(),
            answered = answer.is_answered(),
            "chat turn complete"
        );

        Ok(ChatReply {
            session_id: session_id.to_string(),
            answer,
            standalone_question: standalone,
            sources: results
                .iter()
                .map(|r| SourceRef {
                    source: r.chunk.source.clone(),
                    page: r.chunk.page,
                    score: r.score,
                })
                .collect(),
        })
    }

    async fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(key.to_string())
            .or_default()
            .clone()
    }
}
