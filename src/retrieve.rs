//! Top-k retrieval and context assembly.

use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::embedding::Embedder;
use crate::error::Result;
use crate::index::VectorIndex;
use crate::models::ScoredChunk;

/// Separator placed between chunks in the assembled context.
pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, config: RetrievalConfig) -> Self {
        Self { embedder, config }
    }

    /// The `k` (default `retrieval.top_k`) chunks closest to `question`.
    ///
    /// Results are ranked by similarity unless `retrieval.order_by_position`
    /// is set, in which case the same top-k are returned in document order.
    pub async fn retrieve(
        &self,
        question: &str,
        index: &VectorIndex,
        k: Option<usize>,
    ) -> Result<Vec<ScoredChunk>> {
        let k = k.unwrap_or(self.config.top_k);
        let vector = self.embedder.embed(question).await?;
        let mut results = index.query(&vector, k)?;
        if self.config.order_by_position {
            results.sort_by_key(|r| r.position);
        }
        tracing::debug!(
            k,
            returned = results.len(),
            top_score = results.first().map(|r| r.score),
            "retrieved chunks"
        );
        Ok(results)
    }

    /// Join chunk texts into one context string, annotated with source and
    /// page when `retrieval.cite_sources` is set.
    pub fn format_context(&self, results: &[ScoredChunk]) -> String {
        format_context(results, self.config.cite_sources)
    }
}

pub fn format_context(results: &[ScoredChunk], cite_sources: bool) -> String {
    results
        .iter()
        .map(|r| {
            if cite_sources {
                format!("[source: {}, page {}]\n{}", r.chunk.source, r.chunk.page, r.chunk.text.trim())
            } else {
                r.chunk.text.trim().to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}
