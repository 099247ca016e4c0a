//! History-aware query rewriting.
//!
//! A follow-up such as "on which page?" retrieves nothing useful on its own.
//! [`QueryRewriter::rewrite`] asks the generative backend to fold the prior
//! turns into a standalone question before retrieval.

use std::sync::Arc;

use crate::error::Result;
use crate::generation::{CompletionOptions, Generator};
use crate::models::Turn;
use crate::prompts;

pub struct QueryRewriter {
    generator: Arc<dyn Generator>,
    options: CompletionOptions,
}

impl QueryRewriter {
    pub fn new(generator: Arc<dyn Generator>, options: CompletionOptions) -> Self {
        Self { generator, options }
    }

    /// Standalone form of `question`.
    ///
    /// With no history the question is returned as-is and the backend is not
    /// called. An empty reply falls back to the original question; backend
    /// errors propagate.
    pub async fn rewrite(&self, question: &str, history: &[Turn]) -> Result<String> {
        if history.is_empty() {
            return Ok(question.to_string());
        }

        let prompt = prompts::contextualize_question(history, question);
        let reply = self.generator.complete(&prompt, &self.options).await?;
        let rewritten = clean_reply(&reply);

        if rewritten.is_empty() {
            tracing::warn!("rewriter returned an empty question, using the original");
            return Ok(question.to_string());
        }

        tracing::debug!(original = question, rewritten = %rewritten, "rewrote question");
        Ok(rewritten)
    }
}

/// Drop a leading label and wrapping quotes some models add.
fn clean_reply(reply: &str) -> String {
    let mut text = reply.trim();
    if let Some(rest) = text
        .strip_prefix("Standalone question:")
        .or_else(|| text.strip_prefix("standalone question:"))
    {
        text = rest.trim();
    }
    for (open, close) in [('"', '"'), ('\'', '\''), ('“', '”')] {
        if text.len() >= 2 && text.starts_with(open) && text.ends_with(close) {
            text = text[open.len_utf8()..text.len() - close.len_utf8()].trim();
        }
    }
    text.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PortalError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedGenerator {
        reply: String,
        calls: AtomicUsize,
    }

    impl FixedGenerator {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Generator for FixedGenerator {
        fn model_name(&self) -> &str {
            "fixed"
        }
        async fn complete(&self, _prompt: &str, _options: &CompletionOptions) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.reply.clone())
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl Generator for FailingGenerator {
        fn model_name(&self) -> &str {
            "failing"
        }
        async fn complete(&self, _prompt: &str, _options: &CompletionOptions) -> Result<String> {
            Err(PortalError::Backend("down".to_string()))
        }
    }

    fn history() -> Vec<Turn> {
        vec![Turn::new("what changed?", "what changed?", "The delivery fee rose.")]
    }

    #[tokio::test]
    async fn test_empty_history_is_noop_without_backend_call() {
        let generator = FixedGenerator::new("should not be used");
        let rewriter = QueryRewriter::new(generator.clone(), CompletionOptions::default());
        for q in ["what changed?", "", "  spaced  ", "on which page?"] {
            assert_eq!(rewriter.rewrite(q, &[]).await.unwrap(), q);
        }
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rewrites_with_history() {
        let generator = FixedGenerator::new("  \"On which page did the delivery fee change?\"\n");
        let rewriter = QueryRewriter::new(generator.clone(), CompletionOptions::default());
        let out = rewriter.rewrite("on which page?", &history()).await.unwrap();
        assert_eq!(out, "On which page did the delivery fee change?");
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_reply_falls_back() {
        let rewriter = QueryRewriter::new(FixedGenerator::new("   "), CompletionOptions::default());
        let out = rewriter.rewrite("on which page?", &history()).await.unwrap();
        assert_eq!(out, "on which page?");
    }

    #[tokio::test]
    async fn test_backend_error_propagates() {
        let rewriter = QueryRewriter::new(Arc::new(FailingGenerator), CompletionOptions::default());
        let err = rewriter.rewrite("on which page?", &history()).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Backend);
    }

    #[test]
    fn test_clean_reply_strips_label() {
        assert_eq!(clean_reply("Standalone question: Which fee?"), "Which fee?");
        assert_eq!(clean_reply("“Which fee?”"), "Which fee?");
        assert_eq!(clean_reply("\""), "\"");
    }
}
