//! Core data models shared by the ingestion, retrieval and chat pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Text of one physical page, as returned by extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageText {
    /// 1-based page number.
    pub page: u32,
    pub text: String,
}

/// Extracted pages of one named source file, in physical page order.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    /// Original file name, used for citations.
    pub source: String,
    pub pages: Vec<PageText>,
}

/// A contiguous span of a page's text, the unit of embedding and retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Deterministic id derived from provenance and text.
    pub id: String,
    pub source: String,
    pub page: u32,
    /// Sequence index within `source`, contiguous from 0.
    pub index: u32,
    pub text: String,
    /// Byte offset of the span start within the page text.
    pub start: usize,
    /// Byte offset one past the span end.
    pub end: usize,
    /// SHA-256 hex of `text`.
    pub hash: String,
}

/// A chunk returned from similarity search.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// Cosine similarity in `[-1.0, 1.0]`; higher is closer.
    pub score: f32,
    /// Position of the chunk in the index, used as the tie-breaker.
    pub position: usize,
}

/// One question/answer exchange. Never mutated once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub question: String,
    /// The history-resolved question actually used for retrieval.
    pub standalone_question: String,
    pub answer: String,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    pub fn new(question: &str, standalone_question: &str, answer: &str) -> Self {
        Self {
            question: question.to_string(),
            standalone_question: standalone_question.to_string(),
            answer: answer.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// Sentinel returned for valid questions the documents cannot answer.
pub const NO_ANSWER: &str = "No Answer";

/// Outcome of answer synthesis. An unanswerable question is a normal result,
/// not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    Text(String),
    NoAnswer,
}

impl Answer {
    pub fn as_str(&self) -> &str {
        match self {
            Answer::Text(text) => text,
            Answer::NoAnswer => NO_ANSWER,
        }
    }

    pub fn is_answered(&self) -> bool {
        matches!(self, Answer::Text(_))
    }
}

impl std::fmt::Display for Answer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Answer {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}
