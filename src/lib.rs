//! # Docportal
//!
//! Session-scoped document chat, analysis and comparison over a local
//! retrieval-augmented pipeline.
//!
//! Uploaded documents are split into overlapping chunks, embedded, and
//! persisted as a per-session vector index. Chat turns rewrite follow-up
//! questions against the session's history, retrieve the closest chunks and
//! answer from them. Analysis and comparison ask the generative backend for
//! schema-checked JSON, with one bounded repair attempt.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────────┐
//! │ Extract  │──▶│  Chunk   │──▶│ Vector index │  (per session, on disk)
//! │ PDF/DOCX │   │ +overlap │   │  + embedder  │
//! └──────────┘   └──────────┘   └──────┬───────┘
//!                                      │
//!       history ──▶ rewrite ──▶ retrieve ──▶ answer ──▶ turn appended
//!
//! ┌──────────┐   ┌────────────────────────────────┐
//! │ Extract  │──▶│ Structured extractor (+repair) │──▶ metadata / changes
//! └──────────┘   └────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docportal ingest contract_v1.pdf contract_v2.pdf --session s1
//! docportal chat s1 "what changed?"
//! docportal chat s1 "on which page?"
//! docportal analyze report.docx
//! docportal compare contract_v1.pdf contract_v2.pdf
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy and exit codes |
//! | [`logging`] | Tracing subscriber setup |
//! | [`models`] | Core data types |
//! | [`extract`] | Page-ordered text extraction |
//! | [`session`] | Session directories and immutable inputs |
//! | [`chunk`] | Text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`generation`] | Generative provider abstraction |
//! | [`prompts`] | Prompt templates |
//! | [`index`] | Persisted vector index |
//! | [`history`] | Conversation stores |
//! | [`rewrite`] | History-aware query rewriting |
//! | [`retrieve`] | Top-k retrieval and context assembly |
//! | [`answer`] | Context-grounded answers |
//! | [`chat`] | Ingest and chat orchestration |
//! | [`extractor`] | Structured output with repair |
//! | [`analysis`] | Document analysis and comparison |

pub mod analysis;
pub mod answer;
pub mod chat;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod extractor;
pub mod generation;
pub mod history;
mod http;
pub mod index;
pub mod logging;
pub mod models;
pub mod prompts;
pub mod retrieve;
pub mod rewrite;
pub mod session;
