//! # Docportal CLI (`docportal`)
//!
//! ## Usage
//!
//! ```bash
//! docportal --config ./config/docportal.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docportal ingest <files..>` | Build a session index from documents |
//! | `docportal chat <session> [question] [--k N]` | Ask a question (or read questions from stdin) |
//! | `docportal analyze <file>` | Summary and metadata of one document |
//! | `docportal compare <a> <b>` | Page-level differences between two documents |
//! | `docportal sessions` | List sessions |
//! | `docportal cleanup <session>` | Remove a session's working directory |
//!
//! Results are printed to stdout as JSON; `analyze` and `compare` wrap
//! their record as `{"session_id":..,"record":..}`. Failures print
//! `{"error":{"kind":..,"message":..}}` to stderr and exit with the code of
//! their error kind (input 2, extraction 3, index 4, backend 5,
//! structured_output 6). Configuration problems exit with 1.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};

use docportal::analysis::DocumentAnalyzer;
use docportal::chat::{ChatEngine, InputFile};
use docportal::config::{self, Config};
use docportal::error::{PortalError, Result};
use docportal::generation::{create_generator, CompletionOptions};
use docportal::logging;
use docportal::session::SessionStore;

/// Docportal: chat with, analyze and compare documents.
#[derive(Parser)]
#[command(
    name = "docportal",
    about = "Session-scoped document chat, analysis and comparison",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/docportal.toml`; built-in defaults are used
    /// when the file does not exist.
    #[arg(long, global = true, default_value = "./config/docportal.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index documents for a chat session.
    ///
    /// Prints the session id to use with `chat`. Re-ingesting into an
    /// existing session replaces its index.
    Ingest {
        /// PDF, DOCX, TXT or MD files.
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Session to ingest into; a new one is created when omitted.
        #[arg(long)]
        session: Option<String>,

        /// Write the shared root index instead of the session's own.
        #[arg(long)]
        shared: bool,

        /// Override `chunking.chunk_size` for this ingest.
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Override `chunking.chunk_overlap` for this ingest.
        #[arg(long)]
        chunk_overlap: Option<usize>,
    },

    /// Ask a question in a session.
    ///
    /// Without a question, reads one question per line from stdin and
    /// answers them in order.
    Chat {
        session: String,

        question: Option<String>,

        /// Answer from the shared root index.
        #[arg(long)]
        shared: bool,

        /// Number of chunks to retrieve (default `retrieval.top_k`).
        #[arg(long)]
        k: Option<usize>,
    },

    /// Summarize a document and extract its metadata.
    Analyze { file: PathBuf },

    /// Compare two documents page by page.
    ///
    /// The file whose name sorts first is the reference.
    Compare { file_a: PathBuf, file_b: PathBuf },

    /// List known sessions.
    Sessions,

    /// Remove a session's working directory. Its index and stored inputs
    /// are kept.
    Cleanup { session: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_or_default(&cli.config)?;
    logging::init(&cfg.logging);

    if let Err(err) = run(cli.command, cfg).await {
        tracing::debug!(error = ?err, "command failed");
        eprintln!("{}", err.to_json());
        std::process::exit(err.kind().exit_code());
    }
    Ok(())
}

async fn run(command: Commands, cfg: Config) -> Result<()> {
    match command {
        Commands::Ingest {
            files,
            session,
            shared,
            chunk_size,
            chunk_overlap,
        } => {
            let mut cfg = cfg;
            if let Some(size) = chunk_size {
                cfg.chunking.chunk_size = size;
            }
            if let Some(overlap) = chunk_overlap {
                cfg.chunking.chunk_overlap = overlap;
            }
            config::validate(&cfg).map_err(|e| PortalError::Input(e.to_string()))?;

            let inputs = files
                .iter()
                .map(|path| InputFile::read(path))
                .collect::<Result<Vec<_>>>()?;
            let engine = ChatEngine::from_config(cfg)?;
            let report = engine.ingest(&inputs, session.as_deref(), shared).await?;
            print_json(&report);
        }
        Commands::Chat {
            session,
            question,
            shared,
            k,
        } => {
            let engine = ChatEngine::from_config(cfg)?;
            match question {
                Some(question) => {
                    let reply = engine.chat(&session, &question, shared, k).await?;
                    print_json(&reply);
                }
                None => {
                    let mut lines = BufReader::new(tokio::io::stdin()).lines();
                    while let Some(line) = lines
                        .next_line()
                        .await
                        .map_err(|e| PortalError::io("<stdin>", e))?
                    {
                        if line.trim().is_empty() {
                            continue;
                        }
                        let reply = engine.chat(&session, &line, shared, k).await?;
                        print_json(&reply);
                    }
                }
            }
        }
        Commands::Analyze { file } => {
            let analyzer = analyzer(&cfg)?;
            let result = analyzer.analyze(&file).await?;
            print_json(&result);
        }
        Commands::Compare { file_a, file_b } => {
            let analyzer = analyzer(&cfg)?;
            let result = analyzer.compare(&file_a, &file_b).await?;
            print_json(&result);
        }
        Commands::Sessions => {
            let store = SessionStore::new(&cfg.storage);
            print_json(&store.list_sessions()?);
        }
        Commands::Cleanup { session } => {
            let store = SessionStore::new(&cfg.storage);
            let removed = store.cleanup(&session)?;
            print_json(&serde_json::json!({ "session_id": session, "removed": removed }));
        }
    }
    Ok(())
}

fn analyzer(cfg: &Config) -> Result<DocumentAnalyzer> {
    let generator = create_generator(&cfg.generation)?;
    Ok(DocumentAnalyzer::new(
        SessionStore::new(&cfg.storage),
        generator,
        CompletionOptions::from(&cfg.generation),
    ))
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => tracing::error!(error = %e, "failed to serialize output"),
    }
}
