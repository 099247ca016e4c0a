//! Single-document analysis and two-document comparison.
//!
//! Each run allocates a fresh session whose scratch directory receives the
//! uploads. The inputs are also copied into the immutable input root
//! (`inputs/analysis`, `inputs/compare`), which outlives session cleanup.
//! Page text is then handed to the [`StructuredExtractor`] as one prompt.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{PortalError, Result};
use crate::extract::{extract_text, DocumentSource};
use crate::extractor::{ComparisonReport, DocumentMetadata, StructuredExtractor, StructuredRecord};
use crate::generation::{CompletionOptions, Generator};
use crate::models::{PageText, SourceDocument};
use crate::prompts;
use crate::session::{InputFlow, Session, SessionStore};

/// A validated record together with the session that produced it.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult<T> {
    pub session_id: String,
    pub record: T,
}

pub struct DocumentAnalyzer {
    sessions: SessionStore,
    extractor: StructuredExtractor,
}

impl DocumentAnalyzer {
    pub fn new(sessions: SessionStore, generator: Arc<dyn Generator>, options: CompletionOptions) -> Self {
        Self {
            sessions,
            extractor: StructuredExtractor::new(generator, options),
        }
    }

    /// Summary and metadata for one document.
    pub async fn analyze(&self, file: &Path) -> Result<AnalysisResult<DocumentMetadata>> {
        let (name, bytes) = read_input(file)?;
        self.analyze_bytes(&name, &bytes).await
    }

    pub async fn analyze_bytes(
        &self,
        name: &str,
        bytes: &[u8],
    ) -> Result<AnalysisResult<DocumentMetadata>> {
        let source = check_input(name, bytes)?;
        let session = self.sessions.create_or_get(None)?;
        let doc = self.load_input(&session, InputFlow::Analysis, source, name, bytes)?;
        let text = page_blocks(&doc.pages);
        if text.trim().is_empty() {
            return Err(PortalError::EmptyInput);
        }

        tracing::info!(
            session_id = %session.id,
            source = %doc.source,
            pages = doc.pages.len(),
            "analyzing document"
        );
        let prompt = prompts::document_analysis(&text, DocumentMetadata::schema_description());
        let record: DocumentMetadata = self.extractor.extract(&prompt).await?;
        Ok(AnalysisResult {
            session_id: session.id,
            record,
        })
    }

    /// Page-level differences between two documents. The file whose name
    /// sorts first is the REFERENCE, regardless of argument order.
    pub async fn compare(
        &self,
        file_a: &Path,
        file_b: &Path,
    ) -> Result<AnalysisResult<ComparisonReport>> {
        let a = read_input(file_a)?;
        let b = read_input(file_b)?;
        self.compare_bytes((a.0.as_str(), a.1.as_slice()), (b.0.as_str(), b.1.as_slice()))
            .await
    }

    pub async fn compare_bytes(
        &self,
        a: (&str, &[u8]),
        b: (&str, &[u8]),
    ) -> Result<AnalysisResult<ComparisonReport>> {
        if a.0 == b.0 {
            return Err(PortalError::Input(format!(
                "cannot compare {} with itself: file names must differ",
                a.0
            )));
        }
        let source_a = check_input(a.0, a.1)?;
        let source_b = check_input(b.0, b.1)?;

        let session = self.sessions.create_or_get(None)?;
        let docs = [
            self.load_input(&session, InputFlow::Compare, source_a, a.0, a.1)?,
            self.load_input(&session, InputFlow::Compare, source_b, b.0, b.1)?,
        ];
        let combined = combine_for_comparison(&docs)?;

        tracing::info!(session_id = %session.id, a = a.0, b = b.0, "comparing documents");
        let prompt = prompts::document_comparison(&combined, ComparisonReport::schema_description());
        let report: ComparisonReport = self.extractor.extract(&prompt).await?;
        if report.is_empty() {
            tracing::info!(session_id = %session.id, "no differences reported");
        }
        Ok(AnalysisResult {
            session_id: session.id,
            record: report,
        })
    }

    fn load_input(
        &self,
        session: &Session,
        flow: InputFlow,
        source: DocumentSource,
        name: &str,
        bytes: &[u8],
    ) -> Result<SourceDocument> {
        self.sessions.save_upload(session, name, bytes)?;
        self.sessions.store_root_input(flow, name, bytes)?;
        let pages = extract_text(source, name, bytes)?;
        Ok(SourceDocument {
            source: name.to_string(),
            pages,
        })
    }
}

/// Concatenate non-blank pages as `-- Page N --` blocks.
pub fn page_blocks(pages: &[PageText]) -> String {
    pages
        .iter()
        .filter(|p| !p.text.trim().is_empty())
        .map(|p| format!("-- Page {} --\n{}", p.page, p.text.trim_end()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Label two documents REFERENCE and ACTUAL by file name order and join
/// them into one comparison input.
pub fn combine_for_comparison(docs: &[SourceDocument]) -> Result<String> {
    let [first, second] = docs else {
        return Err(PortalError::Input(format!(
            "comparison needs exactly two documents, got {}",
            docs.len()
        )));
    };
    let (reference, actual) = match first.source.cmp(&second.source) {
        std::cmp::Ordering::Less => (first, second),
        std::cmp::Ordering::Greater => (second, first),
        std::cmp::Ordering::Equal => {
            return Err(PortalError::Input(format!(
                "cannot compare {} with itself: file names must differ",
                first.source
            )))
        }
    };

    Ok(format!(
        "===== REFERENCE DOCUMENT ({}) =====\n{}\n\n===== ACTUAL DOCUMENT ({}) =====\n{}\n",
        reference.source,
        page_blocks(&reference.pages),
        actual.source,
        page_blocks(&actual.pages)
    ))
}

fn check_input(name: &str, bytes: &[u8]) -> Result<DocumentSource> {
    let source = DocumentSource::from_file_name(name)?;
    if bytes.is_empty() {
        return Err(PortalError::Input(format!("{} is empty", name)));
    }
    Ok(source)
}

fn read_input(path: &Path) -> Result<(String, Vec<u8>)> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| PortalError::Input(format!("invalid file path {}", path.display())))?
        .to_string();
    let bytes = std::fs::read(path).map_err(|e| PortalError::io(path, e))?;
    Ok((name, bytes))
}
