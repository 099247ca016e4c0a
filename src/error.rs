//! Error taxonomy for the document portal.
//!
//! Every library operation returns [`PortalError`]. Variants are grouped
//! into five user-facing [`ErrorKind`]s; the CLI turns a kind into a stable
//! process exit code and a structured JSON error body.
//!
//! | Kind | Variants | Retried |
//! |------|----------|---------|
//! | `input` | [`Input`](PortalError::Input) | never |
//! | `extraction` | [`Extraction`](PortalError::Extraction), [`EncryptedDocument`](PortalError::EncryptedDocument) | never |
//! | `index` | [`IndexNotFound`](PortalError::IndexNotFound), [`DimensionMismatch`](PortalError::DimensionMismatch), [`EmptyInput`](PortalError::EmptyInput), [`CorruptIndex`](PortalError::CorruptIndex) | never |
//! | `backend` | [`Backend`](PortalError::Backend) | only by the structured repair step |
//! | `structured_output` | [`StructuredOutput`](PortalError::StructuredOutput) | never |

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PortalError {
    /// Unsupported file type, empty upload, bad or missing session id.
    #[error("invalid input: {0}")]
    Input(String),

    /// The source document could not be decoded.
    #[error("text extraction failed for {source_name}: {message}")]
    Extraction {
        source_name: String,
        message: String,
    },

    #[error("document {0} is encrypted and cannot be read without credentials")]
    EncryptedDocument(String),

    #[error("no vector index found at {}", .0.display())]
    IndexNotFound(PathBuf),

    #[error("embedding dimension mismatch: index has {expected}, embedder produces {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("cannot build an index from an empty corpus")]
    EmptyInput,

    #[error("vector index at {} is corrupt: {message}", path.display())]
    CorruptIndex { path: PathBuf, message: String },

    /// Embedding or generation backend unreachable, rate-limited, or
    /// returning a response of the wrong shape.
    #[error("backend unavailable: {0}")]
    Backend(String),

    /// Structured output still failed validation after the repair attempt.
    /// `raw` is the last reply received, kept for diagnostics.
    #[error("structured output invalid: {message}")]
    StructuredOutput { message: String, raw: String },

    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// User-facing error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Input,
    Extraction,
    Index,
    Backend,
    StructuredOutput,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Input => "input",
            ErrorKind::Extraction => "extraction",
            ErrorKind::Index => "index",
            ErrorKind::Backend => "backend",
            ErrorKind::StructuredOutput => "structured_output",
        }
    }

    /// Process exit code for the CLI. `1` is left for bootstrap failures.
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::Input => 2,
            ErrorKind::Extraction => 3,
            ErrorKind::Index => 4,
            ErrorKind::Backend => 5,
            ErrorKind::StructuredOutput => 6,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PortalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PortalError::Input(_) => ErrorKind::Input,
            PortalError::Extraction { .. } | PortalError::EncryptedDocument(_) => {
                ErrorKind::Extraction
            }
            PortalError::IndexNotFound(_)
            | PortalError::DimensionMismatch { .. }
            | PortalError::EmptyInput
            | PortalError::CorruptIndex { .. } => ErrorKind::Index,
            PortalError::Backend(_) => ErrorKind::Backend,
            PortalError::StructuredOutput { .. } => ErrorKind::StructuredOutput,
            PortalError::Io { source, .. } => match source.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                    ErrorKind::Input
                }
                _ => ErrorKind::Index,
            },
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PortalError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn backend<E: std::fmt::Display>(err: E) -> Self {
        PortalError::Backend(err.to_string())
    }

    pub fn extraction(source_name: &str, message: impl Into<String>) -> Self {
        PortalError::Extraction {
            source_name: source_name.to_string(),
            message: message.into(),
        }
    }

    /// JSON body printed by the CLI.
    pub fn to_json(&self) -> serde_json::Value {
        let mut body = serde_json::json!({
            "kind": self.kind(),
            "message": self.to_string(),
        });
        if let PortalError::StructuredOutput { raw, .. } = self {
            body["raw_output"] = serde_json::Value::String(raw.clone());
        }
        serde_json::json!({ "error": body })
    }
}

pub type Result<T> = std::result::Result<T, PortalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_variants_share_kind() {
        assert_eq!(PortalError::EmptyInput.kind(), ErrorKind::Index);
        assert_eq!(
            PortalError::IndexNotFound(PathBuf::from("/tmp/x")).kind(),
            ErrorKind::Index
        );
        assert_eq!(
            PortalError::DimensionMismatch {
                expected: 3,
                actual: 4
            }
            .kind(),
            ErrorKind::Index
        );
    }

    #[test]
    fn test_exit_codes_are_distinct() {
        let kinds = [
            ErrorKind::Input,
            ErrorKind::Extraction,
            ErrorKind::Index,
            ErrorKind::Backend,
            ErrorKind::StructuredOutput,
        ];
        let mut codes: Vec<i32> = kinds.iter().map(|k| k.exit_code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), kinds.len());
        assert!(!codes.contains(&0) && !codes.contains(&1));
    }

    #[test]
    fn test_json_body_names_kind_and_raw_output() {
        let err = PortalError::StructuredOutput {
            message: "missing field `Title`".to_string(),
            raw: "{oops".to_string(),
        };
        let json = err.to_json();
        assert_eq!(json["error"]["kind"], "structured_output");
        assert_eq!(json["error"]["raw_output"], "{oops");
        assert!(json["error"]["message"]
            .as_str()
            .unwrap()
            .contains("missing field"));
    }

    #[test]
    fn test_encrypted_is_extraction_kind() {
        let err = PortalError::EncryptedDocument("secret.pdf".to_string());
        assert_eq!(err.kind(), ErrorKind::Extraction);
        assert!(err.to_string().contains("secret.pdf"));
    }
}
