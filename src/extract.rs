//! Page-ordered text extraction for PDF, DOCX and plain-text sources.
//!
//! The format is chosen once from the file extension as a
//! [`DocumentSource`]; [`extract_text`] then dispatches on it. Pages are
//! always returned in physical order and numbered from 1. Empty pages are
//! kept here; the chunker skips them.

use std::io::Read;
use std::path::Path;

use crate::error::{PortalError, Result};
use crate::models::PageText;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Supported input formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentSource {
    Pdf,
    Docx,
    /// Plain text and Markdown.
    Text,
}

impl DocumentSource {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(DocumentSource::Pdf),
            "docx" => Some(DocumentSource::Docx),
            "txt" | "md" => Some(DocumentSource::Text),
            _ => None,
        }
    }

    /// Resolve the format of a file name, or fail with an input error.
    pub fn from_file_name(name: &str) -> Result<Self> {
        Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
            .ok_or_else(|| {
                PortalError::Input(format!(
                    "unsupported file type: {} (supported: .pdf, .docx, .txt, .md)",
                    name
                ))
            })
    }
}

/// Read `path` and extract its pages.
pub fn extract_file(path: &Path) -> Result<Vec<PageText>> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    let source = DocumentSource::from_file_name(&name)?;
    let bytes = std::fs::read(path).map_err(|e| PortalError::io(path, e))?;
    extract_text(source, &name, &bytes)
}

/// Extract ordered `(page, text)` pairs from raw bytes.
///
/// `name` is only used in error messages.
pub fn extract_text(source: DocumentSource, name: &str, bytes: &[u8]) -> Result<Vec<PageText>> {
    match source {
        DocumentSource::Pdf => extract_pdf(name, bytes),
        DocumentSource::Docx => extract_docx(name, bytes),
        DocumentSource::Text => extract_plain(name, bytes),
    }
}

fn extract_pdf(name: &str, bytes: &[u8]) -> Result<Vec<PageText>> {
    if !bytes.starts_with(b"%PDF") {
        return Err(PortalError::extraction(name, "not a PDF file"));
    }
    if is_encrypted_pdf(bytes) {
        return Err(PortalError::EncryptedDocument(name.to_string()));
    }
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| PortalError::extraction(name, e.to_string()))?;
    Ok(pages
        .into_iter()
        .enumerate()
        .map(|(i, text)| PageText {
            page: i as u32 + 1,
            text,
        })
        .collect())
}

/// A PDF carrying an `/Encrypt` dictionary in its trailer needs credentials.
fn is_encrypted_pdf(bytes: &[u8]) -> bool {
    const MARKER: &[u8] = b"/Encrypt";
    bytes.windows(MARKER.len()).any(|w| w == MARKER)
}

fn extract_plain(name: &str, bytes: &[u8]) -> Result<Vec<PageText>> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| PortalError::extraction(name, format!("not valid UTF-8: {}", e)))?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    // Form feeds mark page breaks in plain-text exports.
    Ok(text
        .split('\u{000c}')
        .enumerate()
        .map(|(i, page)| PageText {
            page: i as u32 + 1,
            text: page.to_string(),
        })
        .collect())
}

/// Password-protected OOXML files are wrapped in an OLE compound file
/// instead of a ZIP archive.
const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

fn extract_docx(name: &str, bytes: &[u8]) -> Result<Vec<PageText>> {
    if bytes.starts_with(OLE_MAGIC) {
        return Err(PortalError::EncryptedDocument(name.to_string()));
    }
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| PortalError::extraction(name, e.to_string()))?;
    let doc_xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)
        .map_err(|e| PortalError::extraction(name, e))?;
    let text = extract_paragraphs(&doc_xml).map_err(|e| PortalError::extraction(name, e))?;
    Ok(vec![PageText { page: 1, text }])
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    entry_name: &str,
    max_bytes: u64,
) -> std::result::Result<Vec<u8>, String> {
    let entry = archive.by_name(entry_name).map_err(|e| e.to_string())?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| e.to_string())?;
    if out.len() as u64 >= max_bytes {
        return Err(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            entry_name, max_bytes
        ));
    }
    Ok(out)
}

/// Collect `w:t` runs, turning paragraph ends and breaks into newlines.
fn extract_paragraphs(xml: &[u8]) -> std::result::Result<String, String> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"br" | b"cr" => out.push('\n'),
                b"tab" => out.push('\t'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}
