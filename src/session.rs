//! Session working directories and immutable input roots.
//!
//! ```text
//! <data_dir>/
//! ├── sessions/<id>/
//! │   ├── uploads/        mutable scratch copies of uploaded files
//! │   └── history.jsonl   conversation checkpoint
//! └── inputs/<flow>/      canonical analysis/compare inputs, never cleaned up
//! <index_dir>/
//! ├── <id>/               per-session vector index
//! └── manifest.json ...   shared root index
//! ```
//!
//! [`SessionStore::cleanup`] deletes only `sessions/<id>`. Indexes and root
//! inputs outlive their session.

use std::path::{Path, PathBuf};

use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::config::StorageConfig;
use crate::error::{PortalError, Result};
use crate::index::IndexLocation;

const SESSIONS_DIR: &str = "sessions";
const INPUTS_DIR: &str = "inputs";
const UPLOADS_DIR: &str = "uploads";
const HISTORY_FILE: &str = "history.jsonl";

/// A located session working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub dir: PathBuf,
}

impl Session {
    pub fn uploads_dir(&self) -> PathBuf {
        self.dir.join(UPLOADS_DIR)
    }

    pub fn history_path(&self) -> PathBuf {
        self.dir.join(HISTORY_FILE)
    }
}

/// Immutable input roots used by the non-chat flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFlow {
    Analysis,
    Compare,
}

impl InputFlow {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputFlow::Analysis => "analysis",
            InputFlow::Compare => "compare",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    data_dir: PathBuf,
    index_dir: PathBuf,
}

impl SessionStore {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            data_dir: config.data_dir.clone(),
            index_dir: config.index_dir.clone(),
        }
    }

    /// `session_<UTC yyyymmdd_HHMMSS>_<8 hex>`.
    pub fn generate_session_id() -> String {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!(
            "session_{}_{}",
            Utc::now().format("%Y%m%d_%H%M%S"),
            &suffix[..8]
        )
    }

    /// Accept only ids that are safe as a single path component.
    pub fn validate_session_id(id: &str) -> Result<()> {
        if id.is_empty() {
            return Err(PortalError::Input("session id is required".to_string()));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(PortalError::Input(format!(
                "invalid session id {:?}: only letters, digits, '_' and '-' are allowed",
                id
            )));
        }
        Ok(())
    }

    /// Locate a session, creating its directories. A missing id gets a
    /// freshly generated one.
    pub fn create_or_get(&self, session_id: Option<&str>) -> Result<Session> {
        let id = match session_id {
            Some(id) => {
                Self::validate_session_id(id)?;
                id.to_string()
            }
            None => Self::generate_session_id(),
        };
        let session = Session {
            dir: self.session_dir(&id),
            id,
        };
        let uploads = session.uploads_dir();
        std::fs::create_dir_all(&uploads).map_err(|e| PortalError::io(&uploads, e))?;
        tracing::debug!(session_id = %session.id, path = %session.dir.display(), "session ready");
        Ok(session)
    }

    /// Locate an existing session without creating anything.
    pub fn get(&self, session_id: &str) -> Result<Option<Session>> {
        Self::validate_session_id(session_id)?;
        let dir = self.session_dir(session_id);
        Ok(dir.is_dir().then(|| Session {
            id: session_id.to_string(),
            dir,
        }))
    }

    /// Copy an uploaded file into the session's scratch directory as
    /// `<sanitised stem>_<8 hex><ext>`, so uploads whose names sanitise
    /// alike never collide. Returns the saved path.
    pub fn save_upload(&self, session: &Session, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let name = sanitize_file_name(file_name)?;
        let (stem, ext) = split_extension(&name);
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let path = session
            .uploads_dir()
            .join(format!("{}_{}{}", stem, &suffix[..8], ext));
        std::fs::write(&path, bytes).map_err(|e| PortalError::io(&path, e))?;
        tracing::debug!(session_id = %session.id, path = %path.display(), bytes = bytes.len(), "saved upload");
        Ok(path)
    }

    /// Store a canonical input under `inputs/<flow>/`. Existing files are
    /// never overwritten: identical content is reused, different content is
    /// stored under `<stem>_<sha8>.<ext>`.
    pub fn store_root_input(&self, flow: InputFlow, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let name = sanitize_file_name(file_name)?;
        let root = self.data_dir.join(INPUTS_DIR).join(flow.as_str());
        std::fs::create_dir_all(&root).map_err(|e| PortalError::io(&root, e))?;

        let mut path = root.join(&name);
        if path.exists() {
            let existing = std::fs::read(&path).map_err(|e| PortalError::io(&path, e))?;
            if existing == bytes {
                return Ok(path);
            }
            let digest = hex::encode(Sha256::digest(bytes));
            let (stem, ext) = split_extension(&name);
            path = root.join(format!("{}_{}{}", stem, &digest[..8], ext));
            if path.exists() {
                return Ok(path);
            }
        }

        std::fs::write(&path, bytes).map_err(|e| PortalError::io(&path, e))?;
        tracing::info!(flow = flow.as_str(), path = %path.display(), "stored input");
        Ok(path)
    }

    /// Directory holding the index for `location`.
    pub fn index_path(&self, location: &IndexLocation) -> Result<PathBuf> {
        match location {
            IndexLocation::Session(id) => {
                Self::validate_session_id(id)?;
                Ok(self.index_dir.join(id))
            }
            IndexLocation::SharedRoot => Ok(self.index_dir.clone()),
        }
    }

    /// Remove the session's mutable directory. Already-absent sessions are
    /// logged, not reported as errors.
    pub fn cleanup(&self, session_id: &str) -> Result<bool> {
        Self::validate_session_id(session_id)?;
        let dir = self.session_dir(session_id);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {
                tracing::info!(session_id, "session cleaned up");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(session_id, "session already absent, nothing to clean up");
                Ok(false)
            }
            Err(e) => Err(PortalError::io(&dir, e)),
        }
    }

    /// Known session ids, sorted.
    pub fn list_sessions(&self) -> Result<Vec<String>> {
        let root = self.data_dir.join(SESSIONS_DIR);
        let entries = match std::fs::read_dir(&root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PortalError::io(&root, e)),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| PortalError::io(&root, e))?;
            if entry.path().is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    ids.push(name.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn session_dir(&self, id: &str) -> PathBuf {
        self.data_dir.join(SESSIONS_DIR).join(id)
    }
}

/// Lowercase the stem, replace anything but ASCII alphanumerics with `_`,
/// keep the (lowercased) extension.
pub fn sanitize_file_name(file_name: &str) -> Result<String> {
    let base = Path::new(file_name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");
    let (stem, ext) = split_extension(base);
    let stem: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() {
        return Err(PortalError::Input(format!("invalid file name {:?}", file_name)));
    }
    Ok(format!("{}{}", stem, ext.to_ascii_lowercase()))
}

/// Split `name.ext` into (`name`, `.ext`); no extension gives an empty one.
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) if pos > 0 => (&name[..pos], &name[pos..]),
        _ => (name, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(tmp: &TempDir) -> SessionStore {
        SessionStore::new(&StorageConfig {
            data_dir: tmp.path().join("data"),
            index_dir: tmp.path().join("index"),
        })
    }

    #[test]
    fn test_generated_id_shape() {
        let id = SessionStore::generate_session_id();
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 4, "{}", id);
        assert_eq!(parts[0], "session");
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2].len(), 6);
        assert_eq!(parts[3].len(), 8);
        assert!(parts[3].chars().all(|c| c.is_ascii_hexdigit()));
        assert!(SessionStore::validate_session_id(&id).is_ok());
        assert_ne!(id, SessionStore::generate_session_id());
    }

    #[test]
    fn test_rejects_path_escaping_ids() {
        for bad in ["", "../x", "a/b", "a b", "s1\\..", "."] {
            let err = SessionStore::validate_session_id(bad).unwrap_err();
            assert_eq!(err.kind(), crate::error::ErrorKind::Input, "{:?}", bad);
        }
    }

    #[test]
    fn test_create_or_get_reuses_directory() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let s1 = store.create_or_get(Some("s1")).unwrap();
        let saved = store.save_upload(&s1, "Notes.txt", b"hello").unwrap();
        let again = store.create_or_get(Some("s1")).unwrap();
        assert_eq!(s1, again);
        assert!(saved.starts_with(again.uploads_dir()));
        assert!(saved.exists());
    }

    #[test]
    fn test_save_upload_sanitizes_name() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let session = store.create_or_get(None).unwrap();
        let path = store
            .save_upload(&session, "../Q3 Report (final).PDF", b"%PDF")
            .unwrap();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("q3_report__final__"), "{}", name);
        assert!(name.ends_with(".pdf"), "{}", name);
        assert_eq!(name.len(), "q3_report__final__".len() + 8 + ".pdf".len());
        assert!(path.starts_with(session.uploads_dir()));
    }

    #[test]
    fn test_uploads_sanitising_alike_do_not_collide() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let session = store.create_or_get(Some("s1")).unwrap();
        let upper = store.save_upload(&session, "Report.txt", b"upper").unwrap();
        let lower = store.save_upload(&session, "report.txt", b"lower").unwrap();

        assert_ne!(upper, lower);
        assert_eq!(std::fs::read(&upper).unwrap(), b"upper");
        assert_eq!(std::fs::read(&lower).unwrap(), b"lower");
    }

    #[test]
    fn test_root_input_never_overwritten() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let first = store.store_root_input(InputFlow::Compare, "a.txt", b"one").unwrap();
        let same = store.store_root_input(InputFlow::Compare, "a.txt", b"one").unwrap();
        let other = store.store_root_input(InputFlow::Compare, "a.txt", b"two").unwrap();

        assert_eq!(first, same);
        assert_ne!(first, other);
        assert_eq!(std::fs::read(&first).unwrap(), b"one");
        assert_eq!(std::fs::read(&other).unwrap(), b"two");
        let other_name = other.file_name().unwrap().to_str().unwrap();
        assert!(other_name.starts_with("a_") && other_name.ends_with(".txt"));
    }

    #[test]
    fn test_cleanup_is_idempotent_and_keeps_inputs() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let session = store.create_or_get(Some("s1")).unwrap();
        let input = store.store_root_input(InputFlow::Analysis, "a.txt", b"keep").unwrap();
        let index_dir = store.index_path(&IndexLocation::Session("s1".into())).unwrap();
        std::fs::create_dir_all(&index_dir).unwrap();

        assert!(store.cleanup("s1").unwrap());
        assert!(!session.dir.exists());
        assert!(!store.cleanup("s1").unwrap());
        assert!(input.exists());
        assert!(index_dir.exists());
    }

    #[test]
    fn test_list_sessions_sorted() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        assert!(store.list_sessions().unwrap().is_empty());
        store.create_or_get(Some("s2")).unwrap();
        store.create_or_get(Some("s1")).unwrap();
        assert_eq!(store.list_sessions().unwrap(), vec!["s1", "s2"]);
    }

    #[test]
    fn test_index_paths() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let shared = store.index_path(&IndexLocation::SharedRoot).unwrap();
        let s1 = store.index_path(&IndexLocation::Session("s1".into())).unwrap();
        assert_eq!(s1, shared.join("s1"));
        assert!(store
            .index_path(&IndexLocation::Session("../s1".into()))
            .is_err());
    }
}
