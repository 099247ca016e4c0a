//! Conversation state: ordered, append-only turns keyed by session id.
//!
//! The store is an explicit object handed to the chat engine rather than a
//! process-global map. Two backings are provided:
//!
//! - [`InMemoryConversationStore`] lives for the process lifetime.
//! - [`JsonlConversationStore`] also appends each turn to
//!   `sessions/<id>/history.jsonl`, so separate CLI invocations continue the
//!   same conversation.
//!
//! Both keep one lock per session behind a briefly held outer map lock, so
//! unrelated sessions never wait on each other's turns. The JSONL store
//! reads a session's checkpoint under that session's own lock.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{PortalError, Result};
use crate::models::Turn;
use crate::session::SessionStore;

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// All turns of `session_id`, oldest first. Unknown sessions are empty.
    async fn get(&self, session_id: &str) -> Result<Vec<Turn>>;
    async fn append(&self, session_id: &str, turn: Turn) -> Result<()>;
}

/// Turns of one session. `loaded` records that the on-disk checkpoint has
/// been read into `turns`.
#[derive(Default)]
struct SessionLog {
    turns: Vec<Turn>,
    loaded: bool,
}

type TurnLog = Arc<RwLock<SessionLog>>;

#[derive(Default)]
struct SessionMap {
    sessions: RwLock<HashMap<String, TurnLog>>,
}

impl SessionMap {
    async fn existing(&self, session_id: &str) -> Option<TurnLog> {
        self.sessions.read().await.get(session_id).cloned()
    }

    async fn entry(&self, session_id: &str) -> TurnLog {
        if let Some(log) = self.existing(session_id).await {
            return log;
        }
        self.sessions
            .write()
            .await
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }
}

#[derive(Default)]
pub struct InMemoryConversationStore {
    map: SessionMap,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn get(&self, session_id: &str) -> Result<Vec<Turn>> {
        match self.map.existing(session_id).await {
            Some(log) => Ok(log.read().await.turns.clone()),
            None => Ok(Vec::new()),
        }
    }

    async fn append(&self, session_id: &str, turn: Turn) -> Result<()> {
        let log = self.map.entry(session_id).await;
        log.write().await.turns.push(turn);
        Ok(())
    }
}

/// Conversation store checkpointed as JSON lines in the session directory.
pub struct JsonlConversationStore {
    store: SessionStore,
    map: SessionMap,
}

impl JsonlConversationStore {
    pub fn new(store: SessionStore) -> Self {
        Self {
            store,
            map: SessionMap::default(),
        }
    }

    fn path(&self, session_id: &str) -> Result<PathBuf> {
        SessionStore::validate_session_id(session_id)?;
        Ok(self.store.create_or_get(Some(session_id))?.history_path())
    }

    /// Session log with the on-disk checkpoint read into it on first use.
    async fn log(&self, session_id: &str) -> Result<TurnLog> {
        SessionStore::validate_session_id(session_id)?;
        let log = self.map.entry(session_id).await;
        if log.read().await.loaded {
            return Ok(log);
        }

        let mut entry = log.write().await;
        if !entry.loaded {
            let path = self.path(session_id)?;
            entry.turns = read_turns(&path)?;
            entry.loaded = true;
            tracing::debug!(session_id, turns = entry.turns.len(), "loaded conversation checkpoint");
        }
        drop(entry);
        Ok(log)
    }
}

#[async_trait]
impl ConversationStore for JsonlConversationStore {
    async fn get(&self, session_id: &str) -> Result<Vec<Turn>> {
        let log = self.log(session_id).await?;
        let turns = log.read().await.turns.clone();
        Ok(turns)
    }

    async fn append(&self, session_id: &str, turn: Turn) -> Result<()> {
        let log = self.log(session_id).await?;
        let mut entry = log.write().await;

        let path = self.path(session_id)?;
        let mut line = serde_json::to_string(&turn)
            .map_err(|e| PortalError::Input(format!("unserialisable turn: {}", e)))?;
        line.push('\n');
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| PortalError::io(&path, e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| PortalError::io(&path, e))?;

        entry.turns.push(turn);
        Ok(())
    }
}

fn read_turns(path: &std::path::Path) -> Result<Vec<Turn>> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(PortalError::io(path, e)),
    };

    let mut turns = Vec::new();
    for (n, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Turn>(line) {
            Ok(turn) => turns.push(turn),
            Err(e) => {
                tracing::warn!(path = %path.display(), line = n + 1, error = %e, "skipping unreadable history line");
            }
        }
    }
    Ok(turns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_in_memory_append_preserves_order() {
        let store = InMemoryConversationStore::new();
        assert!(store.get("s1").await.unwrap().is_empty());

        store.append("s1", Turn::new("q1", "q1", "a1")).await.unwrap();
        store.append("s1", Turn::new("q2", "q2?", "a2")).await.unwrap();
        store.append("s2", Turn::new("other", "other", "x")).await.unwrap();

        let turns = store.get("s1").await.unwrap();
        let questions: Vec<&str> = turns.iter().map(|t| t.question.as_str()).collect();
        assert_eq!(questions, vec!["q1", "q2"]);
        assert_eq!(store.get("s2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_in_memory_concurrent_sessions() {
        let store = Arc::new(InMemoryConversationStore::new());
        let mut handles = Vec::new();
        for s in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let id = format!("s{}", s);
                for i in 0..10 {
                    let q = format!("q{}", i);
                    store.append(&id, Turn::new(&q, &q, "a")).await.unwrap();
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        for s in 0..8 {
            let turns = store.get(&format!("s{}", s)).await.unwrap();
            let expected: Vec<String> = (0..10).map(|i| format!("q{}", i)).collect();
            let got: Vec<String> = turns.into_iter().map(|t| t.question).collect();
            assert_eq!(got, expected);
        }
    }

    #[tokio::test]
    async fn test_jsonl_store_survives_restart() {
        let tmp = TempDir::new().unwrap();
        let config = StorageConfig {
            data_dir: tmp.path().join("data"),
            index_dir: tmp.path().join("index"),
        };

        let first = JsonlConversationStore::new(SessionStore::new(&config));
        first
            .append("s1", Turn::new("what changed?", "what changed?", "The fee."))
            .await
            .unwrap();

        let second = JsonlConversationStore::new(SessionStore::new(&config));
        second
            .append("s1", Turn::new("on which page?", "on which page did the fee change?", "2"))
            .await
            .unwrap();

        let third = JsonlConversationStore::new(SessionStore::new(&config));
        let turns = third.get("s1").await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].question, "what changed?");
        assert_eq!(turns[1].standalone_question, "on which page did the fee change?");
    }

    #[tokio::test]
    async fn test_jsonl_sessions_load_independently() {
        let tmp = TempDir::new().unwrap();
        let store = JsonlConversationStore::new(SessionStore::new(&StorageConfig {
            data_dir: tmp.path().join("data"),
            index_dir: tmp.path().join("index"),
        }));

        // s1 is mid-load: its own log is write-locked.
        let busy = store.map.entry("s1").await;
        let _held = busy.write().await;

        store
            .append("s2", Turn::new("q", "q", "a"))
            .await
            .unwrap();
        let turns = tokio::time::timeout(std::time::Duration::from_secs(5), store.get("s2"))
            .await
            .expect("s2 must not wait on s1")
            .unwrap();
        assert_eq!(turns.len(), 1);
    }

    #[tokio::test]
    async fn test_jsonl_store_rejects_bad_id() {
        let tmp = TempDir::new().unwrap();
        let store = JsonlConversationStore::new(SessionStore::new(&StorageConfig {
            data_dir: tmp.path().to_path_buf(),
            index_dir: tmp.path().join("index"),
        }));
        assert!(store.get("../escape").await.is_err());
    }
}
