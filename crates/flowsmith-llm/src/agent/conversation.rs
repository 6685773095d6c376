use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use flowsmith_core::executions::storage_key;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::warn;

use crate::Message;

/// Entries replayed into the model context by default.
pub const DEFAULT_WINDOW_SIZE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A single entry in the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub role: ChatRole,
    pub content: String,
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl ChatEntry {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: now_epoch_ms(),
            meta: None,
        }
    }

    pub fn to_message(&self) -> Message {
        match self.role {
            ChatRole::System => Message::system(&self.content),
            ChatRole::User => Message::user(&self.content),
            ChatRole::Assistant => Message::assistant(&self.content),
        }
    }
}

/// Ordered conversation history. The full history is kept; only the tail is
/// replayed into the model context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationWindow {
    entries: Vec<ChatEntry>,
}

impl ConversationWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: ChatEntry) {
        self.entries.push(entry);
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.push(ChatEntry::new(ChatRole::User, content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.push(ChatEntry::new(ChatRole::Assistant, content));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The most recent `n` entries, oldest first.
    pub fn recent(&self, n: usize) -> &[ChatEntry] {
        let len = self.entries.len();
        &self.entries[len.saturating_sub(n)..]
    }
}

impl From<Vec<ChatEntry>> for ConversationWindow {
    fn from(entries: Vec<ChatEntry>) -> Self {
        Self { entries }
    }
}

/// Persistence for conversation history, keyed by session.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn append(
        &self,
        session_id: &str,
        role: ChatRole,
        content: &str,
        meta: Option<Value>,
    ) -> Result<()>;

    async fn tail(&self, session_id: &str, n: usize) -> Result<Vec<ChatEntry>>;
}

#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    sessions: RwLock<HashMap<String, ConversationWindow>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn append(
        &self,
        session_id: &str,
        role: ChatRole,
        content: &str,
        meta: Option<Value>,
    ) -> Result<()> {
        let mut entry = ChatEntry::new(role, content);
        entry.meta = meta;
        self.sessions
            .write()
            .await
            .entry(session_id.to_string())
            .or_default()
            .push(entry);
        Ok(())
    }

    async fn tail(&self, session_id: &str, n: usize) -> Result<Vec<ChatEntry>> {
        Ok(self
            .sessions
            .read()
            .await
            .get(session_id)
            .map(|w| w.recent(n).to_vec())
            .unwrap_or_default())
    }
}

/// One JSON-lines file per session: `<dir>/<storage_key(session_id)>.jsonl`.
pub struct FileConversationStore {
    dir: PathBuf,
}

impl FileConversationStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", storage_key(session_id)))
    }
}

#[async_trait]
impl ConversationStore for FileConversationStore {
    async fn append(
        &self,
        session_id: &str,
        role: ChatRole,
        content: &str,
        meta: Option<Value>,
    ) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let mut entry = ChatEntry::new(role, content);
        entry.meta = meta;
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let path = self.session_path(session_id);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open {}", path.display()))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn tail(&self, session_id: &str, n: usize) -> Result<Vec<ChatEntry>> {
        let path = self.session_path(session_id);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        };

        let mut entries = Vec::new();
        for (i, line) in text.lines().enumerate().filter(|(_, l)| !l.trim().is_empty()) {
            match serde_json::from_str::<ChatEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(line = i + 1, error = %e, "Skipping malformed conversation entry"),
            }
        }
        Ok(ConversationWindow::from(entries).recent(n).to_vec())
    }
}

fn now_epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
