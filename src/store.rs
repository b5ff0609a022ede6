//! JSON-file session store.
//!
//! Keyed persistence for chat sessions: the whole store lives in one JSON
//! file, loaded at startup and rewritten (write-to-temp, then rename) on
//! every mutation. A single `RwLock` guards the in-memory map, so
//! read-modify-write for any id never interleaves with another writer.
//! There is no per-chat-id turn lock: concurrent duplicate turns against
//! one id are a documented gap.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::warn;

use crate::models::{ChatSession, Message, Role, Source};

#[derive(Default, serde::Serialize, serde::Deserialize)]
struct StoreFile {
    chats: Vec<ChatSession>,
}

pub struct SessionStore {
    path: PathBuf,
    chats: RwLock<HashMap<String, ChatSession>>,
}

impl SessionStore {
    /// Open the store, loading existing sessions if the file is present.
    /// A corrupt file is logged and treated as empty rather than failing
    /// startup.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let chats = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => match serde_json::from_str::<StoreFile>(&raw) {
                Ok(file) => file.chats.into_iter().map(|c| (c.id.clone(), c)).collect(),
                Err(e) => {
                    warn!("failed to parse {}: {e}, starting empty", path.display());
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", path.display()));
            }
        };

        Ok(Self {
            path,
            chats: RwLock::new(chats),
        })
    }

    /// All sessions, most recently updated first.
    pub async fn list(&self) -> Vec<ChatSession> {
        let chats = self.chats.read().await;
        let mut all: Vec<ChatSession> = chats.values().cloned().collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        all
    }

    /// Create a session titled from the query.
    pub async fn create(
        &self,
        query: &str,
        subreddit_filter: Option<String>,
    ) -> Result<ChatSession> {
        let session = ChatSession::new(generate_title(query), subreddit_filter);
        let mut chats = self.chats.write().await;
        chats.insert(session.id.clone(), session.clone());
        self.persist(&chats).await?;
        Ok(session)
    }

    pub async fn get(&self, id: &str) -> Option<ChatSession> {
        self.chats.read().await.get(id).cloned()
    }

    /// Rename a session. Returns false if the id is unknown.
    pub async fn update_title(&self, id: &str, title: &str) -> Result<bool> {
        let mut chats = self.chats.write().await;
        let Some(chat) = chats.get_mut(id) else {
            return Ok(false);
        };
        chat.title = title.to_string();
        chat.updated_at = Utc::now();
        self.persist(&chats).await?;
        Ok(true)
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        let mut chats = self.chats.write().await;
        if chats.remove(id).is_none() {
            return Ok(false);
        }
        self.persist(&chats).await?;
        Ok(true)
    }

    /// Append one message. Used for the user half of a turn, which is
    /// persisted synchronously before any streaming begins.
    pub async fn add_message(
        &self,
        id: &str,
        role: Role,
        content: &str,
    ) -> Result<Option<Message>> {
        let mut chats = self.chats.write().await;
        let Some(chat) = chats.get_mut(id) else {
            return Ok(None);
        };
        let message = Message::new(role, content);
        chat.messages.push(message.clone());
        chat.updated_at = Utc::now();
        self.persist(&chats).await?;
        Ok(Some(message))
    }

    /// Finish a research turn: append the assistant message and extend the
    /// source set in one locked write, so a reconciliation fetch never sees
    /// the message without its sources.
    pub async fn complete_turn(
        &self,
        id: &str,
        assistant_content: &str,
        sources: Vec<Source>,
    ) -> Result<bool> {
        let mut chats = self.chats.write().await;
        let Some(chat) = chats.get_mut(id) else {
            return Ok(false);
        };
        chat.messages
            .push(Message::new(Role::Assistant, assistant_content));
        chat.sources.extend(sources);
        chat.updated_at = Utc::now();
        self.persist(&chats).await?;
        Ok(true)
    }

    async fn persist(&self, chats: &HashMap<String, ChatSession>) -> Result<()> {
        let mut all: Vec<&ChatSession> = chats.values().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let file = serde_json::json!({ "chats": all });
        let raw = serde_json::to_string_pretty(&file)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = tmp_path(&self.path);
        tokio::fs::write(&tmp, raw)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("renaming into {}", self.path.display()))?;
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".tmp");
    PathBuf::from(os)
}

/// Derive a short 3-4 word title from the initial query, ellipsized at 30
/// characters.
pub fn generate_title(query: &str) -> String {
    let title: String = query
        .split_whitespace()
        .take(4)
        .collect::<Vec<_>>()
        .join(" ");
    let title = title.trim();

    if title.is_empty() {
        return "New Research".to_string();
    }
    if title.chars().count() > 30 {
        let truncated: String = title.chars().take(27).collect();
        format!("{truncated}...")
    } else {
        title.to_string()
    }
}
