use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Human,
    Ai,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Human => "human",
            Role::Ai => "ai",
        }
    }

    fn parse(value: &str) -> Result<Self> {
        match value {
            "human" => Ok(Role::Human),
            "ai" => Ok(Role::Ai),
            other => Err(anyhow!("unknown chat role {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn human(content: impl Into<String>) -> Self {
        Self {
            role: Role::Human,
            content: content.into(),
        }
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Self {
            role: Role::Ai,
            content: content.into(),
        }
    }
}

/// Per-session chat transcript in SQLite. Every call opens its own
/// connection; rows are never edited, only appended or cleared.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let store = Self::new(path);
        store.init()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connection(&self) -> Result<Connection> {
        Connection::open(&self.path)
            .with_context(|| format!("failed to open history db {}", self.path.display()))
    }

    pub fn init(&self) -> Result<()> {
        let conn = self.connection()?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS chat_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_chat_history_session ON chat_history(session_id);
            "#,
        )?;
        Ok(())
    }

    pub fn append(&self, session_id: &str, role: Role, content: &str) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO chat_history (session_id, role, content) VALUES (?1, ?2, ?3)",
            params![session_id, role.as_str(), content],
        )?;
        Ok(())
    }

    /// Stores the user message and the model answer together or not at all.
    pub fn append_turn(&self, session_id: &str, user: &str, ai: &str) -> Result<()> {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        for (role, content) in [(Role::Human, user), (Role::Ai, ai)] {
            tx.execute(
                "INSERT INTO chat_history (session_id, role, content) VALUES (?1, ?2, ?3)",
                params![session_id, role.as_str(), content],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// The most recent `limit` messages (all of them for `None`), oldest first.
    pub fn read(&self, session_id: &str, limit: Option<usize>) -> Result<Vec<ChatMessage>> {
        let conn = self.connection()?;
        // SQLite treats a negative LIMIT as unbounded
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let mut stmt = conn.prepare(
            r#"
            SELECT role, content FROM (
                SELECT id, role, content FROM chat_history
                WHERE session_id = ?1
                ORDER BY id DESC
                LIMIT ?2
            ) ORDER BY id ASC
            "#,
        )?;
        let rows = stmt.query_map(params![session_id, limit], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut messages = Vec::new();
        for row in rows {
            let (role, content) = row?;
            messages.push(ChatMessage {
                role: Role::parse(&role)?,
                content,
            });
        }
        Ok(messages)
    }

    pub fn clear(&self, session_id: &str) -> Result<usize> {
        let conn = self.connection()?;
        let deleted = conn.execute(
            "DELETE FROM chat_history WHERE session_id = ?1",
            params![session_id],
        )?;
        Ok(deleted)
    }
}
