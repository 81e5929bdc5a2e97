//! Persistent conversation sessions
//!
//! Sessions and their turns live in two relational tables reached through an
//! `sqlx` [`AnyPool`], so the same code runs against PostgreSQL in production
//! and an in-memory SQLite database in tests.
//!
//! ```text
//! agent_sessions                      agent_turns
//! ┌──────────────┐                    ┌──────────────────────────┐
//! │ session_id PK│◄───────────────────│ session_id, seq (unique) │
//! │ user_id      │                    │ turn_id PK, run_id       │
//! │ agent_id     │                    │ user_message, response   │
//! │ title        │                    │ tool_calls (JSON text)   │
//! │ created_at   │                    │ created_at               │
//! │ updated_at   │                    └──────────────────────────┘
//! └──────────────┘
//! ```
//!
//! Long-term facts about a user live in `user_memories`, keyed by user
//! rather than session, so they survive session deletion.
//!
//! Timestamps are stored as Unix milliseconds.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use thiserror::Error;

use crate::metrics::STORE_ERRORS;
use crate::tools::ToolExecution;

/// Maximum length of a session title, in characters
pub const TITLE_MAX_CHARS: usize = 30;

const SCHEMA: &[&str] = &[
    r#"
CREATE TABLE IF NOT EXISTS agent_sessions (
    session_id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    agent_id TEXT NOT NULL,
    title TEXT NOT NULL,
    created_at BIGINT NOT NULL,
    updated_at BIGINT NOT NULL
)
"#,
    r#"
CREATE INDEX IF NOT EXISTS agent_sessions_user_recency
ON agent_sessions (user_id, updated_at)
"#,
    r#"
CREATE TABLE IF NOT EXISTS agent_turns (
    turn_id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    run_id TEXT NOT NULL,
    seq BIGINT NOT NULL,
    user_message TEXT NOT NULL,
    response TEXT NOT NULL,
    tool_calls TEXT NOT NULL,
    created_at BIGINT NOT NULL,
    UNIQUE (session_id, seq)
)
"#,
    r#"
CREATE TABLE IF NOT EXISTS user_memories (
    memory_id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    memory TEXT NOT NULL,
    created_at BIGINT NOT NULL
)
"#,
    r#"
CREATE INDEX IF NOT EXISTS user_memories_by_user
ON user_memories (user_id, created_at)
"#,
];

/// Error type for session storage
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session {0} not found")]
    NotFound(String),

    /// A turn could not be written
    #[error("failed to append turn: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt stored turn: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Summary of a session for listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub user_id: String,
    pub agent_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub turn_count: i64,
}

/// One stored user message and the agent's answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub turn_id: String,
    pub session_id: String,
    pub run_id: String,
    /// 1-based position within the session
    pub seq: i64,
    pub user_message: String,
    pub response: String,
    pub tool_calls: Vec<ToolExecution>,
    pub created_at: DateTime<Utc>,
}

/// A fact remembered about a user across sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMemory {
    pub memory_id: String,
    pub user_id: String,
    pub memory: String,
    pub created_at: DateTime<Utc>,
}

/// A turn about to be appended
#[derive(Debug, Clone)]
pub struct NewTurn {
    pub session_id: String,
    pub user_id: String,
    pub agent_id: String,
    pub run_id: String,
    pub user_message: String,
    pub response: String,
    pub tool_calls: Vec<ToolExecution>,
}

/// Session storage backed by a relational database
#[derive(Clone)]
pub struct SessionStore {
    pool: AnyPool,
    /// Last timestamp handed out; keeps timestamps strictly increasing
    /// within this process
    clock: Arc<AtomicI64>,
}

impl SessionStore {
    /// Connect to `database_url` and create the schema if needed
    ///
    /// Accepts `postgres://…` URLs as well as `sqlite:…` ones
    /// (`sqlite::memory:` for a throwaway database).
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        sqlx::any::install_default_drivers();

        // Every connection to an in-memory SQLite database is a separate
        // database, so those pools are pinned to one connection.
        let max_connections = if database_url.starts_with("sqlite") { 1 } else { 10 };

        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        let store = Self {
            pool,
            clock: Arc::new(AtomicI64::new(0)),
        };
        store.migrate().await?;
        tracing::info!(max_connections, "Session store ready");
        Ok(store)
    }

    /// Close every pooled connection. Later calls fail with a database error.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    fn next_timestamp(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let mut last = self.clock.load(Ordering::Relaxed);
        loop {
            let next = now.max(last + 1);
            match self
                .clock
                .compare_exchange_weak(last, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }

    /// Sessions owned by `user_id`, most recently updated first
    pub async fn list_sessions(&self, user_id: &str) -> Result<Vec<SessionSummary>, StoreError> {
        let rows = sqlx::query(
            r#"
SELECT s.session_id, s.user_id, s.agent_id, s.title, s.created_at, s.updated_at,
       (SELECT COUNT(*) FROM agent_turns t WHERE t.session_id = s.session_id) AS turn_count
FROM agent_sessions s
WHERE s.user_id = $1
ORDER BY s.updated_at DESC, s.session_id DESC
"#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .inspect_err(|_| STORE_ERRORS.with_label_values(&["list"]).inc())?;

        rows.iter().map(summary_from_row).collect()
    }

    /// Full transcript of a session in append order
    pub async fn transcript(&self, session_id: &str) -> Result<Vec<Turn>, StoreError> {
        let exists = sqlx::query("SELECT session_id FROM agent_sessions WHERE session_id = $1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .inspect_err(|_| STORE_ERRORS.with_label_values(&["transcript"]).inc())?;
        if exists.is_none() {
            return Err(StoreError::NotFound(session_id.to_string()));
        }

        let rows = sqlx::query(
            r#"
SELECT turn_id, session_id, run_id, seq, user_message, response, tool_calls, created_at
FROM agent_turns
WHERE session_id = $1
ORDER BY seq ASC
"#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .inspect_err(|_| STORE_ERRORS.with_label_values(&["transcript"]).inc())?;

        rows.iter().map(turn_from_row).collect()
    }

    /// The last `limit` turns of a session in append order. Unknown sessions
    /// have no turns.
    pub async fn recent_turns(&self, session_id: &str, limit: usize) -> Result<Vec<Turn>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
SELECT turn_id, session_id, run_id, seq, user_message, response, tool_calls, created_at
FROM agent_turns
WHERE session_id = $1
ORDER BY seq DESC
LIMIT $2
"#,
        )
        .bind(session_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .inspect_err(|_| STORE_ERRORS.with_label_values(&["recent"]).inc())?;

        let mut turns = rows.iter().map(turn_from_row).collect::<Result<Vec<_>, _>>()?;
        turns.reverse();
        Ok(turns)
    }

    /// Delete a session and its turns.
    ///
    /// Idempotent: returns `false` when there was nothing to delete.
    pub async fn delete_session(&self, session_id: &str) -> Result<bool, StoreError> {
        let result: Result<bool, sqlx::Error> = async {
            let mut tx = self.pool.begin().await?;
            sqlx::query("DELETE FROM agent_turns WHERE session_id = $1")
                .bind(session_id)
                .execute(&mut *tx)
                .await?;
            let deleted = sqlx::query("DELETE FROM agent_sessions WHERE session_id = $1")
                .bind(session_id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
            tx.commit().await?;
            Ok(deleted > 0)
        }
        .await;

        result
            .inspect_err(|_| STORE_ERRORS.with_label_values(&["delete"]).inc())
            .map_err(StoreError::from)
    }

    /// Append a turn, creating the session on first use.
    ///
    /// Any failure to write is reported as [`StoreError::Conflict`], including
    /// an attempt to append to a session owned by another user and a lost
    /// race against a concurrent append to the same session.
    pub async fn append_turn(&self, turn: NewTurn) -> Result<Turn, StoreError> {
        self.try_append(turn).await.map_err(|e| {
            STORE_ERRORS.with_label_values(&["append"]).inc();
            match e {
                StoreError::Conflict(msg) => StoreError::Conflict(msg),
                other => StoreError::Conflict(other.to_string()),
            }
        })
    }

    async fn try_append(&self, turn: NewTurn) -> Result<Turn, StoreError> {
        let now = self.next_timestamp();
        let tool_calls = serde_json::to_string(&turn.tool_calls)?;
        let mut tx = self.pool.begin().await?;

        let owner = sqlx::query("SELECT user_id FROM agent_sessions WHERE session_id = $1")
            .bind(&turn.session_id)
            .fetch_optional(&mut *tx)
            .await?
            .map(|row| row.try_get::<String, _>("user_id"))
            .transpose()?;

        match owner {
            Some(owner) if owner != turn.user_id => {
                return Err(StoreError::Conflict(format!(
                    "session {} belongs to another user",
                    turn.session_id
                )));
            }
            Some(_) => {
                sqlx::query("UPDATE agent_sessions SET updated_at = $1 WHERE session_id = $2")
                    .bind(now)
                    .bind(&turn.session_id)
                    .execute(&mut *tx)
                    .await?;
            }
            None => {
                sqlx::query(
                    r#"
INSERT INTO agent_sessions (session_id, user_id, agent_id, title, created_at, updated_at)
VALUES ($1, $2, $3, $4, $5, $6)
"#,
                )
                .bind(&turn.session_id)
                .bind(&turn.user_id)
                .bind(&turn.agent_id)
                .bind(summarize_title(&turn.user_message, TITLE_MAX_CHARS))
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }
        }

        let seq: i64 = sqlx::query(
            "SELECT COALESCE(MAX(seq), 0) + 1 AS next_seq FROM agent_turns WHERE session_id = $1",
        )
        .bind(&turn.session_id)
        .fetch_one(&mut *tx)
        .await?
        .try_get("next_seq")?;

        let turn_id = uuid::Uuid::now_v7().to_string();
        sqlx::query(
            r#"
INSERT INTO agent_turns (turn_id, session_id, run_id, seq, user_message, response, tool_calls, created_at)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
"#,
        )
        .bind(&turn_id)
        .bind(&turn.session_id)
        .bind(&turn.run_id)
        .bind(seq)
        .bind(&turn.user_message)
        .bind(&turn.response)
        .bind(&tool_calls)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Turn {
            turn_id,
            session_id: turn.session_id,
            run_id: turn.run_id,
            seq,
            user_message: turn.user_message,
            response: turn.response,
            tool_calls: turn.tool_calls,
            created_at: from_millis(now),
        })
    }

    /// The `limit` most recent memories of a user, oldest first
    pub async fn user_memories(&self, user_id: &str, limit: usize) -> Result<Vec<UserMemory>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
SELECT memory_id, user_id, memory, created_at
FROM user_memories
WHERE user_id = $1
ORDER BY created_at DESC, memory_id DESC
LIMIT $2
"#,
        )
        .bind(user_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .inspect_err(|_| STORE_ERRORS.with_label_values(&["memories"]).inc())?;

        let mut memories = rows.iter().map(memory_from_row).collect::<Result<Vec<_>, _>>()?;
        memories.reverse();
        Ok(memories)
    }

    /// Remember new facts about a user and return the ones actually stored.
    ///
    /// Blank facts and facts the user already has (ignoring case and
    /// surrounding whitespace) are skipped.
    pub async fn add_memories(&self, user_id: &str, facts: &[String]) -> Result<Vec<UserMemory>, StoreError> {
        self.try_add_memories(user_id, facts)
            .await
            .inspect_err(|_| STORE_ERRORS.with_label_values(&["remember"]).inc())
    }

    async fn try_add_memories(&self, user_id: &str, facts: &[String]) -> Result<Vec<UserMemory>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let mut known: Vec<String> = sqlx::query("SELECT memory FROM user_memories WHERE user_id = $1")
            .bind(user_id)
            .fetch_all(&mut *tx)
            .await?
            .iter()
            .map(|row| row.try_get::<String, _>("memory").map(|m| memory_key(&m)))
            .collect::<Result<_, _>>()?;

        let mut stored = Vec::new();
        for fact in facts {
            let fact = fact.trim();
            let key = memory_key(fact);
            if key.is_empty() || known.contains(&key) {
                continue;
            }

            let memory = UserMemory {
                memory_id: uuid::Uuid::now_v7().to_string(),
                user_id: user_id.to_string(),
                memory: fact.to_string(),
                created_at: from_millis(self.next_timestamp()),
            };
            sqlx::query(
                "INSERT INTO user_memories (memory_id, user_id, memory, created_at) VALUES ($1, $2, $3, $4)",
            )
            .bind(&memory.memory_id)
            .bind(&memory.user_id)
            .bind(&memory.memory)
            .bind(memory.created_at.timestamp_millis())
            .execute(&mut *tx)
            .await?;

            known.push(key);
            stored.push(memory);
        }

        tx.commit().await?;
        Ok(stored)
    }
}

fn summary_from_row(row: &AnyRow) -> Result<SessionSummary, StoreError> {
    Ok(SessionSummary {
        session_id: row.try_get("session_id")?,
        user_id: row.try_get("user_id")?,
        agent_id: row.try_get("agent_id")?,
        title: row.try_get("title")?,
        created_at: from_millis(row.try_get("created_at")?),
        updated_at: from_millis(row.try_get("updated_at")?),
        turn_count: row.try_get("turn_count")?,
    })
}

fn turn_from_row(row: &AnyRow) -> Result<Turn, StoreError> {
    let tool_calls: String = row.try_get("tool_calls")?;
    Ok(Turn {
        turn_id: row.try_get("turn_id")?,
        session_id: row.try_get("session_id")?,
        run_id: row.try_get("run_id")?,
        seq: row.try_get("seq")?,
        user_message: row.try_get("user_message")?,
        response: row.try_get("response")?,
        tool_calls: serde_json::from_str(&tool_calls)?,
        created_at: from_millis(row.try_get("created_at")?),
    })
}

fn memory_from_row(row: &AnyRow) -> Result<UserMemory, StoreError> {
    Ok(UserMemory {
        memory_id: row.try_get("memory_id")?,
        user_id: row.try_get("user_id")?,
        memory: row.try_get("memory")?,
        created_at: from_millis(row.try_get("created_at")?),
    })
}

/// Comparison key for duplicate detection
fn memory_key(memory: &str) -> String {
    memory.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Short single-line title for a session, derived from its first message.
///
/// Markdown markers and repeated whitespace are dropped; long text is cut at a
/// word boundary and marked with an ellipsis.
pub fn summarize_title(text: &str, max_chars: usize) -> String {
    let cleaned = text
        .split_whitespace()
        .map(|word| word.trim_matches(|c: char| matches!(c, '#' | '*' | '_' | '`' | '>')))
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    if cleaned.chars().count() <= max_chars {
        return cleaned;
    }

    let budget = max_chars.saturating_sub(3);
    let mut chars = cleaned.chars();
    let cut: String = chars.by_ref().take(budget).collect();
    let splits_word = chars.next().is_some_and(|c| c != ' ');
    let cut = match cut.rfind(' ') {
        Some(pos) if splits_word && cut[..pos].chars().count() > budget / 2 => &cut[..pos],
        _ => cut.as_str(),
    };
    format!("{}...", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_title_kept() {
        assert_eq!(summarize_title("Hook for reels", 30), "Hook for reels");
    }

    #[test]
    fn test_title_cut_at_word_boundary() {
        let title = summarize_title("Write a hook for a skincare reel about sunscreen", 30);
        assert_eq!(title, "Write a hook for a skincare...");
        assert!(title.chars().count() <= 30);
    }

    #[test]
    fn test_title_strips_markdown_and_whitespace() {
        assert_eq!(summarize_title("## **Launch**   copy\n\nplease", 30), "Launch copy please");
    }

    #[test]
    fn test_title_multibyte_safe() {
        let title = summarize_title("Legenda para lançamento de coleção de verão ☀️", 20);
        assert!(title.ends_with("..."));
        assert!(title.chars().count() <= 20);
    }

    #[test]
    fn test_memory_key_ignores_case_and_spacing() {
        assert_eq!(memory_key("  Runs a  Vegan brand "), memory_key("runs a vegan brand"));
        assert!(memory_key(" \n").is_empty());
    }

    #[test]
    fn test_from_millis() {
        assert_eq!(from_millis(1_700_000_000_000).timestamp(), 1_700_000_000);
    }
}
