//! Conversation store — append-only turn log, one thread per persona.
//!
//! Thread order is `timestamp` then row id, so two turns stamped in the same
//! millisecond still read back in insertion order.

use std::collections::BTreeMap;
use std::path::PathBuf;

use rusqlite::{OptionalExtension, Row, params};

use crate::error::AppError;
use crate::subsystems::memory::db::{now_iso8601, open_conn};
use crate::subsystems::memory::types::{ConversationTurn, TurnRole};

#[derive(Debug, Clone)]
pub struct ConversationStore {
    db_path: PathBuf,
}

impl ConversationStore {
    pub fn new(db_path: PathBuf) -> Self {
        Self { db_path }
    }

    /// Append the user turn and the assistant turn in one transaction.
    /// Either both rows land or neither does.
    pub fn append_exchange(
        &self,
        user_id: &str,
        persona_name: &str,
        user_message: &str,
        assistant_message: &str,
    ) -> Result<(), AppError> {
        let mut conn = open_conn(&self.db_path)?;
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Memory(format!("conversations: begin tx: {e}")))?;

        let ts = now_iso8601();
        for (role, message) in [(TurnRole::User, user_message), (TurnRole::Assistant, assistant_message)] {
            tx.execute(
                "INSERT INTO conversations (user_id, persona_name, role, message, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![user_id, persona_name, role.as_str(), message, ts],
            )
            .map_err(|e| AppError::Memory(format!("conversations: insert {role} turn: {e}")))?;
        }

        tx.commit()
            .map_err(|e| AppError::Memory(format!("conversations: commit exchange: {e}")))
    }

    /// Transcript of one thread, oldest first. With `last = Some(n)` only the
    /// `n` most recent turns are returned (still oldest first).
    pub fn thread(
        &self,
        user_id: &str,
        persona_name: &str,
        last: Option<usize>,
    ) -> Result<Vec<ConversationTurn>, AppError> {
        let conn = open_conn(&self.db_path)?;
        // SQLite treats a negative LIMIT as "no limit".
        let limit = last.map(|n| n as i64).unwrap_or(-1);
        let mut stmt = conn
            .prepare(
                "SELECT user_id, persona_name, role, message, timestamp FROM (
                     SELECT id, user_id, persona_name, role, message, timestamp
                     FROM conversations
                     WHERE user_id = ?1 AND persona_name = ?2
                     ORDER BY timestamp DESC, id DESC
                     LIMIT ?3
                 ) ORDER BY timestamp ASC, id ASC",
            )
            .map_err(|e| AppError::Memory(format!("conversations: prepare thread: {e}")))?;

        let rows = stmt
            .query_map(params![user_id, persona_name, limit], turn_from_row)
            .map_err(|e| AppError::Memory(format!("conversations: query thread: {e}")))?;

        let mut turns = Vec::new();
        for row in rows {
            turns.push(row.map_err(|e| AppError::Memory(format!("conversations: map thread row: {e}")))?);
        }
        Ok(turns)
    }

    /// Every thread of the user, keyed by persona name.
    pub fn threads_by_persona(
        &self,
        user_id: &str,
    ) -> Result<BTreeMap<String, Vec<ConversationTurn>>, AppError> {
        let conn = open_conn(&self.db_path)?;
        let mut stmt = conn
            .prepare(
                "SELECT user_id, persona_name, role, message, timestamp
                 FROM conversations
                 WHERE user_id = ?1
                 ORDER BY persona_name, timestamp ASC, id ASC",
            )
            .map_err(|e| AppError::Memory(format!("conversations: prepare history: {e}")))?;

        let rows = stmt
            .query_map(params![user_id], turn_from_row)
            .map_err(|e| AppError::Memory(format!("conversations: query history: {e}")))?;

        let mut threads: BTreeMap<String, Vec<ConversationTurn>> = BTreeMap::new();
        for row in rows {
            let turn = row.map_err(|e| AppError::Memory(format!("conversations: map history row: {e}")))?;
            threads.entry(turn.persona_name.clone()).or_default().push(turn);
        }
        Ok(threads)
    }

    /// Persona of the user's most recent turn, if any.
    pub fn latest_persona(&self, user_id: &str) -> Result<Option<String>, AppError> {
        let conn = open_conn(&self.db_path)?;
        conn.query_row(
            "SELECT persona_name FROM conversations
             WHERE user_id = ?1
             ORDER BY timestamp DESC, id DESC
             LIMIT 1",
            params![user_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| AppError::Memory(format!("conversations: latest persona: {e}")))
    }
}

fn turn_from_row(row: &Row<'_>) -> rusqlite::Result<ConversationTurn> {
    let role: String = row.get(2)?;
    let role = role.parse::<TurnRole>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, e.into())
    })?;
    Ok(ConversationTurn {
        user_id: row.get(0)?,
        persona_name: row.get(1)?,
        role,
        message: row.get(3)?,
        timestamp: row.get(4)?,
    })
}
