//! User registry — existence check, insert-if-absent and full-data delete.

use std::path::PathBuf;

use rusqlite::{OptionalExtension, params};

use crate::error::AppError;
use crate::subsystems::memory::db::{now_iso8601, open_conn};
use crate::subsystems::memory::types::User;

#[derive(Debug, Clone)]
pub struct UserRegistry {
    db_path: PathBuf,
}

impl UserRegistry {
    pub fn new(db_path: PathBuf) -> Self {
        Self { db_path }
    }

    pub fn exists(&self, user_id: &str) -> Result<bool, AppError> {
        Ok(self.get(user_id)?.is_some())
    }

    pub fn get(&self, user_id: &str) -> Result<Option<User>, AppError> {
        let conn = open_conn(&self.db_path)?;
        conn.query_row(
            "SELECT user_id, created_at FROM users WHERE user_id = ?1",
            params![user_id],
            |row| Ok(User { user_id: row.get(0)?, created_at: row.get(1)? }),
        )
        .optional()
        .map_err(|e| AppError::Memory(format!("users: get {user_id}: {e}")))
    }

    /// Create the user unless it already exists. Returns `true` when a row
    /// was inserted. Safe under concurrent first requests.
    pub fn ensure(&self, user_id: &str) -> Result<bool, AppError> {
        let conn = open_conn(&self.db_path)?;
        let inserted = conn
            .execute(
                "INSERT INTO users (user_id, created_at) VALUES (?1, ?2)
                 ON CONFLICT (user_id) DO NOTHING",
                params![user_id, now_iso8601()],
            )
            .map_err(|e| AppError::Memory(format!("users: insert {user_id}: {e}")))?;
        Ok(inserted == 1)
    }

    /// Remove the user and every persona and turn it owns, in one transaction.
    /// Returns `false` when the user did not exist.
    pub fn delete(&self, user_id: &str) -> Result<bool, AppError> {
        let mut conn = open_conn(&self.db_path)?;
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Memory(format!("users: begin delete tx: {e}")))?;

        // Explicit child deletes keep this correct even on a database opened
        // without foreign-key enforcement.
        tx.execute("DELETE FROM conversations WHERE user_id = ?1", params![user_id])
            .map_err(|e| AppError::Memory(format!("users: delete conversations: {e}")))?;
        tx.execute("DELETE FROM professions WHERE user_id = ?1", params![user_id])
            .map_err(|e| AppError::Memory(format!("users: delete professions: {e}")))?;
        let removed = tx
            .execute("DELETE FROM users WHERE user_id = ?1", params![user_id])
            .map_err(|e| AppError::Memory(format!("users: delete user: {e}")))?;

        tx.commit()
            .map_err(|e| AppError::Memory(format!("users: commit delete: {e}")))?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subsystems::memory::db::init_schema;
    use tempfile::TempDir;

    fn registry() -> (TempDir, UserRegistry) {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("users.db");
        init_schema(&open_conn(&path).unwrap()).unwrap();
        (tmp, UserRegistry::new(path))
    }

    #[test]
    fn ensure_creates_once() {
        let (_tmp, users) = registry();
        assert!(!users.exists("42").unwrap());
        assert!(users.ensure("42").unwrap());
        assert!(!users.ensure("42").unwrap());
        let user = users.get("42").unwrap().unwrap();
        assert_eq!(user.user_id, "42");
        assert!(!user.created_at.is_empty());
    }

    #[test]
    fn delete_unknown_user_is_false() {
        let (_tmp, users) = registry();
        assert!(!users.delete("ghost").unwrap());
    }

    #[test]
    fn delete_removes_user() {
        let (_tmp, users) = registry();
        users.ensure("a").unwrap();
        users.ensure("b").unwrap();
        assert!(users.delete("a").unwrap());
        assert!(!users.exists("a").unwrap());
        assert!(users.exists("b").unwrap());
    }
}
