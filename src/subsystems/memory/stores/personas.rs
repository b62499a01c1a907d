//! Persona store — `(user_id, profession_name) → prompt`, write-once.

use std::path::PathBuf;

use rusqlite::{OptionalExtension, params};

use crate::error::AppError;
use crate::subsystems::memory::db::{now_iso8601, open_conn};
use crate::subsystems::memory::types::Persona;

#[derive(Debug, Clone)]
pub struct PersonaStore {
    db_path: PathBuf,
}

impl PersonaStore {
    pub fn new(db_path: PathBuf) -> Self {
        Self { db_path }
    }

    pub fn get(&self, user_id: &str, profession_name: &str) -> Result<Option<Persona>, AppError> {
        let conn = open_conn(&self.db_path)?;
        select_persona(&conn, user_id, profession_name)
    }

    /// Store `prompt` for the persona unless one is already stored, then
    /// return whatever row is stored. The boolean is `true` when this call
    /// wrote the row.
    ///
    /// Insert and read-back share one transaction, so a concurrent writer
    /// for the same key makes this call return the winner's prompt.
    pub fn insert_if_absent(
        &self,
        user_id: &str,
        profession_name: &str,
        prompt: &str,
    ) -> Result<(Persona, bool), AppError> {
        let mut conn = open_conn(&self.db_path)?;
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Memory(format!("professions: begin tx: {e}")))?;

        let inserted = tx
            .execute(
                "INSERT INTO professions (user_id, profession_name, prompt, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (user_id, profession_name) DO NOTHING",
                params![user_id, profession_name, prompt, now_iso8601()],
            )
            .map_err(|e| {
                AppError::Memory(format!("professions: insert {user_id}/{profession_name}: {e}"))
            })?;

        let persona = select_persona(&tx, user_id, profession_name)?.ok_or_else(|| {
            AppError::Memory(format!("professions: {user_id}/{profession_name} missing after insert"))
        })?;

        tx.commit()
            .map_err(|e| AppError::Memory(format!("professions: commit: {e}")))?;
        Ok((persona, inserted == 1))
    }

    /// Sorted, de-duplicated persona names that have a stored prompt or at
    /// least one conversation turn.
    pub fn names(&self, user_id: &str) -> Result<Vec<String>, AppError> {
        let conn = open_conn(&self.db_path)?;
        let mut stmt = conn
            .prepare(
                "SELECT profession_name FROM professions WHERE user_id = ?1
                 UNION
                 SELECT persona_name FROM conversations WHERE user_id = ?1
                 ORDER BY 1",
            )
            .map_err(|e| AppError::Memory(format!("professions: prepare names: {e}")))?;

        let rows = stmt
            .query_map(params![user_id], |row| row.get::<_, String>(0))
            .map_err(|e| AppError::Memory(format!("professions: query names: {e}")))?;

        let mut names = Vec::new();
        for row in rows {
            names.push(row.map_err(|e| AppError::Memory(format!("professions: map name row: {e}")))?);
        }
        Ok(names)
    }
}

fn select_persona(
    conn: &rusqlite::Connection,
    user_id: &str,
    profession_name: &str,
) -> Result<Option<Persona>, AppError> {
    conn.query_row(
        "SELECT user_id, profession_name, prompt, created_at
         FROM professions WHERE user_id = ?1 AND profession_name = ?2",
        params![user_id, profession_name],
        |row| {
            Ok(Persona {
                user_id: row.get(0)?,
                profession_name: row.get(1)?,
                prompt: row.get(2)?,
                created_at: row.get(3)?,
            })
        },
    )
    .optional()
    .map_err(|e| AppError::Memory(format!("professions: get {user_id}/{profession_name}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subsystems::memory::db::init_schema;
    use crate::subsystems::memory::stores::users::UserRegistry;
    use tempfile::TempDir;

    fn store() -> (TempDir, PersonaStore) {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("personas.db");
        init_schema(&open_conn(&path).unwrap()).unwrap();
        UserRegistry::new(path.clone()).ensure("u1").unwrap();
        (tmp, PersonaStore::new(path))
    }

    #[test]
    fn first_insert_wins() {
        let (_tmp, personas) = store();
        let (p, created) = personas.insert_if_absent("u1", "teacher", "prompt A").unwrap();
        assert!(created);
        assert_eq!(p.prompt, "prompt A");

        let (p, created) = personas.insert_if_absent("u1", "teacher", "prompt B").unwrap();
        assert!(!created);
        assert_eq!(p.prompt, "prompt A");
    }

    #[test]
    fn get_missing_is_none() {
        let (_tmp, personas) = store();
        assert!(personas.get("u1", "lawyer").unwrap().is_none());
    }

    #[test]
    fn insert_for_unknown_user_violates_foreign_key() {
        let (_tmp, personas) = store();
        assert!(personas.insert_if_absent("nobody", "teacher", "p").is_err());
    }

    #[test]
    fn names_are_sorted() {
        let (_tmp, personas) = store();
        personas.insert_if_absent("u1", "lawyer", "p").unwrap();
        personas.insert_if_absent("u1", "investor", "p").unwrap();
        assert_eq!(personas.names("u1").unwrap(), vec!["investor", "lawyer"]);
        assert!(personas.names("u2").unwrap().is_empty());
    }
}
