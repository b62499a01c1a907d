//! Memory subsystem — users, personas and conversation threads in SQLite.
//!
//! ```text
//! persona.db
//! ├── users          (user_id PK)
//! ├── professions    (user_id, profession_name) UNIQUE → prompt
//! └── conversations  (user_id, persona_name, role, message, timestamp)
//! ```
//!
//! [`MemorySystem`] is the async-safe front: cheap to clone, and every call
//! is dispatched to `tokio::task::spawn_blocking` so request handlers never
//! block the runtime on SQLite I/O.

pub(crate) mod db;
pub mod stores;
pub mod types;

pub use types::{ConversationTurn, Persona, TurnRole, User};

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::error::AppError;
use stores::conversations::ConversationStore;
use stores::personas::PersonaStore;
use stores::users::UserRegistry;

struct Stores {
    users: UserRegistry,
    personas: PersonaStore,
    conversations: ConversationStore,
}

#[derive(Clone)]
pub struct MemorySystem {
    db_path: PathBuf,
    stores: Arc<Stores>,
}

impl MemorySystem {
    /// Open (creating if needed) the database at `db_path` and apply the schema.
    pub fn open(db_path: &Path) -> Result<Self, AppError> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                AppError::Memory(format!("cannot create {}: {e}", parent.display()))
            })?;
        }

        let conn = db::open_conn(db_path)?;
        db::init_schema(&conn)?;
        drop(conn);

        info!(db_path = %db_path.display(), "memory system ready");

        let path = db_path.to_path_buf();
        Ok(Self {
            stores: Arc::new(Stores {
                users: UserRegistry::new(path.clone()),
                personas: PersonaStore::new(path.clone()),
                conversations: ConversationStore::new(path.clone()),
            }),
            db_path: path,
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    // ── Users ─────────────────────────────────────────────────────────

    pub async fn user_exists(&self, user_id: &str) -> Result<bool, AppError> {
        let user_id = user_id.to_string();
        self.blocking("user_exists", move |s| s.users.exists(&user_id)).await
    }

    /// Insert-if-absent. Returns `true` when the user was created.
    pub async fn ensure_user(&self, user_id: &str) -> Result<bool, AppError> {
        let user_id = user_id.to_string();
        self.blocking("ensure_user", move |s| s.users.ensure(&user_id)).await
    }

    /// Remove the user and all of its personas and turns.
    pub async fn delete_user(&self, user_id: &str) -> Result<bool, AppError> {
        let user_id = user_id.to_string();
        self.blocking("delete_user", move |s| s.users.delete(&user_id)).await
    }

    // ── Personas ──────────────────────────────────────────────────────

    pub async fn persona(&self, user_id: &str, profession_name: &str) -> Result<Option<Persona>, AppError> {
        let (user_id, name) = (user_id.to_string(), profession_name.to_string());
        self.blocking("persona", move |s| s.personas.get(&user_id, &name)).await
    }

    /// See [`PersonaStore::insert_if_absent`].
    pub async fn insert_persona_if_absent(
        &self,
        user_id: &str,
        profession_name: &str,
        prompt: &str,
    ) -> Result<(Persona, bool), AppError> {
        let (user_id, name, prompt) =
            (user_id.to_string(), profession_name.to_string(), prompt.to_string());
        self.blocking("insert_persona", move |s| {
            s.personas.insert_if_absent(&user_id, &name, &prompt)
        })
        .await
    }

    pub async fn persona_names(&self, user_id: &str) -> Result<Vec<String>, AppError> {
        let user_id = user_id.to_string();
        self.blocking("persona_names", move |s| s.personas.names(&user_id)).await
    }

    // ── Conversations ─────────────────────────────────────────────────

    pub async fn append_exchange(
        &self,
        user_id: &str,
        persona_name: &str,
        user_message: &str,
        assistant_message: &str,
    ) -> Result<(), AppError> {
        let (user_id, persona) = (user_id.to_string(), persona_name.to_string());
        let (question, answer) = (user_message.to_string(), assistant_message.to_string());
        self.blocking("append_exchange", move |s| {
            s.conversations.append_exchange(&user_id, &persona, &question, &answer)
        })
        .await
    }

    pub async fn thread(
        &self,
        user_id: &str,
        persona_name: &str,
        last: Option<usize>,
    ) -> Result<Vec<ConversationTurn>, AppError> {
        let (user_id, persona) = (user_id.to_string(), persona_name.to_string());
        self.blocking("thread", move |s| s.conversations.thread(&user_id, &persona, last)).await
    }

    pub async fn threads_by_persona(
        &self,
        user_id: &str,
    ) -> Result<BTreeMap<String, Vec<ConversationTurn>>, AppError> {
        let user_id = user_id.to_string();
        self.blocking("threads_by_persona", move |s| s.conversations.threads_by_persona(&user_id))
            .await
    }

    pub async fn latest_persona(&self, user_id: &str) -> Result<Option<String>, AppError> {
        let user_id = user_id.to_string();
        self.blocking("latest_persona", move |s| s.conversations.latest_persona(&user_id)).await
    }

    // ── Internals ─────────────────────────────────────────────────────

    async fn blocking<T, F>(&self, op: &'static str, f: F) -> Result<T, AppError>
    where
        T: Send + 'static,
        F: FnOnce(&Stores) -> Result<T, AppError> + Send + 'static,
    {
        let stores = Arc::clone(&self.stores);
        tokio::task::spawn_blocking(move || f(&stores))
            .await
            .map_err(|e| AppError::Memory(format!("{op} join: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn open_creates_parent_dirs() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("dir").join("persona.db");
        let mem = MemorySystem::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(mem.db_path(), path.as_path());
    }

    #[tokio::test]
    async fn reopen_keeps_data() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("persona.db");
        {
            let mem = MemorySystem::open(&path).unwrap();
            mem.ensure_user("42").await.unwrap();
        }
        let mem = MemorySystem::open(&path).unwrap();
        assert!(mem.user_exists("42").await.unwrap());
    }

    #[tokio::test]
    async fn delete_user_leaves_other_users_untouched() {
        let tmp = TempDir::new().unwrap();
        let mem = MemorySystem::open(&tmp.path().join("persona.db")).unwrap();
        for user in ["a", "b"] {
            mem.ensure_user(user).await.unwrap();
            mem.insert_persona_if_absent(user, "teacher", "prompt").await.unwrap();
            mem.append_exchange(user, "teacher", "q", "a").await.unwrap();
        }

        assert!(mem.delete_user("a").await.unwrap());

        assert!(!mem.user_exists("a").await.unwrap());
        assert!(mem.persona("a", "teacher").await.unwrap().is_none());
        assert!(mem.threads_by_persona("a").await.unwrap().is_empty());
        assert!(mem.persona_names("a").await.unwrap().is_empty());

        assert!(mem.user_exists("b").await.unwrap());
        assert!(mem.persona("b", "teacher").await.unwrap().is_some());
        assert_eq!(mem.thread("b", "teacher", None).await.unwrap().len(), 2);
    }
}
