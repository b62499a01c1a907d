//! Store implementations — one per table family, all sharing one SQLite file.
//!
//! Stores are synchronous; [`MemorySystem`](super::MemorySystem) runs them on
//! the blocking pool.

pub mod conversations;
pub mod personas;
pub mod users;
