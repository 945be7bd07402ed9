//! Persistent index implementations.

mod sqlite;

pub use sqlite::{ResourceRecord, SqliteIndexStore};
