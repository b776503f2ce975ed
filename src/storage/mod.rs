//! Persistence layer.
//!
//! Repository contracts in [`traits`], the `SQLite` schema in
//! [`schema`], and a [`SqliteStorage`] that implements every contract
//! behind one shared handle.

pub mod schema;
pub mod sqlite;
pub mod traits;

pub use sqlite::{DEFAULT_DB_PATH, SqliteStorage, StorageStats};
pub use traits::{ChunkRepo, ConfirmationRepo, ConversationRepo, FactRepo, SqlExecutor, SqlOutput};
