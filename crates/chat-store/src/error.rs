use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Any failure reported by SQLite itself (I/O, corruption, locking).
    #[error("storage error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found: {0}")]
    NotFound(String),

    /// A lookup by message id alone matched rows in several chats.
    #[error("message {id} exists in {matches} chats, a chat address is required")]
    Ambiguous { id: String, matches: usize },
}
