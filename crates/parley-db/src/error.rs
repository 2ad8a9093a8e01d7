use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Reply target missing or in another room.
    #[error("reply target does not exist in this room")]
    InvalidReplyTarget,

    #[error("message not found")]
    MessageNotFound,

    #[error("room not found")]
    RoomNotFound,

    /// The call's deadline passed before it could commit. Nothing was written.
    #[error("store deadline passed")]
    DeadlineExceeded,

    #[error("database lock poisoned")]
    LockPoisoned,

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
