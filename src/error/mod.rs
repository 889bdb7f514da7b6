//! Unified error handling for the document store

use thiserror::Error;

/// Crate-wide result type
pub type Result<T> = std::result::Result<T, StoreError>;

/// Storage layer error types
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("entity {id} not found in {table}")]
    NotFound { table: String, id: String },

    #[error("delete of {id} from {table} matched {affected} rows")]
    AmbiguousDelete {
        table: String,
        id: String,
        affected: u64,
    },

    #[error("insert into {table} affected no rows for id {id}")]
    InsertFailed { table: String, id: String },

    #[error("update of {table} affected no rows for id {id}")]
    UpdateFailed { table: String, id: String },

    #[error("entity {id} is not managed")]
    Detached { id: String },

    #[error("payload for {id} in {table} is not a JSON object")]
    InvalidPayload { table: String, id: String },

    #[error("payload codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
