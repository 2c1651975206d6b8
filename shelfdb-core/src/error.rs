//! Crate-wide error taxonomy.
//!
//! Mirrors the error kinds of the design: invalid arguments, a dropped collection,
//! duplicate ids, schema conflicts, and the two backend failure domains (storage,
//! index), plus cancellation on shutdown.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("collection '{0}' has been dropped")]
    CollectionDropped(String),

    #[error("document with id {0} already exists")]
    DuplicateId(String),

    #[error("field '{field}' conflicts with schema type {expected:?} (observed {observed:?})")]
    SchemaConflict {
        field: String,
        expected: crate::schema::DataType,
        observed: crate::schema::DataType,
    },

    #[error("storage error: {0}")]
    Storage(#[from] heed::Error),

    #[error("index error: {0}")]
    Index(#[from] tantivy::TantivyError),

    #[error("query parse error: {0}")]
    QueryParse(#[from] tantivy::query::QueryParserError),

    #[error("write queue is shutting down; operation cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Whether this error reflects the storage-error kind, for callers that need
    /// to distinguish "engine still usable" failures from fatal ones.
    pub fn is_storage(&self) -> bool {
        matches!(self, Error::Storage(_))
    }
}
