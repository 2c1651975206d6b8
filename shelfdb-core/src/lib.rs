// shelfdb-core/src/lib.rs
// Embedded document collection engine: durable store + full-text/faceted index + dynamic schema.

#![allow(clippy::too_many_arguments)]
#![allow(clippy::should_implement_trait)]
#![allow(clippy::result_large_err)]
#![cfg_attr(test, allow(dead_code))]

pub mod collection;
pub mod compression;
pub mod config;
pub mod database;
pub mod document;
pub mod document_store;
pub mod error;
pub mod identifier;
pub mod index;
pub mod logging;
pub mod schema;
pub mod schema_store;
pub mod storage;

pub use collection::{DocumentCollection, SearchResult};
pub use compression::Codec;
pub use config::Config;
pub use database::Database;
pub use document::{Document, Timestamp, Value};
pub use document_store::DocumentStore;
pub use error::{Error, Result};
pub use identifier::Identifier;
pub use index::{CategoryRollup, SearchCriteria};
pub use schema::{DataType, Field, Schema};
pub use schema_store::SchemaStore;
pub use storage::{StorageConfig, StorageEngine};
