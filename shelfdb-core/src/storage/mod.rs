//! The single-writer, multi-reader transactional key-value store.
//!
//! Realized on top of an embedded LMDB-style mmap'd environment (`heed`):
//! one environment, N named sub-databases, exactly one writer transaction
//! open at a time (enforced here by routing every write through a single
//! background worker thread), and unlimited concurrent reader transactions.

mod engine;
mod ops;
mod reader;
mod writer;

pub use engine::{StorageConfig, StorageEngine, SCHEMA_SUB_DB};
pub use ops::WriteOp;
pub use reader::ScanIter;
