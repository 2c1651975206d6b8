use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use heed::types::Bytes;
use heed::{Database, Env, EnvFlags, EnvOpenOptions};

use crate::config::StorageSettings;
use crate::error::{Error, Result};

use super::ops::{WriteCommand, WriteOp};
use super::reader;
use super::writer::{self, DbMap};

pub const SCHEMA_SUB_DB: &str = "__schema";

/// StorageEngine-level open flags, mirroring the LMDB environment flags the
/// design enumerates.
#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub write_map: bool,
    pub async_map: bool,
    pub no_meta_sync: bool,
    pub no_thread_local_storage: bool,
}

/// The single-writer, multi-reader transactional store. Owns the mmap'd
/// environment and every open sub-database; all mutation is funneled
/// through one background worker thread via a bounded FIFO channel.
pub struct StorageEngine {
    env: Env,
    dbs: DbMap,
    sender: RwLock<crossbeam::channel::Sender<WriteCommand>>,
    worker: parking_lot::Mutex<Option<std::thread::JoinHandle<()>>>,
    shutdown: Arc<std::sync::atomic::AtomicBool>,
}

impl StorageEngine {
    /// Open (creating if absent) the mmap environment rooted at
    /// `<data_path>/db`.
    pub fn open(data_path: &Path, settings: &StorageSettings, flags: StorageConfig) -> Result<Self> {
        let db_dir = data_path.join("db");
        std::fs::create_dir_all(&db_dir)?;

        let mut options = EnvOpenOptions::new();
        options.map_size(settings.map_size);
        options.max_dbs(settings.max_sub_databases);
        options.max_readers(settings.max_reader_slots);

        let mut env_flags = EnvFlags::empty();
        if flags.write_map {
            env_flags |= EnvFlags::WRITE_MAP;
        }
        if flags.async_map {
            env_flags |= EnvFlags::MAP_ASYNC;
        }
        if flags.no_meta_sync {
            env_flags |= EnvFlags::NO_META_SYNC;
        }
        if flags.no_thread_local_storage {
            env_flags |= EnvFlags::NO_TLS;
        }
        unsafe {
            options.flags(env_flags);
        }

        // SAFETY: the environment is only ever opened once for this path
        // within this process, and the directory is exclusively owned by
        // this StorageEngine for its lifetime.
        let env = unsafe { options.open(&db_dir)? };

        let dbs: DbMap = Arc::new(RwLock::new(HashMap::new()));
        let (sender, receiver) = crossbeam::channel::bounded(1024);
        let worker = writer::spawn(env.clone(), dbs.clone(), receiver);

        let engine = StorageEngine {
            env,
            dbs,
            sender: RwLock::new(sender),
            worker: parking_lot::Mutex::new(Some(worker)),
            shutdown: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        };
        engine.ensure_sub_database(SCHEMA_SUB_DB)?;
        Ok(engine)
    }

    /// Open (creating if absent) a named sub-database. Collection names
    /// containing `[` or `]` are rejected, per the reserved naming rule.
    pub fn ensure_sub_database(&self, name: &str) -> Result<()> {
        if name.contains('[') || name.contains(']') {
            return Err(Error::invalid_argument(format!(
                "sub-database name '{name}' may not contain '[' or ']'"
            )));
        }
        if self.dbs.read().unwrap().contains_key(name) {
            return Ok(());
        }
        let mut wtxn = self.env.write_txn()?;
        let db: Database<Bytes, Bytes> = self
            .env
            .create_database(&mut wtxn, Some(name))?;
        wtxn.commit()?;
        self.dbs.write().unwrap().insert(name.to_string(), db);
        Ok(())
    }

    fn db_handle(&self, name: &str) -> Result<Database<Bytes, Bytes>> {
        self.dbs
            .read()
            .unwrap()
            .get(name)
            .copied()
            .ok_or_else(|| Error::invalid_argument(format!("sub-database '{name}' is not open")))
    }

    async fn submit(&self, op: WriteOp) -> Result<usize> {
        if self.shutdown.load(std::sync::atomic::Ordering::Acquire) {
            return Err(Error::Cancelled);
        }
        let (respond_to, receiver) = tokio::sync::oneshot::channel();
        self.sender
            .read()
            .unwrap()
            .send(WriteCommand { op, respond_to })
            .map_err(|_| Error::Cancelled)?;
        receiver.await.map_err(|_| Error::Cancelled)?
    }

    pub async fn insert(&self, sub_db: &str, pairs: Vec<(Vec<u8>, Vec<u8>)>) -> Result<usize> {
        self.submit(WriteOp::Insert {
            sub_db: sub_db.to_string(),
            pairs,
        })
        .await
    }

    pub async fn update(&self, sub_db: &str, pairs: Vec<(Vec<u8>, Vec<u8>)>) -> Result<usize> {
        self.submit(WriteOp::Update {
            sub_db: sub_db.to_string(),
            pairs,
        })
        .await
    }

    pub async fn delete(&self, sub_db: &str, keys: Vec<Vec<u8>>) -> Result<usize> {
        self.submit(WriteOp::Delete {
            sub_db: sub_db.to_string(),
            keys,
        })
        .await
    }

    pub async fn drop_sub_database(&self, sub_db: &str) -> Result<()> {
        self.submit(WriteOp::DropSubDatabase {
            sub_db: sub_db.to_string(),
        })
        .await?;
        self.dbs.write().unwrap().remove(sub_db);
        Ok(())
    }

    pub async fn truncate_sub_database(&self, sub_db: &str) -> Result<()> {
        self.submit(WriteOp::TruncateSubDatabase {
            sub_db: sub_db.to_string(),
        })
        .await?;
        Ok(())
    }

    pub fn get(&self, sub_db: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        reader::get(&self.env, &self.db_handle(sub_db)?, key)
    }

    pub fn get_many(&self, sub_db: &str, keys: &[Vec<u8>]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        reader::get_many(&self.env, &self.db_handle(sub_db)?, keys)
    }

    pub fn exists(&self, sub_db: &str, key: &[u8]) -> Result<bool> {
        reader::exists(&self.env, &self.db_handle(sub_db)?, key)
    }

    pub fn count(&self, sub_db: &str) -> Result<usize> {
        reader::count(&self.env, &self.db_handle(sub_db)?)
    }

    pub fn scan(&self, sub_db: &str) -> Result<super::reader::ScanIter> {
        reader::scan(&self.env, &self.db_handle(sub_db)?)
    }

    /// Stop accepting new writes, drain the queue, cancel pending writes,
    /// and join the writer thread. Takes `&self` rather than consuming the
    /// engine: callers reach this through a shared `Arc<StorageEngine>`, and
    /// other `Arc` clones (e.g. held by a collection a caller hasn't
    /// dropped yet) may legitimately outlive this call. The `Env` itself is
    /// reference counted and is actually closed once every clone (including
    /// ones held by in-flight reader calls) is dropped.
    pub async fn close(&self) -> Result<()> {
        self.shutdown.store(true, std::sync::atomic::Ordering::Release);
        // Dropping the last sender closes the channel; the worker's `recv`
        // loop observes this, drains nothing further, and exits.
        let (replacement, _unused_receiver) = crossbeam::channel::bounded(0);
        let old_sender = std::mem::replace(&mut *self.sender.write().unwrap(), replacement);
        drop(old_sender);
        if let Some(handle) = self.worker.lock().take() {
            let _ = tokio::task::spawn_blocking(move || handle.join()).await;
        }
        Ok(())
    }
}
