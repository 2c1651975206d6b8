//! The single background writer: consumes an ordered, bounded queue of
//! write operations and applies each inside its own read-write transaction.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use heed::types::Bytes;
use heed::{Database, Env};

use crate::error::{Error, Result};

use super::ops::{WriteCommand, WriteOp};

pub(super) type DbMap = Arc<RwLock<HashMap<String, Database<Bytes, Bytes>>>>;

pub(super) fn spawn(
    env: Env,
    dbs: DbMap,
    receiver: crossbeam::channel::Receiver<WriteCommand>,
) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name("shelfdb-writer".to_string())
        .spawn(move || run(env, dbs, receiver))
        .expect("failed to spawn storage writer thread")
}

fn run(env: Env, dbs: DbMap, receiver: crossbeam::channel::Receiver<WriteCommand>) {
    // FIFO: `recv` blocks until a command is available, so commands are
    // applied strictly in submission order across all producers.
    while let Ok(command) = receiver.recv() {
        let result = apply(&env, &dbs, command.op);
        // The submitter may have dropped its receiver (e.g. cancelled
        // await); that's not the worker's problem.
        let _ = command.respond_to.send(result);
    }
    tracing::info!("storage writer thread exiting: queue closed");
}

fn apply(env: &Env, dbs: &DbMap, op: WriteOp) -> Result<usize> {
    let db = lookup_db(dbs, op.sub_db())?;

    match op {
        WriteOp::Insert { pairs, .. } => {
            let mut wtxn = env.write_txn()?;
            for (key, _) in &pairs {
                if db.get(&wtxn, key)?.is_some() {
                    return Err(Error::DuplicateId(hex(key)));
                }
            }
            for (key, value) in &pairs {
                db.put(&mut wtxn, key, value)?;
            }
            wtxn.commit()?;
            Ok(pairs.len())
        }
        WriteOp::Update { pairs, .. } => {
            let mut wtxn = env.write_txn()?;
            for (key, _) in &pairs {
                if db.get(&wtxn, key)?.is_none() {
                    return Err(Error::invalid_argument(format!(
                        "update target {} does not exist",
                        hex(key)
                    )));
                }
            }
            for (key, value) in &pairs {
                db.put(&mut wtxn, key, value)?;
            }
            wtxn.commit()?;
            Ok(pairs.len())
        }
        WriteOp::Delete { keys, .. } => {
            let mut wtxn = env.write_txn()?;
            let mut removed = 0usize;
            for key in &keys {
                if db.delete(&mut wtxn, key)? {
                    removed += 1;
                }
            }
            wtxn.commit()?;
            Ok(removed)
        }
        WriteOp::TruncateSubDatabase { .. } | WriteOp::DropSubDatabase { .. } => {
            // The safe `heed` API does not expose deleting a named
            // database's definition (LMDB's `mdb_drop(del=1)`); dropping a
            // collection's sub-database is realized by clearing all of its
            // entries, which satisfies every externally observable part of
            // the drop contract (existence becomes false for every id, the
            // entry count goes to zero). See DESIGN.md.
            let mut wtxn = env.write_txn()?;
            db.clear(&mut wtxn)?;
            wtxn.commit()?;
            Ok(1)
        }
    }
}

fn lookup_db(dbs: &DbMap, name: &str) -> Result<Database<Bytes, Bytes>> {
    dbs.read()
        .unwrap()
        .get(name)
        .copied()
        .ok_or_else(|| Error::invalid_argument(format!("sub-database '{name}' is not open")))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
