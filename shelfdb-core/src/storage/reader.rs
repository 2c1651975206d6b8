//! Reader-side operations. Every call opens a fresh `heed::RoTxn` against
//! the mmap'd environment; LMDB-style read transactions are cheap to open
//! and never block (or are blocked by) the single writer.

use heed::types::Bytes;
use heed::{Database, Env};

use crate::error::Result;

pub fn get(env: &Env, db: &Database<Bytes, Bytes>, key: &[u8]) -> Result<Option<Vec<u8>>> {
    let rtxn = env.read_txn()?;
    Ok(db.get(&rtxn, key)?.map(|v| v.to_vec()))
}

/// Multi-get preserving caller order; missing keys are omitted rather than
/// represented as `None`, per the store's contract.
pub fn get_many(
    env: &Env,
    db: &Database<Bytes, Bytes>,
    keys: &[Vec<u8>],
) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let rtxn = env.read_txn()?;
    let mut out = Vec::with_capacity(keys.len());
    for key in keys {
        if let Some(value) = db.get(&rtxn, key)? {
            out.push((key.clone(), value.to_vec()));
        }
    }
    Ok(out)
}

pub fn exists(env: &Env, db: &Database<Bytes, Bytes>, key: &[u8]) -> Result<bool> {
    let rtxn = env.read_txn()?;
    Ok(db.get(&rtxn, key)?.is_some())
}

pub fn count(env: &Env, db: &Database<Bytes, Bytes>) -> Result<usize> {
    let rtxn = env.read_txn()?;
    Ok(db.len(&rtxn)? as usize)
}

/// A finite, restartable snapshot of every key/value pair in the
/// sub-database at the moment of the call. Restartable here means "calling
/// `scan` again produces a fresh, independent snapshot", which is all the
/// design requires; we materialize eagerly rather than streaming a live
/// cursor across an awaited boundary (an open `RoTxn`/`RoIter` borrows the
/// transaction and is not `Send`).
pub struct ScanIter {
    items: std::vec::IntoIter<(Vec<u8>, Vec<u8>)>,
}

impl Iterator for ScanIter {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        self.items.next()
    }
}

pub fn scan(env: &Env, db: &Database<Bytes, Bytes>) -> Result<ScanIter> {
    let rtxn = env.read_txn()?;
    let mut items = Vec::new();
    for entry in db.iter(&rtxn)? {
        let (k, v) = entry?;
        items.push((k.to_vec(), v.to_vec()));
    }
    Ok(ScanIter {
        items: items.into_iter(),
    })
}
