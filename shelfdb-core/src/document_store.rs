//! Per-collection view over the StorageEngine: CRUD, existence, bulk read,
//! truncate, drop. Thin and stateless: it holds only a collection name and
//! a shared handle to the engine.

use std::sync::Arc;

use crate::compression::Codec;
use crate::document::{Document, Value, CREATED_FIELD, ID_FIELD, MODIFIED_FIELD};
use crate::error::{Error, Result};
use crate::identifier::Identifier;
use crate::storage::StorageEngine;

/// A bound no single read transaction should exceed, keeping multi-get
/// batches short-lived.
const GET_MANY_BATCH: usize = 256;

pub struct DocumentStore {
    name: String,
    engine: Arc<StorageEngine>,
    codec: Codec,
}

impl DocumentStore {
    pub fn new(name: impl Into<String>, engine: Arc<StorageEngine>, codec: Codec) -> Result<Self> {
        let name = name.into();
        engine.ensure_sub_database(&name)?;
        Ok(DocumentStore { name, engine, codec })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Assigns `_id`/`_createdTimestamp`/`_modifiedTimestamp` if absent,
    /// normalizes dates, serializes, and submits the insert. Returns the
    /// (possibly newly assigned) id.
    pub async fn insert(&self, mut doc: Document) -> Result<Identifier> {
        let id = match doc.id() {
            Some(id) if !id.is_empty() => id,
            _ => {
                let id = Identifier::generate();
                doc.set(ID_FIELD, Value::Identifier(id))?;
                id
            }
        };

        let now = crate::document::Timestamp::now();
        if doc.created_at().is_none() {
            doc.set(CREATED_FIELD, Value::Timestamp(now))?;
        }
        if doc.modified_at().is_none() {
            doc.set(MODIFIED_FIELD, Value::Timestamp(now))?;
        }
        doc.normalize_dates_to_utc();

        let bytes = doc.to_canonical_bytes(self.codec)?;
        self.engine
            .insert(&self.name, vec![(id.as_bytes().to_vec(), bytes)])
            .await?;
        Ok(id)
    }

    pub fn get(&self, id: Identifier) -> Result<Option<Document>> {
        match self.engine.get(&self.name, id.as_bytes())? {
            Some(bytes) => Ok(Some(Document::from_canonical_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Preserves caller order; missing ids are simply omitted.
    pub fn get_many(&self, ids: &[Identifier]) -> Result<Vec<Document>> {
        let mut by_id = std::collections::HashMap::with_capacity(ids.len());
        for chunk in ids.chunks(GET_MANY_BATCH) {
            let keys: Vec<Vec<u8>> = chunk.iter().map(|id| id.as_bytes().to_vec()).collect();
            for (key, value) in self.engine.get_many(&self.name, &keys)? {
                let mut arr = [0u8; 16];
                arr.copy_from_slice(&key);
                by_id.insert(Identifier::from_bytes(arr), Document::from_canonical_bytes(&value)?);
            }
        }
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    pub fn get_all(&self) -> Result<impl Iterator<Item = Result<Document>>> {
        let iter = self.engine.scan(&self.name)?;
        Ok(iter.map(|(_, v)| Document::from_canonical_bytes(&v)))
    }

    /// Preserves `_createdTimestamp` from the existing document, refreshes
    /// `_modifiedTimestamp`, and returns 0 (no-op, nothing submitted) if the
    /// document doesn't exist.
    pub async fn update(&self, mut doc: Document) -> Result<usize> {
        let id = doc
            .id()
            .ok_or_else(|| Error::invalid_argument("update requires a non-empty _id"))?;

        let Some(existing) = self.get(id)? else {
            return Ok(0);
        };

        if doc.created_at().is_none() {
            if let Some(created) = existing.created_at() {
                doc.set(CREATED_FIELD, Value::Timestamp(created))?;
            }
        }
        if doc.modified_at().is_none() {
            doc.set(MODIFIED_FIELD, Value::Timestamp(crate::document::Timestamp::now()))?;
        }
        doc.normalize_dates_to_utc();

        let bytes = doc.to_canonical_bytes(self.codec)?;
        self.engine
            .update(&self.name, vec![(id.as_bytes().to_vec(), bytes)])
            .await
    }

    pub async fn delete(&self, id: Identifier) -> Result<usize> {
        self.engine.delete(&self.name, vec![id.as_bytes().to_vec()]).await
    }

    pub async fn delete_many(&self, ids: &[Identifier]) -> Result<usize> {
        let keys = ids.iter().map(|id| id.as_bytes().to_vec()).collect();
        self.engine.delete(&self.name, keys).await
    }

    pub fn exists(&self, id: Identifier) -> Result<bool> {
        self.engine.exists(&self.name, id.as_bytes())
    }

    pub fn len(&self) -> Result<usize> {
        self.engine.count(&self.name)
    }

    pub async fn truncate(&self) -> Result<()> {
        self.engine.truncate_sub_database(&self.name).await
    }

    pub async fn drop(&self) -> Result<()> {
        self.engine.drop_sub_database(&self.name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageSettings;
    use crate::storage::{StorageConfig as EngineFlags, StorageEngine};
    use serde_json::json;

    async fn store() -> (tempfile::TempDir, DocumentStore) {
        let dir = tempfile::tempdir().unwrap();
        let settings = StorageSettings {
            map_size: 64 * 1024 * 1024,
            max_sub_databases: 16,
            max_reader_slots: 32,
        };
        let engine = Arc::new(
            StorageEngine::open(dir.path(), &settings, EngineFlags::default()).unwrap(),
        );
        let store = DocumentStore::new("books", engine, Codec::None).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn insert_assigns_id_and_timestamps() {
        let (_dir, store) = store().await;
        let doc = Document::from_json(&json!({"title": "Hitchhiker's Guide"})).unwrap();
        let id = store.insert(doc).await.unwrap();
        assert!(!id.is_empty());

        let fetched = store.get(id).unwrap().unwrap();
        assert_eq!(fetched.created_at(), fetched.modified_at());
        assert_eq!(fetched.get("title").unwrap().as_str(), Some("Hitchhiker's Guide"));
    }

    #[tokio::test]
    async fn update_preserves_created_timestamp() {
        let (_dir, store) = store().await;
        let doc = Document::from_json(&json!({"rating": 9})).unwrap();
        let id = store.insert(doc).await.unwrap();
        let created = store.get(id).unwrap().unwrap().created_at().unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(2)).await;

        let mut update_doc = Document::from_json(&json!({"rating": 10})).unwrap();
        update_doc.set(ID_FIELD, Value::Identifier(id)).unwrap();
        let affected = store.update(update_doc).await.unwrap();
        assert_eq!(affected, 1);

        let updated = store.get(id).unwrap().unwrap();
        assert_eq!(updated.created_at().unwrap(), created);
        assert!(updated.modified_at().unwrap().0 > created.0);
    }

    #[tokio::test]
    async fn update_missing_document_is_a_noop() {
        let (_dir, store) = store().await;
        let mut doc = Document::empty();
        doc.set(ID_FIELD, Value::Identifier(Identifier::generate())).unwrap();
        assert_eq!(store.update(doc).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn get_many_preserves_order_and_omits_misses() {
        let (_dir, store) = store().await;
        let id1 = store.insert(Document::from_json(&json!({"n": 1})).unwrap()).await.unwrap();
        let id2 = store.insert(Document::from_json(&json!({"n": 2})).unwrap()).await.unwrap();
        let missing = Identifier::generate();

        let docs = store.get_many(&[id2, missing, id1]).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].get("n").unwrap(), &Value::Integer(2));
        assert_eq!(docs[1].get("n").unwrap(), &Value::Integer(1));
    }

    #[tokio::test]
    async fn delete_then_get_is_none() {
        let (_dir, store) = store().await;
        let id = store.insert(Document::from_json(&json!({"x": 1})).unwrap()).await.unwrap();
        assert_eq!(store.delete(id).await.unwrap(), 1);
        assert!(store.get(id).unwrap().is_none());
    }
}
