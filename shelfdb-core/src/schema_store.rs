//! Persistence for a collection's `Schema`, backed by the reserved
//! `__schema` sub-database. One entry per collection, keyed by its name.

use std::sync::Arc;

use crate::error::Result;
use crate::schema::Schema;
use crate::storage::{StorageEngine, SCHEMA_SUB_DB};

pub struct SchemaStore {
    engine: Arc<StorageEngine>,
}

impl SchemaStore {
    pub fn new(engine: Arc<StorageEngine>) -> Self {
        SchemaStore { engine }
    }

    pub fn get(&self, collection: &str) -> Result<Option<Schema>> {
        match self.engine.get(SCHEMA_SUB_DB, collection.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes).map_err(|e| {
                crate::error::Error::Config(format!("corrupt persisted schema: {e}"))
            })?)),
            None => Ok(None),
        }
    }

    pub fn get_all(&self) -> Result<Vec<(String, Schema)>> {
        let mut out = Vec::new();
        for (key, value) in self.engine.scan(SCHEMA_SUB_DB)? {
            let name = String::from_utf8_lossy(&key).into_owned();
            let schema: Schema = bincode::deserialize(&value).map_err(|e| {
                crate::error::Error::Config(format!("corrupt persisted schema: {e}"))
            })?;
            out.push((name, schema));
        }
        Ok(out)
    }

    /// Overwrites any existing entry for `collection`. Persistence is a
    /// last-write-wins snapshot of the in-memory schema, not an append log.
    pub async fn put(&self, collection: &str, schema: &Schema) -> Result<()> {
        let bytes = schema.to_canonical_bytes();
        let key = collection.as_bytes().to_vec();
        if self.engine.exists(SCHEMA_SUB_DB, &key)? {
            self.engine.update(SCHEMA_SUB_DB, vec![(key, bytes)]).await?;
        } else {
            self.engine.insert(SCHEMA_SUB_DB, vec![(key, bytes)]).await?;
        }
        Ok(())
    }

    pub async fn delete(&self, collection: &str) -> Result<()> {
        self.engine
            .delete(SCHEMA_SUB_DB, vec![collection.as_bytes().to_vec()])
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageSettings;
    use crate::storage::StorageConfig as EngineFlags;
    use serde_json::json;

    async fn store() -> (tempfile::TempDir, SchemaStore) {
        let dir = tempfile::tempdir().unwrap();
        let settings = StorageSettings {
            map_size: 64 * 1024 * 1024,
            max_sub_databases: 16,
            max_reader_slots: 32,
        };
        let engine = Arc::new(StorageEngine::open(dir.path(), &settings, EngineFlags::default()).unwrap());
        (dir, SchemaStore::new(engine))
    }

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let (_dir, store) = store().await;
        let mut schema = Schema::create_default();
        schema
            .merge_inferred(&crate::document::Document::from_json(&json!({"title": "x"})).unwrap())
            .unwrap();

        store.put("books", &schema).await.unwrap();
        let loaded = store.get("books").unwrap().unwrap();
        assert_eq!(loaded, &schema);
    }

    #[tokio::test]
    async fn put_overwrites_existing_entry() {
        let (_dir, store) = store().await;
        let mut a = Schema::create_default();
        a.merge_inferred(&crate::document::Document::from_json(&json!({"x": 1})).unwrap())
            .unwrap();
        store.put("books", &a).await.unwrap();

        let mut b = Schema::create_default();
        b.merge_inferred(&crate::document::Document::from_json(&json!({"x": 1, "y": 2})).unwrap())
            .unwrap();
        store.put("books", &b).await.unwrap();

        let loaded = store.get("books").unwrap().unwrap();
        assert_eq!(loaded, &b);
    }

    #[tokio::test]
    async fn get_all_lists_every_collection() {
        let (_dir, store) = store().await;
        store.put("books", &Schema::create_default()).await.unwrap();
        store.put("authors", &Schema::create_default()).await.unwrap();

        let all = store.get_all().unwrap();
        let names: Vec<_> = all.iter().map(|(n, _)| n.clone()).collect();
        assert!(names.contains(&"books".to_string()));
        assert!(names.contains(&"authors".to_string()));
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let (_dir, store) = store().await;
        store.put("books", &Schema::create_default()).await.unwrap();
        store.delete("books").await.unwrap();
        assert!(store.get("books").unwrap().is_none());
    }
}
