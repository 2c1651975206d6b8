//! The top-level registry: bootstraps the StorageEngine and SchemaStore,
//! reloads every persisted collection on open, and creates/looks up/drops
//! collections by name thereafter.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::collection::DocumentCollection;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::schema_store::SchemaStore;
use crate::storage::StorageEngine;

/// Owns the StorageEngine and the live collection registry. Collections hold
/// only a shared (`Arc`) reference to the engine; the `Database` is the sole
/// owner of the engine itself and of the registry map.
pub struct Database {
    engine: Arc<StorageEngine>,
    schema_store: Arc<SchemaStore>,
    collections: DashMap<String, Arc<DocumentCollection>>,
    config: Arc<Config>,
}

impl Database {
    /// Ensures `config.data_path` exists, opens the StorageEngine rooted
    /// there, opens the SchemaStore, and instantiates a `DocumentCollection`
    /// for every schema found persisted from a prior run.
    pub fn open(config: Config) -> Result<Self> {
        std::fs::create_dir_all(&config.data_path)?;

        let engine = Arc::new(StorageEngine::open(
            &config.data_path,
            &config.storage,
            config.open_flags,
        )?);
        let schema_store = Arc::new(SchemaStore::new(engine.clone()));
        let config = Arc::new(config);

        let collections = DashMap::new();
        for (name, schema) in schema_store.get_all()? {
            let collection = DocumentCollection::open(
                name.clone(),
                engine.clone(),
                schema_store.clone(),
                &config,
                Some(schema),
            )?;
            collections.insert(name, collection);
        }

        Ok(Database {
            engine,
            schema_store,
            collections,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the existing collection, or creates a new one (with the
    /// default three-field schema) on first reference by this name.
    pub fn lookup(&self, name: &str) -> Result<Arc<DocumentCollection>> {
        if let Some(existing) = self.collections.get(name) {
            return Ok(existing.clone());
        }

        let fresh = DocumentCollection::open(
            name,
            self.engine.clone(),
            self.schema_store.clone(),
            &self.config,
            None,
        )?;

        // Another caller may have raced us to create the same collection;
        // the entry API makes the decision atomic without holding the lock
        // across the (slower) `DocumentCollection::open` call above.
        match self.collections.entry(name.to_string()) {
            Entry::Occupied(existing) => Ok(existing.get().clone()),
            Entry::Vacant(slot) => {
                slot.insert(fresh.clone());
                Ok(fresh)
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.collections.contains_key(name)
    }

    /// Names of every collection currently registered (loaded at open, or
    /// created since via `lookup`).
    pub fn collection_names(&self) -> Vec<String> {
        self.collections.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Removes the collection from the registry and permanently drops it:
    /// its store sub-database, its schema entry, and its on-disk index
    /// directory.
    pub async fn drop(&self, name: &str) -> Result<()> {
        let Some((_, collection)) = self.collections.remove(name) else {
            return Err(Error::invalid_argument(format!(
                "collection '{name}' does not exist"
            )));
        };
        collection.drop().await
    }

    /// Closes every collection (releasing their Index handles without
    /// deleting anything) and then closes the StorageEngine. Does not
    /// require the engine's `Arc` to be uniquely held: a caller that kept a
    /// `DocumentCollection` handle from an earlier `lookup` still holds a
    /// clone of it, and that is fine: the engine stops accepting writes and
    /// joins its writer thread here regardless, and the `Env` itself is
    /// released once every last clone is eventually dropped.
    pub async fn close(self) -> Result<()> {
        for (_, collection) in self.collections.into_iter() {
            collection.close().await?;
        }
        drop(self.schema_store);
        self.engine.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use serde_json::json;

    fn config(dir: &std::path::Path) -> Config {
        Config::default().with_data_path(dir)
    }

    #[tokio::test]
    async fn lookup_creates_then_reuses_collection() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(config(dir.path())).unwrap();

        assert!(!db.contains("books"));
        let a = db.lookup("books").unwrap();
        assert!(db.contains("books"));
        let b = db.lookup("books").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn drop_then_fresh_lookup_creates_empty_collection() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(config(dir.path())).unwrap();

        let books = db.lookup("books").unwrap();
        let id = books
            .insert(Document::from_json(&json!({"title": "x"})).unwrap())
            .await
            .unwrap();
        assert!(books.get(id).unwrap().is_some());

        db.drop("books").await.unwrap();
        assert!(!db.contains("books"));

        let fresh = db.lookup("books").unwrap();
        assert!(fresh.get(id).unwrap().is_none());
    }

    #[tokio::test]
    async fn drop_missing_collection_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(config(dir.path())).unwrap();
        assert!(db.drop("nonexistent").await.is_err());
    }

    #[tokio::test]
    async fn reopen_restores_persisted_schema() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = Database::open(config(dir.path())).unwrap();
            let books = db.lookup("books").unwrap();
            books
                .insert(Document::from_json(&json!({"title": "x", "rating": 9})).unwrap())
                .await
                .unwrap();
            // Give the schema-persistence timer a tick to flush.
            tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
            db.close().await.unwrap();
        }

        let db = Database::open(config(dir.path())).unwrap();
        assert!(db.contains("books"));
        let books = db.lookup("books").unwrap();
        assert_eq!(
            books.schema().get("rating").unwrap().data_type,
            crate::schema::DataType::Integer
        );
    }
}
