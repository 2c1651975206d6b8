//! The façade binding a [`Schema`], a [`DocumentStore`], and an [`Index`]
//! into one coherent collection: orchestrates CRUD and search, and runs the
//! periodic schema-persistence timer.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::config::Config;
use crate::document::{Document, Timestamp, Value, CREATED_FIELD, ID_FIELD, MODIFIED_FIELD};
use crate::document_store::DocumentStore;
use crate::error::{Error, Result};
use crate::identifier::Identifier;
use crate::index::{CategoryRollup, Index, IndexSettings, SearchCriteria};
use crate::schema::Schema;
use crate::schema_store::SchemaStore;
use crate::storage::StorageEngine;

/// Field a highlighted fragment is written under when a search requests
/// `include_highlight`. Not part of the document's own schema.
pub const HIGHLIGHT_FIELD: &str = "_highlight";

/// What [`DocumentCollection::search`] hands back to the caller: the Index's
/// pagination/rollup metadata plus the actually-fetched documents, in the
/// same order as the ranked ids.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub top_n: usize,
    pub items_per_page: usize,
    pub page_number: usize,
    pub page_count: usize,
    pub item_count: usize,
    pub total_hits: usize,
    pub include_highlight: bool,
    pub select_categories: Vec<String>,
    pub top_n_categories: usize,
    pub categories: Vec<CategoryRollup>,
    pub documents: Vec<Document>,
}

/// Assigns `_id`/`_createdTimestamp`/`_modifiedTimestamp` on a fresh document
/// if absent, mirroring [`DocumentStore::insert`]'s own assignment so the
/// collection can hand an already-final document to the Index before the
/// store write is even submitted.
fn assign_identity(doc: &mut Document) -> Result<Identifier> {
    let id = match doc.id() {
        Some(id) if !id.is_empty() => id,
        _ => {
            let id = Identifier::generate();
            doc.set(ID_FIELD, Value::Identifier(id))?;
            id
        }
    };
    let now = Timestamp::now();
    if doc.created_at().is_none() {
        doc.set(CREATED_FIELD, Value::Timestamp(now))?;
    }
    if doc.modified_at().is_none() {
        doc.set(MODIFIED_FIELD, Value::Timestamp(now))?;
    }
    Ok(id)
}

/// Binds one collection's Schema, DocumentStore and Index together. Owned
/// exclusively by the [`crate::database::Database`] registry that created it
/// (wrapped in an `Arc` so the schema-persistence timer can hold a weak
/// reference back without keeping the collection alive on its own).
pub struct DocumentCollection {
    name: String,
    schema: RwLock<Schema>,
    store: DocumentStore,
    /// `None` once the collection has been dropped or closed; every
    /// operation that needs it fails with `collection-dropped` past that
    /// point.
    index: Mutex<Option<Index>>,
    schema_store: Arc<SchemaStore>,
    dropped: AtomicBool,
    timer: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl DocumentCollection {
    /// Opens (or creates) the collection named `name`: its store sub-database,
    /// its on-disk index directory, and - if this is a cold-start reload -
    /// the schema persisted for it. Spawns the schema-persistence timer and
    /// returns the collection ready to serve traffic.
    pub fn open(
        name: impl Into<String>,
        engine: Arc<StorageEngine>,
        schema_store: Arc<SchemaStore>,
        config: &Config,
        initial_schema: Option<Schema>,
    ) -> Result<Arc<Self>> {
        let name = name.into();
        let schema = initial_schema.unwrap_or_else(Schema::create_default);
        let store = DocumentStore::new(&name, engine, config.storage_compression)?;

        let index_settings = IndexSettings {
            null_sentinel_token: config.null_sentinel_token.clone(),
            auto_facet_enabled: config.auto_facet_enabled,
            auto_doc_values_enabled: config.auto_doc_values_enabled,
            ..IndexSettings::default()
        };
        let index_dir: PathBuf = config.data_path.join("index").join(&name);
        let index = Index::open(index_dir, index_settings)?;

        let collection = Arc::new(DocumentCollection {
            name,
            schema: RwLock::new(schema),
            store,
            index: Mutex::new(Some(index)),
            schema_store,
            dropped: AtomicBool::new(false),
            timer: Mutex::new(None),
        });

        let interval = Duration::from_secs_f64(config.schema_persistence_interval_seconds.max(0.001));
        let handle = Self::spawn_schema_timer(&collection, interval);
        *collection.timer.lock() = Some(handle);

        Ok(collection)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn ensure_not_dropped(&self) -> Result<()> {
        if self.dropped.load(Ordering::Acquire) {
            return Err(Error::CollectionDropped(self.name.clone()));
        }
        Ok(())
    }

    fn with_index<R>(&self, f: impl FnOnce(&Index) -> Result<R>) -> Result<R> {
        let guard = self.index.lock();
        let index = guard
            .as_ref()
            .ok_or_else(|| Error::CollectionDropped(self.name.clone()))?;
        f(index)
    }

    /// Returns the assigned `_id`. Fails *duplicate-id* if the caller supplied
    /// one that already exists; fails *schema-conflict* if a field's type
    /// contradicts what's on file. The index write happens synchronously,
    /// before the store write is even submitted; if the (queued, awaited)
    /// store write then fails, the index insert is rolled back on a
    /// best-effort basis and the original error is surfaced regardless.
    pub async fn insert(&self, mut doc: Document) -> Result<Identifier> {
        self.ensure_not_dropped()?;

        if let Some(id) = doc.id() {
            if !id.is_empty() && self.store.exists(id)? {
                return Err(Error::DuplicateId(id.to_hex()));
            }
        }

        {
            let mut schema = self.schema.write();
            schema.merge_inferred(&doc)?;
        }

        let id = assign_identity(&mut doc)?;
        doc.normalize_dates_to_utc();

        {
            let schema = self.schema.read();
            self.with_index(|index| index.insert(&doc, &schema))?;
        }

        match self.store.insert(doc).await {
            Ok(stored_id) => Ok(stored_id),
            Err(err) => {
                if let Err(compensation_err) = self.with_index(|index| index.delete(id)) {
                    tracing::warn!(
                        collection = %self.name,
                        id = %id,
                        error = %compensation_err,
                        "failed to roll back index insert after store write failure"
                    );
                }
                Err(err)
            }
        }
    }

    /// Bypasses the index entirely; `None` if the id isn't present (not an
    /// error).
    pub fn get(&self, id: Identifier) -> Result<Option<Document>> {
        self.ensure_not_dropped()?;
        self.store.get(id)
    }

    /// Runs the query through the Index to get a ranked, paginated list of
    /// ids, then bulk-fetches the corresponding documents from the store,
    /// preserving order. A hit whose document has not yet landed in the
    /// store - e.g. a searcher racing a concurrent insert that committed its
    /// index entry first - is a legitimate miss and is silently dropped, per
    /// the collection's read-consistency contract; it is not an error.
    pub async fn search(&self, criteria: SearchCriteria) -> Result<SearchResult> {
        self.ensure_not_dropped()?;

        let schema = self.schema.read().clone();
        let outcome = self.with_index(|index| index.search(&criteria, &schema))?;

        let mut documents = self.store.get_many(&outcome.items)?;

        if outcome.include_highlight {
            let highlights =
                self.with_index(|index| index.highlights(&criteria.query, &schema, &outcome.items))?;
            if !highlights.is_empty() {
                apply_highlights(&mut documents, &highlights);
            }
        }

        Ok(SearchResult {
            top_n: outcome.top_n,
            items_per_page: outcome.items_per_page,
            page_number: outcome.page_number,
            page_count: outcome.page_count,
            item_count: outcome.item_count,
            total_hits: outcome.total_hits,
            include_highlight: outcome.include_highlight,
            select_categories: outcome.select_categories,
            top_n_categories: outcome.top_n_categories,
            categories: outcome.categories,
            documents,
        })
    }

    /// Total document count in the index when `query` is empty or absent;
    /// otherwise the `total-hits` that query would produce.
    pub fn count(&self, query: Option<&str>) -> Result<usize> {
        self.ensure_not_dropped()?;
        let schema = self.schema.read();
        self.with_index(|index| index.count(query, &schema))
    }

    /// Returns the number of documents affected (0 or 1; 0 if `doc._id`
    /// doesn't exist, which is not an error). `_createdTimestamp` is
    /// preserved from the existing document; `_modifiedTimestamp` is
    /// refreshed. Both are pinned on `doc` before the index write so the
    /// indexed copy and the stored copy never disagree.
    pub async fn update(&self, mut doc: Document) -> Result<usize> {
        self.ensure_not_dropped()?;

        let id = doc
            .id()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::invalid_argument("update requires a non-empty _id"))?;

        let Some(existing) = self.store.get(id)? else {
            return Ok(0);
        };

        if doc.created_at().is_none() {
            if let Some(created) = existing.created_at() {
                doc.set(CREATED_FIELD, Value::Timestamp(created))?;
            }
        }
        if doc.modified_at().is_none() {
            doc.set(MODIFIED_FIELD, Value::Timestamp(Timestamp::now()))?;
        }
        doc.normalize_dates_to_utc();

        {
            let mut schema = self.schema.write();
            schema.merge_inferred(&doc)?;
        }

        {
            let schema = self.schema.read();
            self.with_index(|index| index.update(&doc, &schema))?;
        }

        self.store.update(doc).await
    }

    /// Returns the number of documents affected (0 or 1).
    pub async fn delete(&self, id: Identifier) -> Result<usize> {
        self.ensure_not_dropped()?;
        self.with_index(|index| index.delete(id))?;
        self.store.delete(id).await
    }

    pub async fn truncate(&self) -> Result<bool> {
        self.ensure_not_dropped()?;
        self.store.truncate().await?;
        self.with_index(|index| index.truncate())?;
        Ok(true)
    }

    /// Releases the index's handles without removing anything from disk.
    /// Used when the owning [`crate::database::Database`] is shutting down
    /// cleanly, as opposed to [`DocumentCollection::drop`] which deletes the
    /// collection's data permanently.
    pub async fn close(&self) -> Result<()> {
        if let Some(handle) = self.timer.lock().take() {
            handle.abort();
        }
        if let Some(index) = self.index.lock().take() {
            index.close()?;
        }
        Ok(())
    }

    /// Permanently removes the collection: store sub-database, then the
    /// index's on-disk directory, then the schema entry, in that order.
    /// Every operation on this collection value after a successful drop
    /// fails with *collection-dropped*.
    pub async fn drop(&self) -> Result<()> {
        self.ensure_not_dropped()?;
        self.dropped.store(true, Ordering::Release);

        if let Some(handle) = self.timer.lock().take() {
            handle.abort();
        }

        self.store.drop().await?;

        if let Some(index) = self.index.lock().take() {
            index.drop()?;
        }

        self.schema_store.delete(&self.name).await?;
        Ok(())
    }

    /// A clone of the collection's current field catalog, for read-through
    /// endpoints (e.g. `GET /db/_schemas/{collection}`).
    pub fn schema(&self) -> Schema {
        self.schema.read().clone()
    }

    /// Every document currently in the collection's store, bypassing the
    /// index entirely. Used by bulk tooling (e.g. the CLI's export command)
    /// that needs the whole collection rather than a ranked/paginated slice.
    pub fn all_documents(&self) -> Result<Vec<Document>> {
        self.ensure_not_dropped()?;
        self.store.get_all()?.collect()
    }

    /// Spawns the periodic schema-persistence tick. Holds only a `Weak`
    /// reference back to the collection: the timer must never be the reason
    /// a collection stays alive, and it has to notice on its own once the
    /// collection is gone rather than leak forever.
    fn spawn_schema_timer(collection: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let weak = Arc::downgrade(collection);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; nothing to persist yet.
            loop {
                ticker.tick().await;
                let Some(collection) = weak.upgrade() else {
                    return;
                };
                if collection.dropped.load(Ordering::Acquire) {
                    return;
                }
                if let Err(err) = collection.persist_schema_if_changed().await {
                    tracing::warn!(
                        collection = %collection.name,
                        error = %err,
                        "schema persistence tick failed"
                    );
                }
            }
        })
    }

    async fn persist_schema_if_changed(&self) -> Result<()> {
        let snapshot = self.schema.read().clone();
        match self.schema_store.get(&self.name)? {
            None => self.schema_store.put(&self.name, &snapshot).await,
            Some(persisted) if persisted != snapshot => {
                self.schema_store.put(&self.name, &snapshot).await
            }
            Some(_) => Ok(()),
        }
    }
}

fn apply_highlights(documents: &mut [Document], highlights: &HashMap<Identifier, String>) {
    for doc in documents.iter_mut() {
        if let Some(id) = doc.id() {
            if let Some(html) = highlights.get(&id) {
                let _ = doc.set(HIGHLIGHT_FIELD, Value::String(html.clone()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageSettings;
    use crate::storage::StorageConfig as EngineFlags;
    use serde_json::json;

    async fn collection(data_path: &std::path::Path) -> Arc<DocumentCollection> {
        let storage_settings = StorageSettings {
            map_size: 64 * 1024 * 1024,
            max_sub_databases: 16,
            max_reader_slots: 32,
        };
        let engine = Arc::new(
            StorageEngine::open(data_path, &storage_settings, EngineFlags::default()).unwrap(),
        );
        let schema_store = Arc::new(SchemaStore::new(engine.clone()));
        let config = Config::default().with_data_path(data_path);
        DocumentCollection::open("books", engine, schema_store, &config, None).unwrap()
    }

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let coll = collection(dir.path()).await;

        let doc = Document::from_json(&json!({
            "title": "Hitchhiker's Guide",
            "author": "Adams",
            "rating": 10,
        }))
        .unwrap();
        let id = coll.insert(doc).await.unwrap();
        assert!(!id.is_empty());

        let fetched = coll.get(id).unwrap().unwrap();
        assert_eq!(fetched.created_at(), fetched.modified_at());
        assert_eq!(fetched.get("title").unwrap().as_str(), Some("Hitchhiker's Guide"));
    }

    #[tokio::test]
    async fn duplicate_explicit_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let coll = collection(dir.path()).await;

        let id = Identifier::generate();
        let mut first = Document::from_json(&json!({"title": "first"})).unwrap();
        first.set(ID_FIELD, Value::Identifier(id)).unwrap();
        coll.insert(first).await.unwrap();

        let mut second = Document::from_json(&json!({"title": "second"})).unwrap();
        second.set(ID_FIELD, Value::Identifier(id)).unwrap();
        let err = coll.insert(second).await;
        assert!(matches!(err, Err(Error::DuplicateId(_))));

        let still_first = coll.get(id).unwrap().unwrap();
        assert_eq!(still_first.get("title").unwrap().as_str(), Some("first"));
    }

    #[tokio::test]
    async fn search_by_exact_field_and_sort() {
        let dir = tempfile::tempdir().unwrap();
        let coll = collection(dir.path()).await;

        for (title, rating) in [
            ("Hitchhiker's Guide", 10),
            ("Restaurant at the End", 9),
            ("Life, the Universe and Everything", 9),
            ("So Long, and Thanks", 9),
        ] {
            let doc = Document::from_json(&json!({"title": title, "rating": rating})).unwrap();
            coll.insert(doc).await.unwrap();
        }

        let criteria = SearchCriteria {
            query: "rating:9".to_string(),
            sort_by_field: Some("title".to_string()),
            ..Default::default()
        };
        let result = coll.search(criteria).await.unwrap();
        assert_eq!(result.total_hits, 3);
        let first = &result.documents[0];
        assert_eq!(first.get("title").unwrap().as_str(), Some("Life, the Universe and Everything"));
    }

    #[tokio::test]
    async fn null_field_is_queryable_via_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let coll = collection(dir.path()).await;

        let with_author = Document::from_json(&json!({"title": "a", "author": "Adams"})).unwrap();
        coll.insert(with_author).await.unwrap();
        let without_author = Document::from_json(&json!({"title": "b", "author": null})).unwrap();
        let id = coll.insert(without_author).await.unwrap();

        let criteria = SearchCriteria {
            query: "author:_null_".to_string(),
            ..Default::default()
        };
        let result = coll.search(criteria).await.unwrap();
        assert_eq!(result.total_hits, 1);
        assert_eq!(result.documents[0].id(), Some(id));
    }

    #[tokio::test]
    async fn update_preserves_created_and_refreshes_modified() {
        let dir = tempfile::tempdir().unwrap();
        let coll = collection(dir.path()).await;

        let doc = Document::from_json(&json!({"rating": 9})).unwrap();
        let id = coll.insert(doc).await.unwrap();
        let created = coll.get(id).unwrap().unwrap().created_at().unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(2)).await;

        let mut update_doc = Document::from_json(&json!({"rating": 10})).unwrap();
        update_doc.set(ID_FIELD, Value::Identifier(id)).unwrap();
        let affected = coll.update(update_doc).await.unwrap();
        assert_eq!(affected, 1);

        let updated = coll.get(id).unwrap().unwrap();
        assert_eq!(updated.created_at().unwrap(), created);
        assert!(updated.modified_at().unwrap().0 > created.0);
    }

    #[tokio::test]
    async fn delete_removes_from_store_and_index() {
        let dir = tempfile::tempdir().unwrap();
        let coll = collection(dir.path()).await;

        let doc = Document::from_json(&json!({"category": "fiction"})).unwrap();
        let id = coll.insert(doc).await.unwrap();

        let affected = coll.delete(id).await.unwrap();
        assert_eq!(affected, 1);
        assert!(coll.get(id).unwrap().is_none());

        let result = coll
            .search(SearchCriteria { query: "category:fiction".into(), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(result.total_hits, 0);
    }

    #[tokio::test]
    async fn count_matches_search_total_hits() {
        let dir = tempfile::tempdir().unwrap();
        let coll = collection(dir.path()).await;

        for n in 0..5 {
            coll.insert(Document::from_json(&json!({"category": "books", "n": n})).unwrap())
                .await
                .unwrap();
        }

        let result = coll
            .search(SearchCriteria { query: "category:books".into(), ..Default::default() })
            .await
            .unwrap();
        let count = coll.count(Some("category:books")).unwrap();
        assert_eq!(count, result.total_hits);
    }

    #[tokio::test]
    async fn dropped_collection_rejects_further_operations() {
        let dir = tempfile::tempdir().unwrap();
        let coll = collection(dir.path()).await;
        coll.insert(Document::from_json(&json!({"x": 1})).unwrap()).await.unwrap();

        coll.drop().await.unwrap();

        assert!(matches!(coll.get(Identifier::generate()), Err(Error::CollectionDropped(_))));
        assert!(matches!(
            coll.insert(Document::from_json(&json!({"x": 1})).unwrap()).await,
            Err(Error::CollectionDropped(_))
        ));
        assert!(matches!(coll.drop().await, Err(Error::CollectionDropped(_))));
    }

    #[tokio::test]
    async fn schema_grows_monotonically_and_rejects_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let coll = collection(dir.path()).await;

        coll.insert(Document::from_json(&json!({"rating": 9})).unwrap()).await.unwrap();
        assert_eq!(coll.schema().get("rating").unwrap().data_type, crate::schema::DataType::Integer);

        let err = coll.insert(Document::from_json(&json!({"rating": "nine"})).unwrap()).await;
        assert!(matches!(err, Err(Error::SchemaConflict { .. })));
    }
}
