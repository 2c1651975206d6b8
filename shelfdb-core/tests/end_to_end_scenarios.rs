//! End-to-end scenarios driven through the public `Database` surface,
//! exercising collection creation, insert, search, update, delete and drop
//! the way an embedding application would.

use std::time::Duration;

use serde_json::json;
use shelfdb_core::{Config, Database, Document, Error, SearchCriteria};

fn open(dir: &std::path::Path) -> Database {
    Database::open(Config::default().with_data_path(dir)).expect("database opens")
}

/// S1: basic insert/get. A freshly-inserted document round-trips with a
/// non-empty id, equal created/modified timestamps, and UTC-normalized dates.
#[tokio::test]
async fn s1_basic_insert_get() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    let books = db.lookup("books").unwrap();

    let doc = Document::from_json(&json!({
        "title": "Hitchhiker's Guide",
        "author": "Adams",
        "rating": 10,
        "publishDate": "1979-10-12T12:00:00Z",
    }))
    .unwrap();

    let id = books.insert(doc).await.unwrap();
    assert!(!id.is_empty());

    let fetched = books.get(id).unwrap().expect("document exists");
    let created = fetched.created_at().expect("created timestamp set");
    let modified = fetched.modified_at().expect("modified timestamp set");
    assert_eq!(created, modified);
    assert_eq!(fetched.get("title").unwrap().as_str(), Some("Hitchhiker's Guide"));

    db.close().await.unwrap();
}

/// S2: search by exact numeric field, sorted by another field.
#[tokio::test]
async fn s2_search_by_exact_numeric_and_sort() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    let books = db.lookup("books").unwrap();

    for (title, rating) in [
        ("Hitchhiker's Guide", 10),
        ("Restaurant at the End of the Universe", 9),
        ("Life, the Universe and Everything", 9),
        ("So Long, and Thanks for All the Fish", 9),
    ] {
        let doc = Document::from_json(&json!({"title": title, "rating": rating})).unwrap();
        books.insert(doc).await.unwrap();
    }

    let criteria = SearchCriteria {
        query: "rating:9".to_string(),
        sort_by_field: Some("title".to_string()),
        ..Default::default()
    };
    let result = books.search(criteria).await.unwrap();
    assert_eq!(result.total_hits, 3);
    assert_eq!(result.documents.len(), 3);
    assert_eq!(
        result.documents[0].get("title").unwrap().as_str(),
        Some("Life, the Universe and Everything")
    );

    db.close().await.unwrap();
}

/// S3: a null field is still queryable through the configured sentinel.
#[tokio::test]
async fn s3_null_search_token() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    let books = db.lookup("books").unwrap();

    books
        .insert(Document::from_json(&json!({"title": "with author", "author": "Adams"})).unwrap())
        .await
        .unwrap();
    let id = books
        .insert(Document::from_json(&json!({"title": "no author", "author": null})).unwrap())
        .await
        .unwrap();

    let criteria = SearchCriteria {
        query: "author:_null_".to_string(),
        sort_by_field: Some("title".to_string()),
        ..Default::default()
    };
    let result = books.search(criteria).await.unwrap();
    assert_eq!(result.total_hits, 1);
    assert_eq!(result.documents[0].id(), Some(id));

    db.close().await.unwrap();
}

/// S4: updating a document preserves `_createdTimestamp` and strictly
/// advances `_modifiedTimestamp`.
#[tokio::test]
async fn s4_update_preserves_created() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    let books = db.lookup("books").unwrap();

    let id = books
        .insert(Document::from_json(&json!({"title": "Draft", "rating": 5})).unwrap())
        .await
        .unwrap();
    let created = books.get(id).unwrap().unwrap().created_at().unwrap();

    tokio::time::sleep(Duration::from_millis(2)).await;

    let mut update_doc = Document::from_json(&json!({"title": "Draft", "rating": 8})).unwrap();
    update_doc.set("_id", shelfdb_core::Value::Identifier(id)).unwrap();
    let affected = books.update(update_doc).await.unwrap();
    assert_eq!(affected, 1);

    let updated = books.get(id).unwrap().unwrap();
    assert_eq!(updated.created_at().unwrap(), created);
    assert!(updated.modified_at().unwrap().0 > created.0);

    db.close().await.unwrap();
}

/// S5: two inserts sharing an explicit `_id` - the second fails with
/// duplicate-id and the first document is left untouched.
#[tokio::test]
async fn s5_duplicate_id_on_insert() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    let books = db.lookup("books").unwrap();

    let id = shelfdb_core::Identifier::generate();
    let mut first = Document::from_json(&json!({"title": "first"})).unwrap();
    first.set("_id", shelfdb_core::Value::Identifier(id)).unwrap();
    books.insert(first).await.unwrap();

    let mut second = Document::from_json(&json!({"title": "second"})).unwrap();
    second.set("_id", shelfdb_core::Value::Identifier(id)).unwrap();
    let err = books.insert(second).await.unwrap_err();
    assert!(matches!(err, Error::DuplicateId(_)));

    let still_first = books.get(id).unwrap().unwrap();
    assert_eq!(still_first.get("title").unwrap().as_str(), Some("first"));

    db.close().await.unwrap();
}

/// S6: dropping a collection fails every subsequent operation on the
/// retained handle with collection-dropped; a fresh lookup creates an empty
/// collection with the default schema.
#[tokio::test]
async fn s6_drop_then_use() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    let books = db.lookup("books").unwrap();

    let id = books
        .insert(Document::from_json(&json!({"title": "to be dropped"})).unwrap())
        .await
        .unwrap();

    db.drop("books").await.unwrap();

    assert!(matches!(books.get(id), Err(Error::CollectionDropped(_))));
    assert!(matches!(
        books.insert(Document::from_json(&json!({"title": "x"})).unwrap()).await,
        Err(Error::CollectionDropped(_))
    ));
    assert!(matches!(books.count(None), Err(Error::CollectionDropped(_))));
    assert!(matches!(
        books
            .update({
                let mut d = Document::from_json(&json!({"title": "y"})).unwrap();
                d.set("_id", shelfdb_core::Value::Identifier(id)).unwrap();
                d
            })
            .await,
        Err(Error::CollectionDropped(_))
    ));
    assert!(matches!(books.delete(id).await, Err(Error::CollectionDropped(_))));

    let fresh = db.lookup("books").unwrap();
    assert!(fresh.get(id).unwrap().is_none());
    assert_eq!(fresh.schema(), shelfdb_core::Schema::create_default());

    db.close().await.unwrap();
}
