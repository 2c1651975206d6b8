//! Command-line bootstrap for shelfdb: a thin `clap` driver over
//! `shelfdb_core::Database` that exercises insert/get/search/count/update/
//! delete/drop/schemas end to end, mirroring the external REST contracts of
//! the core without implementing HTTP. This binary owns no storage logic of
//! its own.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use shelfdb_core::{Database, Document, Identifier};
use shelfdb_core::{Config, SearchCriteria};

#[derive(Parser)]
#[command(name = "shelfdb")]
#[command(about = "shelfdb CLI - drives the embedded document collection engine")]
#[command(version)]
struct Cli {
    /// Directory the database lives in (created if absent).
    #[arg(long, global = true, default_value = "shelfdb-data")]
    data_path: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Insert a document (read as JSON from a file) into a collection.
    Insert { collection: String, json_file: PathBuf },
    /// Fetch a document by id, bypassing the index.
    Get { collection: String, id: String },
    /// Run a query against a collection's index.
    Search {
        collection: String,
        #[arg(long)]
        where_: Option<String>,
        #[arg(long)]
        order_by: Option<String>,
        #[arg(long)]
        top_n: Option<usize>,
        #[arg(long)]
        per_page: Option<usize>,
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long, default_value_t = false)]
        highlight: bool,
        #[arg(long, value_delimiter = ',')]
        select_categories: Vec<String>,
    },
    /// Count documents matching a query (or the whole collection if omitted).
    Count {
        collection: String,
        #[arg(long)]
        where_: Option<String>,
    },
    /// Replace a document's contents (read as JSON from a file) by id.
    Update { collection: String, id: String, json_file: PathBuf },
    /// Delete a document by id.
    Delete { collection: String, id: String },
    /// Permanently drop an entire collection.
    Drop { collection: String },
    /// Print every known collection's inferred schema.
    Schemas,
    /// Print one collection's inferred schema.
    Schema { collection: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    shelfdb_core::logging::init_default();
    let cli = Cli::parse();

    let config = Config::default()
        .with_data_path(cli.data_path.clone())
        .with_env_overrides();
    let db = Database::open(config)
        .with_context(|| format!("failed to open database at {}", cli.data_path.display()))?;

    match cli.command {
        Commands::Insert { collection, json_file } => insert(&db, &collection, &json_file).await?,
        Commands::Get { collection, id } => get(&db, &collection, &id)?,
        Commands::Search {
            collection,
            where_,
            order_by,
            top_n,
            per_page,
            page,
            highlight,
            select_categories,
        } => {
            search(
                &db,
                &collection,
                where_,
                order_by,
                top_n,
                per_page,
                page,
                highlight,
                select_categories,
            )
            .await?
        }
        Commands::Count { collection, where_ } => count(&db, &collection, where_.as_deref())?,
        Commands::Update { collection, id, json_file } => {
            update(&db, &collection, &id, &json_file).await?
        }
        Commands::Delete { collection, id } => delete(&db, &collection, &id).await?,
        Commands::Drop { collection } => db.drop(&collection).await.context("drop failed")?,
        Commands::Schemas => schemas(&db),
        Commands::Schema { collection } => schema(&db, &collection)?,
    }

    db.close().await.context("failed to close database cleanly")?;
    Ok(())
}

fn parse_id(id: &str) -> Result<Identifier> {
    Identifier::from_hex(id).with_context(|| format!("'{id}' is not a valid 32-hex-digit identifier"))
}

fn read_document(path: &std::path::Path) -> Result<Document> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read file: {}", path.display()))?;
    let json: serde_json::Value = serde_json::from_str(&text)
        .with_context(|| format!("invalid JSON in file: {}", path.display()))?;
    Document::from_json(&json).context("invalid document")
}

async fn insert(db: &Database, collection: &str, json_file: &std::path::Path) -> Result<()> {
    let doc = read_document(json_file)?;
    let id = db.lookup(collection)?.insert(doc).await.context("insert failed")?;
    println!("{}", id.to_hex());
    Ok(())
}

fn get(db: &Database, collection: &str, id: &str) -> Result<()> {
    let id = parse_id(id)?;
    match db.lookup(collection)?.get(id).context("get failed")? {
        Some(doc) => println!("{}", serde_json::to_string_pretty(&doc.to_json())?),
        None => println!("null"),
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn search(
    db: &Database,
    collection: &str,
    where_: Option<String>,
    order_by: Option<String>,
    top_n: Option<usize>,
    per_page: Option<usize>,
    page: usize,
    highlight: bool,
    select_categories: Vec<String>,
) -> Result<()> {
    let criteria = SearchCriteria {
        query: where_.unwrap_or_default(),
        sort_by_field: order_by,
        top_n,
        items_per_page: per_page,
        page_number: Some(page),
        include_highlight: highlight,
        select_categories,
        top_n_categories: None,
    };
    let result = db.lookup(collection)?.search(criteria).await.context("search failed")?;
    let documents: Vec<_> = result.documents.iter().map(Document::to_json).collect();
    let body = serde_json::json!({
        "topN": result.top_n,
        "itemsPerPage": result.items_per_page,
        "pageNumber": result.page_number,
        "pageCount": result.page_count,
        "itemCount": result.item_count,
        "totalHits": result.total_hits,
        "documents": documents,
    });
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

fn count(db: &Database, collection: &str, where_: Option<&str>) -> Result<()> {
    let count = db.lookup(collection)?.count(where_).context("count failed")?;
    println!("{count}");
    Ok(())
}

async fn update(db: &Database, collection: &str, id: &str, json_file: &std::path::Path) -> Result<()> {
    let id = parse_id(id)?;
    let mut doc = read_document(json_file)?;
    doc.set("_id", shelfdb_core::Value::Identifier(id))?;
    let affected = db.lookup(collection)?.update(doc).await.context("update failed")?;
    println!("{affected}");
    Ok(())
}

async fn delete(db: &Database, collection: &str, id: &str) -> Result<()> {
    let id = parse_id(id)?;
    let affected = db.lookup(collection)?.delete(id).await.context("delete failed")?;
    println!("{affected}");
    Ok(())
}

fn schema(db: &Database, collection: &str) -> Result<()> {
    let schema = db.lookup(collection)?.schema();
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

fn schemas(db: &Database) {
    let mut names = db.collection_names();
    names.sort();
    for name in names {
        if let Ok(collection) = db.lookup(&name) {
            println!("{name}:");
            if let Ok(text) = serde_json::to_string_pretty(&collection.schema()) {
                println!("{text}");
            }
        }
    }
}
