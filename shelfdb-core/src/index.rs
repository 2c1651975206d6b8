//! Full-text / structured index and facet sidecar, realized on `tantivy`.
//!
//! The collection's field catalog ([`crate::schema::Schema`]) is dynamic: new
//! field names appear as documents are inserted. tantivy's own schema is
//! fixed at index-creation time, so rather than minting one tantivy `Field`
//! per distinct dotted path (which would force a rebuild every time a new
//! path is first observed), every document is indexed into three JSON
//! container fields keyed by the catalog's inferred type -
//! `text` (tokenized prose), `keyword` (exact-match strings, identifiers,
//! booleans, the null-sentinel token) and `numeric` (integers, floats,
//! decimals, timestamps as epoch millis) - plus a dedicated `_id` field, a
//! `_fulltext` field carrying every text leaf concatenated for bare-term
//! queries and highlighting, and a `category` facet field for the rollup
//! sidecar. Querying `field:value` is rewritten to `bucket.field:value`
//! against the right container before tantivy ever parses it; see
//! `translate_query` below.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tantivy::collector::{Count, FacetCollector, TopDocs};
use tantivy::query::{AllQuery, BooleanQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::document::OwnedValue;
use tantivy::schema::{
    Facet, FacetOptions, IndexRecordOption, JsonObjectOptions, Schema as TantivySchema,
    TextFieldIndexing, TextOptions, STORED, STRING,
};
use tantivy::{
    DocAddress, Index as TantivyIndex, IndexReader, IndexWriter, ReloadPolicy, Score, Searcher,
    SnippetGenerator, TantivyDocument, Term,
};

use crate::document::{Document, Value, ID_FIELD};
use crate::error::{Error, Result};
use crate::identifier::Identifier;
use crate::schema::{DataType, Field, Schema};

/// Tunables threaded down from [`crate::config::Config`] by the owning
/// `DocumentCollection`; `Index` itself holds no reference to `Config`.
#[derive(Debug, Clone)]
pub struct IndexSettings {
    pub null_sentinel_token: String,
    pub auto_facet_enabled: bool,
    pub auto_doc_values_enabled: bool,
    pub default_top_n: usize,
    pub default_items_per_page: usize,
    pub default_top_n_categories: usize,
}

impl Default for IndexSettings {
    fn default() -> Self {
        IndexSettings {
            null_sentinel_token: "_null_".to_string(),
            auto_facet_enabled: true,
            auto_doc_values_enabled: true,
            default_top_n: 1_000,
            default_items_per_page: 20,
            default_top_n_categories: 10,
        }
    }
}

/// A search request. `None` fields fall back to the matching
/// `IndexSettings::default_*`; `top_n: Some(0)` is the sentinel for
/// "uncapped" (count every match, don't bound collection).
#[derive(Debug, Clone, Default)]
pub struct SearchCriteria {
    pub query: String,
    pub sort_by_field: Option<String>,
    pub top_n: Option<usize>,
    pub items_per_page: Option<usize>,
    pub page_number: Option<usize>,
    pub include_highlight: bool,
    pub select_categories: Vec<String>,
    pub top_n_categories: Option<usize>,
}

/// One facet rollup node: a root field path (or, one level down, a value
/// under that path) and how many hits carry it. This realization goes two
/// levels deep - root path, then its observed values - and never nests
/// `values` further.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryRollup {
    pub name: String,
    pub count: u64,
    pub values: Option<Vec<CategoryRollup>>,
}

/// What `Index::search` hands back to the owning collection: ranked ids plus
/// the pagination/rollup bookkeeping. The collection resolves `items` into
/// actual documents via the document store.
#[derive(Debug, Clone)]
pub struct IndexSearchOutcome {
    pub top_n: usize,
    pub items_per_page: usize,
    pub page_number: usize,
    pub page_count: usize,
    pub item_count: usize,
    pub total_hits: usize,
    pub include_highlight: bool,
    pub select_categories: Vec<String>,
    pub top_n_categories: usize,
    pub items: Vec<Identifier>,
    pub categories: Vec<CategoryRollup>,
}

struct IndexFields {
    id: tantivy::schema::Field,
    fulltext: tantivy::schema::Field,
    text: tantivy::schema::Field,
    keyword: tantivy::schema::Field,
    numeric: tantivy::schema::Field,
    category: tantivy::schema::Field,
}

impl IndexFields {
    fn resolve(schema: &TantivySchema) -> Result<Self> {
        Ok(IndexFields {
            id: schema.get_field("_id")?,
            fulltext: schema.get_field("_fulltext")?,
            text: schema.get_field("text")?,
            keyword: schema.get_field("keyword")?,
            numeric: schema.get_field("numeric")?,
            category: schema.get_field("category")?,
        })
    }
}

fn build_tantivy_schema(settings: &IndexSettings) -> TantivySchema {
    let mut builder = TantivySchema::builder();
    builder.add_text_field("_id", STRING | STORED);
    builder.add_text_field("_fulltext", TextOptions::default().set_stored().set_indexing_options(
        TextFieldIndexing::default()
            .set_tokenizer("default")
            .set_index_option(IndexRecordOption::WithFreqsAndPositions),
    ));

    let keyword_opts = JsonObjectOptions::default()
        .set_stored()
        .set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer("raw")
                .set_index_option(IndexRecordOption::Basic),
        );
    builder.add_json_field("keyword", keyword_opts);

    let text_opts = JsonObjectOptions::default().set_stored().set_indexing_options(
        TextFieldIndexing::default()
            .set_tokenizer("default")
            .set_index_option(IndexRecordOption::WithFreqsAndPositions),
    );
    builder.add_json_field("text", text_opts);

    let mut numeric_opts = JsonObjectOptions::default().set_stored();
    if settings.auto_doc_values_enabled {
        numeric_opts = numeric_opts.set_fast(None);
    }
    builder.add_json_field("numeric", numeric_opts);

    builder.add_facet_field("category", FacetOptions::default());

    builder.build()
}

/// The tantivy-backed index for one collection. Owns its own on-disk
/// directory, independent of the document store's LMDB sub-database.
pub struct Index {
    directory: PathBuf,
    index: TantivyIndex,
    writer: Mutex<IndexWriter>,
    reader: IndexReader,
    fields: IndexFields,
    settings: IndexSettings,
}

impl Index {
    pub fn open(directory: PathBuf, settings: IndexSettings) -> Result<Self> {
        std::fs::create_dir_all(&directory)?;
        // The design reserves a `facets/` sub-directory for the facet
        // field's own columnar storage. tantivy doesn't let one logical
        // index split its segment files across two directories, so the
        // facet data physically lives alongside everything else under
        // `directory`; this nominal sub-directory exists purely to satisfy
        // the on-disk layout contract external tooling may expect. See
        // DESIGN.md.
        std::fs::create_dir_all(directory.join("facets"))?;

        let index = if directory.join("meta.json").exists() {
            TantivyIndex::open_in_dir(&directory)?
        } else {
            TantivyIndex::create_in_dir(&directory, build_tantivy_schema(&settings))?
        };

        let fields = IndexFields::resolve(&index.schema())?;
        let writer = index.writer(50_000_000)?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;

        Ok(Index {
            directory,
            index,
            writer: Mutex::new(writer),
            reader,
            fields,
            settings,
        })
    }

    pub fn insert(&self, doc: &Document, schema: &Schema) -> Result<()> {
        let tdoc = self.build_tantivy_doc(doc, schema)?;
        let mut writer = self.writer.lock();
        writer.add_document(tdoc)?;
        writer.commit()?;
        drop(writer);
        self.reader.reload()?;
        Ok(())
    }

    /// Realized as delete-by-id then re-insert: tantivy has no in-place
    /// document mutation.
    pub fn update(&self, doc: &Document, schema: &Schema) -> Result<()> {
        let id = doc
            .id()
            .ok_or_else(|| Error::invalid_argument("indexed document requires a non-empty _id"))?;
        let tdoc = self.build_tantivy_doc(doc, schema)?;
        let mut writer = self.writer.lock();
        writer.delete_term(Term::from_field_text(self.fields.id, &id.to_hex()));
        writer.add_document(tdoc)?;
        writer.commit()?;
        drop(writer);
        self.reader.reload()?;
        Ok(())
    }

    pub fn delete(&self, id: Identifier) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.delete_term(Term::from_field_text(self.fields.id, &id.to_hex()));
        writer.commit()?;
        drop(writer);
        self.reader.reload()?;
        Ok(())
    }

    pub fn truncate(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.delete_all_documents()?;
        writer.commit()?;
        drop(writer);
        self.reader.reload()?;
        Ok(())
    }

    pub fn count(&self, query: Option<&str>, schema: &Schema) -> Result<usize> {
        let searcher = self.reader.searcher();
        match query {
            None => Ok(searcher.num_docs() as usize),
            Some(q) if q.trim().is_empty() => Ok(searcher.num_docs() as usize),
            Some(q) => {
                let parsed = self.parse_query(q, schema)?;
                Ok(searcher.search(&*parsed, &Count)?)
            }
        }
    }

    pub fn search(&self, criteria: &SearchCriteria, schema: &Schema) -> Result<IndexSearchOutcome> {
        let searcher = self.reader.searcher();
        let query = self.parse_query(&criteria.query, schema)?;

        let true_total = searcher.search(&*query, &Count)?;

        let effective_top_n = criteria.top_n.unwrap_or(self.settings.default_top_n);
        let collect_limit = if effective_top_n == 0 {
            true_total.max(1)
        } else {
            effective_top_n
        };
        let total_hits = if effective_top_n == 0 {
            true_total
        } else {
            true_total.min(effective_top_n)
        };

        let items_per_page = criteria
            .items_per_page
            .unwrap_or(self.settings.default_items_per_page)
            .max(1);
        let page_number = criteria.page_number.unwrap_or(1).max(1);
        let top_n_categories = criteria
            .top_n_categories
            .unwrap_or(self.settings.default_top_n_categories);

        let top_docs = searcher.search(&*query, &TopDocs::with_limit(collect_limit))?;
        let mut ranked = self.rank(&searcher, top_docs, criteria.sort_by_field.as_deref())?;
        ranked.truncate(total_hits);

        let page_count = if total_hits == 0 {
            0
        } else {
            (total_hits + items_per_page - 1) / items_per_page
        };
        let start = (page_number - 1) * items_per_page;
        let items: Vec<Identifier> = ranked.into_iter().skip(start).take(items_per_page).collect();
        let item_count = items.len();

        let categories = if self.settings.auto_facet_enabled {
            self.rollup_categories(&searcher, &*query, &criteria.select_categories, top_n_categories)?
        } else {
            Vec::new()
        };

        Ok(IndexSearchOutcome {
            top_n: effective_top_n,
            items_per_page,
            page_number,
            page_count,
            item_count,
            total_hits,
            include_highlight: criteria.include_highlight,
            select_categories: criteria.select_categories.clone(),
            top_n_categories,
            items,
            categories,
        })
    }

    pub fn highlights(
        &self,
        query: &str,
        schema: &Schema,
        ids: &[Identifier],
    ) -> Result<HashMap<Identifier, String>> {
        let searcher = self.reader.searcher();
        let parsed = self.parse_query(query, schema)?;
        let mut generator = SnippetGenerator::create(&searcher, &*parsed, self.fields.fulltext)?;
        generator.set_max_num_chars(200);

        let mut out = HashMap::with_capacity(ids.len());
        for &id in ids {
            let id_term = Term::from_field_text(self.fields.id, &id.to_hex());
            let id_query: Box<dyn Query> = Box::new(TermQuery::new(id_term, IndexRecordOption::Basic));
            let combined = BooleanQuery::new(vec![(Occur::Must, id_query), (Occur::Must, parsed.box_clone())]);
            let hits = searcher.search(&combined, &TopDocs::with_limit(1))?;
            if let Some((_, addr)) = hits.into_iter().next() {
                let tdoc: TantivyDocument = searcher.doc(addr)?;
                let snippet = generator.snippet_from_doc(&tdoc);
                let html = snippet.to_html();
                if !html.is_empty() {
                    out.insert(id, html);
                }
            }
        }
        Ok(out)
    }

    /// Releases the handles without touching anything on disk.
    pub fn close(self) -> Result<()> {
        Ok(())
    }

    /// Releases the handles and removes both the index directory and its
    /// reserved `facets/` sub-directory, retrying a few times in case a
    /// lingering memory map delays the unlink on some platforms.
    pub fn drop(self) -> Result<()> {
        let directory = self.directory.clone();
        std::mem::drop(self);
        remove_dir_with_retry(&directory.join("facets"))?;
        remove_dir_with_retry(&directory)?;
        Ok(())
    }

    fn rank(
        &self,
        searcher: &Searcher,
        top_docs: Vec<(Score, DocAddress)>,
        sort_field: Option<&str>,
    ) -> Result<Vec<Identifier>> {
        struct Row {
            id: Identifier,
            score: Score,
            sort_key: Option<SortKey>,
        }

        let (sort_name, descending) = sort_field.map(parse_sort_spec).unzip();
        let mut rows = Vec::with_capacity(top_docs.len());
        for (score, addr) in top_docs {
            let tdoc: TantivyDocument = searcher.doc(addr)?;
            let id = self.extract_id(&tdoc)?;
            let sort_key = sort_name.map(|name| self.extract_sort_key(&tdoc, name));
            rows.push(Row { id, score, sort_key: sort_key.flatten() });
        }

        if let Some(descending) = descending {
            rows.sort_by(|a, b| {
                let ord = compare_sort_keys(a.sort_key.as_ref(), b.sort_key.as_ref());
                let ord = if descending { ord.reverse() } else { ord };
                ord.then_with(|| a.id.cmp(&b.id))
            });
        } else {
            rows.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.id.cmp(&b.id))
            });
        }

        Ok(rows.into_iter().map(|r| r.id).collect())
    }

    fn extract_id(&self, tdoc: &TantivyDocument) -> Result<Identifier> {
        let hex = tdoc
            .get_first(self.fields.id)
            .and_then(OwnedValue::as_str)
            .ok_or_else(|| Error::invalid_argument("indexed document missing _id"))?;
        Identifier::from_hex(hex).ok_or_else(|| Error::invalid_argument("indexed document has a malformed _id"))
    }

    fn extract_sort_key(&self, tdoc: &TantivyDocument, field_name: &str) -> Option<SortKey> {
        if field_name == ID_FIELD {
            let hex = tdoc.get_first(self.fields.id).and_then(OwnedValue::as_str)?;
            return Some(SortKey::Text(hex.to_string()));
        }
        let segments: Vec<&str> = field_name.split('.').collect();

        if let Some(v) = tdoc.get_first(self.fields.numeric).and_then(|v| json_path_value(v, &segments)) {
            match v {
                OwnedValue::I64(n) => return Some(SortKey::Number(*n as f64)),
                OwnedValue::U64(n) => return Some(SortKey::Number(*n as f64)),
                OwnedValue::F64(f) => return Some(SortKey::Number(*f)),
                _ => {}
            }
        }
        if let Some(OwnedValue::Str(s)) = tdoc.get_first(self.fields.text).and_then(|v| json_path_value(v, &segments)) {
            return Some(SortKey::Text(s.clone()));
        }
        if let Some(OwnedValue::Str(s)) = tdoc.get_first(self.fields.keyword).and_then(|v| json_path_value(v, &segments)) {
            return Some(SortKey::Text(s.clone()));
        }
        None
    }

    fn rollup_categories(
        &self,
        searcher: &Searcher,
        query: &dyn Query,
        roots: &[String],
        top_k: usize,
    ) -> Result<Vec<CategoryRollup>> {
        if roots.is_empty() {
            return Ok(Vec::new());
        }

        let mut collector = FacetCollector::for_field(self.fields.category);
        for root in roots {
            collector.add_facet(facet_prefix(root));
        }
        let counts = searcher.search(query, &collector)?;

        let mut out = Vec::with_capacity(roots.len());
        for root in roots {
            let prefix = facet_prefix(root);
            let mut children = Vec::new();
            for (facet, count) in counts.top_k(&prefix, top_k) {
                let name = facet.to_path().last().map(|s| s.to_string()).unwrap_or_default();
                children.push(CategoryRollup { name, count, values: None });
            }
            let total: u64 = children.iter().map(|c| c.count).sum();
            out.push(CategoryRollup { name: root.clone(), count: total, values: Some(children) });
        }
        Ok(out)
    }

    fn parse_query(&self, raw: &str, schema: &Schema) -> Result<Box<dyn Query>> {
        if raw.trim().is_empty() {
            return Ok(Box::new(AllQuery));
        }
        let translated = translate_query(raw, schema, &self.settings.null_sentinel_token);
        let parser = QueryParser::for_index(&self.index, vec![self.fields.fulltext]);
        Ok(parser.parse_query(&translated)?)
    }

    fn build_tantivy_doc(&self, doc: &Document, schema: &Schema) -> Result<TantivyDocument> {
        let id = doc
            .id()
            .ok_or_else(|| Error::invalid_argument("indexed document requires a non-empty _id"))?;

        let mut trees = IndexTrees::default();
        let mut fulltext = Vec::new();
        for (name, value) in doc.fields() {
            if name == ID_FIELD {
                continue;
            }
            let field = schema.get(name);
            classify(field, name, value, &mut trees, &self.settings.null_sentinel_token, &mut fulltext);
        }

        let mut tdoc = TantivyDocument::default();
        tdoc.add_text(self.fields.id, id.to_hex());
        tdoc.add_text(self.fields.fulltext, fulltext.join(" "));
        if !trees.text.is_empty() {
            tdoc.add_field_value(self.fields.text, serde_json::Value::Object(trees.text));
        }
        if !trees.keyword.is_empty() {
            tdoc.add_field_value(self.fields.keyword, serde_json::Value::Object(trees.keyword));
        }
        if !trees.numeric.is_empty() {
            tdoc.add_field_value(self.fields.numeric, serde_json::Value::Object(trees.numeric));
        }
        for facet in trees.facets {
            tdoc.add_facet(self.fields.category, facet);
        }
        Ok(tdoc)
    }
}

#[derive(Debug, Clone)]
enum SortKey {
    Text(String),
    Number(f64),
}

fn compare_sort_keys(a: Option<&SortKey>, b: Option<&SortKey>) -> std::cmp::Ordering {
    match (a, b) {
        (Some(SortKey::Number(x)), Some(SortKey::Number(y))) => {
            x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal)
        }
        (Some(SortKey::Text(x)), Some(SortKey::Text(y))) => x.cmp(y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        _ => std::cmp::Ordering::Equal,
    }
}

fn parse_sort_spec(spec: &str) -> (&str, bool) {
    if let Some(name) = spec.strip_suffix(":desc") {
        (name, true)
    } else if let Some(name) = spec.strip_suffix(":asc") {
        (name, false)
    } else {
        (spec, false)
    }
}

fn json_path_value<'a>(value: &'a OwnedValue, path: &[&str]) -> Option<&'a OwnedValue> {
    match path.split_first() {
        None => Some(value),
        Some((head, rest)) => match value {
            OwnedValue::Object(entries) => entries
                .iter()
                .find(|(k, _)| k == head)
                .and_then(|(_, v)| json_path_value(v, rest)),
            _ => None,
        },
    }
}

#[derive(Default)]
struct IndexTrees {
    text: serde_json::Map<String, serde_json::Value>,
    keyword: serde_json::Map<String, serde_json::Value>,
    numeric: serde_json::Map<String, serde_json::Value>,
    facets: Vec<Facet>,
}

fn insert_path(root: &mut serde_json::Map<String, serde_json::Value>, path: &str, value: serde_json::Value) {
    let mut segments: Vec<&str> = path.split('.').collect();
    let last = segments.pop().expect("path always has at least one segment");

    let mut cursor = root;
    for seg in segments {
        let entry = cursor
            .entry(seg.to_string())
            .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
        if !entry.is_object() {
            *entry = serde_json::Value::Object(serde_json::Map::new());
        }
        cursor = entry.as_object_mut().expect("just normalized to an object");
    }

    match cursor.get_mut(last) {
        None => {
            cursor.insert(last.to_string(), value);
        }
        Some(existing) => {
            if let serde_json::Value::Array(arr) = existing {
                arr.push(value);
            } else {
                let prev = existing.take();
                *existing = serde_json::Value::Array(vec![prev, value]);
            }
        }
    }
}

fn facet_for(dotted_path: &str, value: &str) -> Facet {
    let mut segments: Vec<&str> = dotted_path.split('.').collect();
    segments.push(value);
    Facet::from_path(segments)
}

fn facet_prefix(root: &str) -> String {
    format!("/{}", root.replace('.', "/"))
}

/// Walks a document's values alongside the collection's field catalog,
/// bucketing each leaf into the text/keyword/numeric JSON trees and
/// collecting its facet entry. Arrays fan out into repeated calls at the
/// same dotted path (tantivy's JSON fields accept multi-valued leaves
/// natively); nested objects recurse into the catalog's nested sub-schema.
fn classify(
    field: Option<&Field>,
    dotted_path: &str,
    value: &Value,
    trees: &mut IndexTrees,
    null_token: &str,
    fulltext: &mut Vec<String>,
) {
    match value {
        Value::Null => {
            insert_path(&mut trees.keyword, dotted_path, serde_json::Value::String(null_token.to_string()));
            trees.facets.push(facet_for(dotted_path, null_token));
        }
        Value::Bool(b) => {
            let s = if *b { "true" } else { "false" };
            insert_path(&mut trees.keyword, dotted_path, serde_json::Value::String(s.to_string()));
            trees.facets.push(facet_for(dotted_path, s));
        }
        Value::Integer(i) => {
            insert_path(&mut trees.numeric, dotted_path, serde_json::json!(*i));
            trees.facets.push(facet_for(dotted_path, &i.to_string()));
        }
        Value::Float(f) => {
            insert_path(&mut trees.numeric, dotted_path, serde_json::json!(*f));
            trees.facets.push(facet_for(dotted_path, &f.to_string()));
        }
        Value::Decimal(s) => {
            if let Ok(f) = s.parse::<f64>() {
                insert_path(&mut trees.numeric, dotted_path, serde_json::json!(f));
            }
            trees.facets.push(facet_for(dotted_path, s));
        }
        Value::Timestamp(t) => {
            let millis = t.to_millis();
            insert_path(&mut trees.numeric, dotted_path, serde_json::json!(millis));
            trees.facets.push(facet_for(dotted_path, &millis.to_string()));
        }
        Value::Identifier(id) => {
            let hex = id.to_hex();
            insert_path(&mut trees.keyword, dotted_path, serde_json::Value::String(hex.clone()));
            trees.facets.push(facet_for(dotted_path, &hex));
        }
        Value::String(s) => {
            let exact = matches!(field.map(|f| f.data_type), Some(DataType::StringExact));
            if exact {
                insert_path(&mut trees.keyword, dotted_path, serde_json::Value::String(s.clone()));
            } else {
                insert_path(&mut trees.text, dotted_path, serde_json::Value::String(s.clone()));
                fulltext.push(s.clone());
            }
            trees.facets.push(facet_for(dotted_path, s));
        }
        Value::Array(items) => {
            let element_field = field.map(|f| Field {
                name: f.name.clone(),
                data_type: f.array_element_type.unwrap_or(DataType::NullToken),
                array_element_type: None,
                nested_schema: f.nested_schema.clone(),
            });
            for item in items {
                classify(element_field.as_ref(), dotted_path, item, trees, null_token, fulltext);
            }
        }
        Value::Object(map) => {
            let nested = field.and_then(|f| f.nested_schema.as_deref());
            for (k, v) in map {
                let child_field = nested.and_then(|s| s.get(k));
                let child_path = format!("{dotted_path}.{k}");
                classify(child_field, &child_path, v, trees, null_token, fulltext);
            }
        }
    }
}

/// Rewrites bare `field:value` clauses to `bucket.field:value` against the
/// right JSON container, based on the field's catalog type. A value that is
/// literally the configured null-sentinel token always routes to `keyword`,
/// regardless of the field's own declared type, since null leaves always
/// land there. Quoted phrases, boolean operators and bracketed range
/// clauses are left untouched.
fn translate_query(raw: &str, schema: &Schema, null_token: &str) -> String {
    tokenize(raw)
        .into_iter()
        .map(|token| match split_clause(&token) {
            Some((field_path, rest)) => {
                let bucket = if rest.trim_matches('"') == null_token {
                    "keyword"
                } else {
                    bucket_for(schema, field_path)
                };
                format!("{bucket}.{field_path}:{rest}")
            }
            None => token,
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn tokenize(raw: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in raw.chars() {
        match c {
            '"' => {
                current.push(c);
                in_quotes = !in_quotes;
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn split_clause(token: &str) -> Option<(&str, &str)> {
    let (prefix, rest) = token.split_once(':')?;
    if prefix.is_empty() || rest.is_empty() {
        return None;
    }
    if !prefix.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.') {
        return None;
    }
    if matches!(prefix, "AND" | "OR" | "NOT") {
        return None;
    }
    Some((prefix, rest))
}

fn bucket_for(schema: &Schema, field_path: &str) -> &'static str {
    let mut segments = field_path.split('.');
    let Some(first) = segments.next() else {
        return "text";
    };
    let Some(mut field) = schema.get(first) else {
        return "text";
    };
    for seg in segments {
        let Some(nested) = field.nested_schema.as_deref() else {
            return "text";
        };
        let Some(next) = nested.get(seg) else {
            return "text";
        };
        field = next;
    }

    let effective = if field.data_type == DataType::Array {
        field.array_element_type.unwrap_or(DataType::NullToken)
    } else {
        field.data_type
    };

    match effective {
        DataType::StringText => "text",
        DataType::StringExact | DataType::UniqueIdentifier | DataType::Boolean | DataType::NullToken => "keyword",
        DataType::Integer | DataType::Floating | DataType::Decimal | DataType::Timestamp => "numeric",
        DataType::Array | DataType::Object => "text",
    }
}

fn remove_dir_with_retry(dir: &Path) -> Result<()> {
    let mut attempts = 0;
    loop {
        match std::fs::remove_dir_all(dir) {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                attempts += 1;
                if attempts >= 3 {
                    return Err(Error::Io(e));
                }
                std::thread::sleep(std::time::Duration::from_millis(500));
            }
        }
    }
}
