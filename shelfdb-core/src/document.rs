//! Dynamic documents: a recursive value tree plus the three reserved
//! standard fields (`_id`, `_createdTimestamp`, `_modifiedTimestamp`).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::compression::Codec;
use crate::error::{Error, Result};
use crate::identifier::Identifier;

pub const ID_FIELD: &str = "_id";
pub const CREATED_FIELD: &str = "_createdTimestamp";
pub const MODIFIED_FIELD: &str = "_modifiedTimestamp";

/// UTC timestamp with sub-second precision. A thin newtype over `chrono`'s
/// `DateTime<Utc>` so the rest of the crate has one timestamp type to reason
/// about, regardless of what kind the caller supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub DateTime<Utc>);

impl Timestamp {
    pub fn now() -> Self {
        Timestamp(Utc::now())
    }

    pub fn to_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    pub fn from_millis(millis: i64) -> Self {
        Timestamp(DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now))
    }
}

/// The recursive document value tree. Every value reachable from a `Document`
/// is one of these variants; arrays and objects recurse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    /// Arbitrary-precision decimal, carried as its canonical string form to
    /// avoid silent precision loss through `f64`.
    Decimal(String),
    String(String),
    Timestamp(Timestamp),
    Identifier(Identifier),
    Array(Vec<Value>),
    /// `BTreeMap` rather than `HashMap`, so iteration order, and therefore
    /// the canonical byte form, is deterministic without an extra sort pass.
    Object(BTreeMap<String, Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_identifier(&self) -> Option<Identifier> {
        match self {
            Value::Identifier(id) => Some(*id),
            Value::String(s) => Identifier::from_hex(s),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<Timestamp> {
        match self {
            Value::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    /// Deep-walk every timestamp reachable from this value and rewrite it to
    /// UTC in place. `chrono::DateTime<Utc>` is already UTC by construction,
    /// so in this representation the pass is a no-op traversal that exists to
    /// satisfy the idempotent-normalization contract and to give a single
    /// hook point for future non-UTC timestamp kinds.
    pub fn normalize_dates_to_utc(&mut self) {
        match self {
            Value::Timestamp(_) => {}
            Value::Array(items) => {
                for item in items {
                    item.normalize_dates_to_utc();
                }
            }
            Value::Object(map) => {
                for v in map.values_mut() {
                    v.normalize_dates_to_utc();
                }
            }
            _ => {}
        }
    }

    /// Convert from an arbitrary `serde_json::Value`, inferring the most
    /// specific variant (timestamps and identifiers are represented as
    /// strings in JSON and recognized heuristically; ambiguous strings stay
    /// `Value::String`).
    pub fn from_json(json: &Json) -> Value {
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Integer(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            Json::String(s) => {
                if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                    Value::Timestamp(Timestamp(dt.with_timezone(&Utc)))
                } else {
                    Value::String(s.clone())
                }
            }
            Json::Array(items) => Value::Array(items.iter().map(Value::from_json).collect()),
            Json::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn to_json(&self) -> Json {
        match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Integer(i) => Json::Number((*i).into()),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::Decimal(s) => Json::String(s.clone()),
            Value::String(s) => Json::String(s.clone()),
            Value::Timestamp(t) => Json::String(t.0.to_rfc3339()),
            Value::Identifier(id) => Json::String(id.to_hex()),
            Value::Array(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Object(map) => {
                Json::Object(map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
            }
        }
    }
}

/// A dynamic, schema-flexible document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    fields: BTreeMap<String, Value>,
}

impl Document {
    /// An empty document with no fields set, including no standard fields.
    /// Callers that want the reserved fields populated should go through
    /// `Document::new` or let `DocumentStore::insert` assign them.
    pub fn empty() -> Self {
        Document {
            fields: BTreeMap::new(),
        }
    }

    /// Construct from a field mapping, validating every reserved field that
    /// is present.
    pub fn new(fields: BTreeMap<String, Value>) -> Result<Self> {
        let doc = Document { fields };
        doc.validate_standard_fields()?;
        Ok(doc)
    }

    pub fn from_json(json: &Json) -> Result<Self> {
        let obj = json
            .as_object()
            .ok_or_else(|| Error::invalid_argument("document must be a JSON object"))?;
        let fields = obj
            .iter()
            .map(|(k, v)| (k.clone(), Value::from_json(v)))
            .collect();
        Document::new(fields)
    }

    pub fn to_json(&self) -> Json {
        Json::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }

    fn validate_standard_fields(&self) -> Result<()> {
        if let Some(id) = self.fields.get(ID_FIELD) {
            let valid = match id {
                Value::Identifier(i) => !i.is_empty(),
                Value::String(s) => !s.is_empty() && Identifier::from_hex(s).is_some(),
                _ => false,
            };
            if !valid {
                return Err(Error::invalid_argument(
                    "_id must be a non-empty identifier",
                ));
            }
        }
        for field in [CREATED_FIELD, MODIFIED_FIELD] {
            if let Some(v) = self.fields.get(field) {
                if v.as_timestamp().is_none() {
                    return Err(Error::invalid_argument(format!(
                        "{field} must be a UTC timestamp"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Type-checked field setter. Reserved fields are validated against their
    /// fixed type; every other field must be one of the allowed document
    /// value kinds (which, syntactically, is every `Value` variant; the
    /// check exists so this is the single choke point future variants must
    /// pass through).
    pub fn set(&mut self, field: impl Into<String>, value: Value) -> Result<()> {
        let field = field.into();
        match field.as_str() {
            ID_FIELD => {
                let valid = match &value {
                    Value::Identifier(i) => !i.is_empty(),
                    Value::String(s) => !s.is_empty() && Identifier::from_hex(s).is_some(),
                    _ => false,
                };
                if !valid {
                    return Err(Error::invalid_argument(
                        "_id must be a non-empty identifier",
                    ));
                }
            }
            CREATED_FIELD | MODIFIED_FIELD => {
                if value.as_timestamp().is_none() {
                    return Err(Error::invalid_argument(format!(
                        "{field} must be a UTC timestamp"
                    )));
                }
            }
            _ => {}
        }
        self.fields.insert(field, value);
        Ok(())
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    pub fn id(&self) -> Option<Identifier> {
        self.fields.get(ID_FIELD).and_then(Value::as_identifier)
    }

    pub fn created_at(&self) -> Option<Timestamp> {
        self.fields.get(CREATED_FIELD).and_then(Value::as_timestamp)
    }

    pub fn modified_at(&self) -> Option<Timestamp> {
        self.fields.get(MODIFIED_FIELD).and_then(Value::as_timestamp)
    }

    pub fn normalize_dates_to_utc(&mut self) {
        for v in self.fields.values_mut() {
            v.normalize_dates_to_utc();
        }
    }

    /// Project a subset of top-level keys. `_id` is always retained since a
    /// selection result without its key is rarely useful to a caller.
    pub fn select_fields(&self, keys: &[String]) -> Document {
        let mut fields = BTreeMap::new();
        if let Some(id) = self.fields.get(ID_FIELD) {
            fields.insert(ID_FIELD.to_string(), id.clone());
        }
        for key in keys {
            if let Some(v) = self.fields.get(key) {
                fields.insert(key.clone(), v.clone());
            }
        }
        Document { fields }
    }

    /// Deterministic byte encoding: `bincode` over the `BTreeMap` (whose
    /// iteration order is already the sorted key order), optionally
    /// compressed, with a 1-byte codec tag prefixed.
    pub fn to_canonical_bytes(&self, codec: Codec) -> Result<Vec<u8>> {
        let raw = bincode::serialize(&self.fields).map_err(|e| {
            Error::Config(format!("failed to encode document: {e}"))
        })?;
        let (tag, payload) = codec.encode(&raw)?;
        let mut out = Vec::with_capacity(payload.len() + 1);
        out.push(tag);
        out.extend_from_slice(&payload);
        Ok(out)
    }

    pub fn from_canonical_bytes(bytes: &[u8]) -> Result<Self> {
        let (tag, payload) = bytes
            .split_first()
            .ok_or_else(|| Error::invalid_argument("empty document byte form"))?;
        let raw = Codec::decode(*tag, payload)?;
        let fields: BTreeMap<String, Value> = bincode::deserialize(&raw)
            .map_err(|e| Error::Config(format!("failed to decode document: {e}")))?;
        Ok(Document { fields })
    }

    /// Content hash over the canonical (uncompressed) byte form, for cheap
    /// equality checks that don't need the full document.
    pub fn content_hash(&self) -> Result<u64> {
        use std::hash::{Hash, Hasher};
        let raw = bincode::serialize(&self.fields)
            .map_err(|e| Error::Config(format!("failed to encode document: {e}")))?;
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        raw.hash(&mut hasher);
        Ok(hasher.finish())
    }
}

impl PartialEq<Json> for Document {
    fn eq(&self, other: &Json) -> bool {
        self.to_json() == *other
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn validates_id_on_construction() {
        let mut fields = BTreeMap::new();
        fields.insert(ID_FIELD.to_string(), Value::String(String::new()));
        assert!(Document::new(fields).is_err());
    }

    #[test]
    fn rejects_non_timestamp_created_field() {
        let mut fields = BTreeMap::new();
        fields.insert(CREATED_FIELD.to_string(), Value::Integer(5));
        assert!(Document::new(fields).is_err());
    }

    #[test]
    fn set_rejects_bad_id() {
        let mut doc = Document::empty();
        assert!(doc.set(ID_FIELD, Value::Integer(1)).is_err());
    }

    #[test]
    fn canonical_bytes_roundtrip() {
        let json = json!({"title": "Hitchhiker's Guide", "rating": 10, "tags": ["scifi", "comedy"]});
        let doc = Document::from_json(&json).unwrap();
        let bytes = doc.to_canonical_bytes(Codec::None).unwrap();
        let restored = Document::from_canonical_bytes(&bytes).unwrap();
        assert_eq!(doc, restored);
    }

    #[test]
    fn canonical_bytes_are_deterministic() {
        let a = Document::from_json(&json!({"b": 1, "a": 2})).unwrap();
        let b = Document::from_json(&json!({"a": 2, "b": 1})).unwrap();
        assert_eq!(
            a.to_canonical_bytes(Codec::None).unwrap(),
            b.to_canonical_bytes(Codec::None).unwrap()
        );
    }

    #[test]
    fn normalize_is_idempotent() {
        let mut doc =
            Document::from_json(&json!({"when": "2024-01-01T00:00:00Z", "nested": {"t": "2024-06-01T12:00:00Z"}}))
                .unwrap();
        doc.normalize_dates_to_utc();
        let once = doc.clone();
        doc.normalize_dates_to_utc();
        assert_eq!(once, doc);
    }

    #[test]
    fn select_fields_always_keeps_id() {
        let id = Identifier::generate();
        let mut doc = Document::empty();
        doc.set(ID_FIELD, Value::Identifier(id)).unwrap();
        doc.set("title", Value::String("x".into())).unwrap();
        doc.set("author", Value::String("y".into())).unwrap();

        let projected = doc.select_fields(&["title".to_string()]);
        assert!(projected.get(ID_FIELD).is_some());
        assert!(projected.get("title").is_some());
        assert!(projected.get("author").is_none());
    }
}
