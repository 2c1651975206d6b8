//! The evolving per-collection field catalog. Types are inferred from
//! inserted documents and fixed at first observation; conflicting later
//! observations are rejected rather than silently coerced or overwritten.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::document::{Document, Value, CREATED_FIELD, ID_FIELD, MODIFIED_FIELD};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DataType {
    StringExact,
    StringText,
    Integer,
    Floating,
    Decimal,
    Boolean,
    Timestamp,
    UniqueIdentifier,
    Array,
    Object,
    NullToken,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub data_type: DataType,
    /// Populated only when `data_type == Array`.
    pub array_element_type: Option<DataType>,
    /// Populated only when `data_type == Object` (or an array of objects).
    pub nested_schema: Option<Box<Schema>>,
}

impl Field {
    fn scalar(name: impl Into<String>, data_type: DataType) -> Self {
        Field {
            name: name.into(),
            data_type,
            array_element_type: None,
            nested_schema: None,
        }
    }
}

/// A collection's field catalog: name -> `Field`. The three standard fields
/// are always present and immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    fields: BTreeMap<String, Field>,
}

const STANDARD_FIELDS: [(&str, DataType); 3] = [
    (ID_FIELD, DataType::UniqueIdentifier),
    (CREATED_FIELD, DataType::Timestamp),
    (MODIFIED_FIELD, DataType::Timestamp),
];

impl Schema {
    /// A schema containing only the three standard fields.
    pub fn create_default() -> Self {
        let mut fields = BTreeMap::new();
        for (name, data_type) in STANDARD_FIELDS {
            fields.insert(name.to_string(), Field::scalar(name, data_type));
        }
        Schema { fields }
    }

    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.values()
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    fn is_standard(name: &str) -> bool {
        STANDARD_FIELDS.iter().any(|(n, _)| *n == name)
    }

    /// Infer the data type of a leaf/array/object value the way `merge`
    /// would, without mutating anything. Returns `None` for `Value::Null`
    /// (the caller decides whether that means "skip" or "null-token").
    fn infer_type(value: &Value) -> Option<DataType> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(DataType::Boolean),
            Value::Integer(_) => Some(DataType::Integer),
            Value::Float(_) => Some(DataType::Floating),
            Value::Decimal(_) => Some(DataType::Decimal),
            // Strings default to full-text; callers that want keyword
            // semantics express that by storing a `Value::Identifier` or by
            // going through explicit schema authoring (see Open Questions in
            // DESIGN.md for the string-exact heuristic used here).
            Value::String(_) => Some(DataType::StringText),
            Value::Timestamp(_) => Some(DataType::Timestamp),
            Value::Identifier(_) => Some(DataType::UniqueIdentifier),
            Value::Array(_) => Some(DataType::Array),
            Value::Object(_) => Some(DataType::Object),
        }
    }

    /// Merge the fields observed on `doc` into this schema, adding any
    /// missing fields with their inferred types and rejecting on type
    /// conflict. Standard fields are skipped (they're fixed at
    /// `create_default` time).
    pub fn merge_inferred(&mut self, doc: &Document) -> Result<()> {
        for (name, value) in doc.fields() {
            if Self::is_standard(name) {
                continue;
            }
            self.merge_field(name, value)?;
        }
        Ok(())
    }

    fn merge_field(&mut self, name: &str, value: &Value) -> Result<()> {
        let Some(observed_type) = Self::infer_type(value) else {
            // Null: doesn't establish a type for a field seen for the first
            // time; if the field already exists, nulls are always compatible.
            return Ok(());
        };

        match self.fields.get_mut(name) {
            None => {
                let field = match value {
                    Value::Array(items) => Self::build_array_field(name, items)?,
                    Value::Object(_) => {
                        let mut nested = Schema::create_default_empty();
                        Self::merge_object(&mut nested, value)?;
                        Field {
                            name: name.to_string(),
                            data_type: DataType::Object,
                            array_element_type: None,
                            nested_schema: Some(Box::new(nested)),
                        }
                    }
                    _ => Field::scalar(name, observed_type),
                };
                self.fields.insert(name.to_string(), field);
                Ok(())
            }
            Some(existing) => {
                if existing.data_type != observed_type {
                    return Err(Error::SchemaConflict {
                        field: name.to_string(),
                        expected: existing.data_type,
                        observed: observed_type,
                    });
                }
                match value {
                    Value::Object(_) => {
                        let nested = existing
                            .nested_schema
                            .get_or_insert_with(|| Box::new(Schema::create_default_empty()));
                        Self::merge_object(nested, value)?;
                    }
                    Value::Array(items) => {
                        Self::merge_array(existing, items)?;
                    }
                    _ => {}
                }
                Ok(())
            }
        }
    }

    /// An empty schema with no fields at all, used for nested object
    /// sub-schemas where the three standard fields don't apply.
    fn create_default_empty() -> Self {
        Schema {
            fields: BTreeMap::new(),
        }
    }

    fn merge_object(nested: &mut Schema, value: &Value) -> Result<()> {
        let Value::Object(map) = value else {
            return Ok(());
        };
        for (k, v) in map {
            nested.merge_field(k, v)?;
        }
        Ok(())
    }

    fn build_array_field(name: &str, items: &[Value]) -> Result<Field> {
        let mut element_type: Option<DataType> = None;
        let mut nested_schema: Option<Schema> = None;

        for item in items {
            let Some(item_type) = Self::infer_type(item) else {
                continue; // null elements don't establish or break the element type
            };
            match element_type {
                None => {
                    element_type = Some(item_type);
                    if let Value::Object(_) = item {
                        let mut nested = Schema::create_default_empty();
                        Self::merge_object(&mut nested, item)?;
                        nested_schema = Some(nested);
                    }
                }
                Some(established) if established == item_type => {
                    if let (Value::Object(_), Some(nested)) = (item, nested_schema.as_mut()) {
                        Self::merge_object(nested, item)?;
                    }
                }
                Some(established) => {
                    return Err(Error::SchemaConflict {
                        field: name.to_string(),
                        expected: established,
                        observed: item_type,
                    });
                }
            }
        }

        Ok(Field {
            name: name.to_string(),
            data_type: DataType::Array,
            array_element_type: element_type,
            nested_schema: nested_schema.map(Box::new),
        })
    }

    fn merge_array(existing: &mut Field, items: &[Value]) -> Result<()> {
        for item in items {
            let Some(item_type) = Self::infer_type(item) else {
                continue;
            };
            match existing.array_element_type {
                None => {
                    existing.array_element_type = Some(item_type);
                    if let Value::Object(_) = item {
                        let nested = existing
                            .nested_schema
                            .get_or_insert_with(|| Box::new(Schema::create_default_empty()));
                        Self::merge_object(nested, item)?;
                    }
                }
                Some(established) if established == item_type => {
                    if let Value::Object(_) = item {
                        let nested = existing
                            .nested_schema
                            .get_or_insert_with(|| Box::new(Schema::create_default_empty()));
                        Self::merge_object(nested, item)?;
                    }
                }
                Some(established) => {
                    return Err(Error::SchemaConflict {
                        field: existing.name.clone(),
                        expected: established,
                        observed: item_type,
                    });
                }
            }
        }
        Ok(())
    }

    /// Canonical, deterministic byte form (the `BTreeMap` already iterates in
    /// sorted order) used both for the fingerprint and for the persisted
    /// equality check the schema-persistence timer relies on.
    pub fn to_canonical_bytes(&self) -> Vec<u8> {
        bincode::serialize(&self.fields).expect("schema serialization cannot fail")
    }

    pub fn fingerprint(&self) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.to_canonical_bytes().hash(&mut hasher);
        hasher.finish()
    }
}

impl PartialEq<&Schema> for Schema {
    fn eq(&self, other: &&Schema) -> bool {
        self.to_canonical_bytes() == other.to_canonical_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(json: serde_json::Value) -> Document {
        Document::from_json(&json).unwrap()
    }

    #[test]
    fn default_schema_has_only_standard_fields() {
        let schema = Schema::create_default();
        assert_eq!(schema.fields().count(), 3);
        assert_eq!(schema.get(ID_FIELD).unwrap().data_type, DataType::UniqueIdentifier);
    }

    #[test]
    fn infers_scalar_types() {
        let mut schema = Schema::create_default();
        schema
            .merge_inferred(&doc(json!({"title": "hi", "rating": 9, "active": true})))
            .unwrap();
        assert_eq!(schema.get("title").unwrap().data_type, DataType::StringText);
        assert_eq!(schema.get("rating").unwrap().data_type, DataType::Integer);
        assert_eq!(schema.get("active").unwrap().data_type, DataType::Boolean);
    }

    #[test]
    fn rejects_type_conflict() {
        let mut schema = Schema::create_default();
        schema.merge_inferred(&doc(json!({"rating": 9}))).unwrap();
        let err = schema.merge_inferred(&doc(json!({"rating": "nine"})));
        assert!(err.is_err());
    }

    #[test]
    fn null_does_not_establish_type() {
        let mut schema = Schema::create_default();
        schema.merge_inferred(&doc(json!({"author": null}))).unwrap();
        assert!(schema.get("author").is_none());
        schema.merge_inferred(&doc(json!({"author": "Adams"}))).unwrap();
        assert_eq!(schema.get("author").unwrap().data_type, DataType::StringText);
    }

    #[test]
    fn nested_object_builds_sub_schema() {
        let mut schema = Schema::create_default();
        schema
            .merge_inferred(&doc(json!({"address": {"city": "Budapest", "zip": 1111}})))
            .unwrap();
        let field = schema.get("address").unwrap();
        assert_eq!(field.data_type, DataType::Object);
        let nested = field.nested_schema.as_ref().unwrap();
        assert_eq!(nested.get("city").unwrap().data_type, DataType::StringText);
        assert_eq!(nested.get("zip").unwrap().data_type, DataType::Integer);
    }

    #[test]
    fn homogeneous_array_records_element_type() {
        let mut schema = Schema::create_default();
        schema
            .merge_inferred(&doc(json!({"tags": ["a", "b", "c"]})))
            .unwrap();
        let field = schema.get("tags").unwrap();
        assert_eq!(field.data_type, DataType::Array);
        assert_eq!(field.array_element_type, Some(DataType::StringText));
    }

    #[test]
    fn conflicting_array_elements_fail() {
        let mut schema = Schema::create_default();
        let err = schema.merge_inferred(&doc(json!({"mixed": [1, "two"]})));
        assert!(err.is_err());
    }

    #[test]
    fn equal_by_canonical_bytes() {
        let mut a = Schema::create_default();
        let mut b = Schema::create_default();
        a.merge_inferred(&doc(json!({"x": 1}))).unwrap();
        b.merge_inferred(&doc(json!({"x": 1}))).unwrap();
        assert_eq!(a.to_canonical_bytes(), b.to_canonical_bytes());
        assert_eq!(a.fingerprint(), b.fingerprint());
    }
}
