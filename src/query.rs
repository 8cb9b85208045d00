//! Typed queries handed to the storage layer.
//!
//! A [`SafeQuery`] can only be built by the pipeline after a query has been
//! scored, validated and sanitized. Storage code that accepts `SafeQuery`
//! instead of raw JSON therefore cannot receive unchecked input.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Number, Value};

use crate::error::{GuardError, Result};
use crate::validation::{type_name, RuleKind, RuleSet};

/// A validated scalar (or list of scalars)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// String value
    Text(String),
    /// Integer value
    Integer(i64),
    /// Decimal value
    Decimal(f64),
    /// List of strings (multi-valued enum fields)
    TextList(Vec<String>),
}

impl FieldValue {
    /// Convert back to JSON
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Text(s) => Value::String(s.clone()),
            FieldValue::Integer(n) => Value::Number((*n).into()),
            FieldValue::Decimal(n) => Number::from_f64(*n).map_or(Value::Null, Value::Number),
            FieldValue::TextList(items) => {
                Value::Array(items.iter().cloned().map(Value::String).collect())
            },
        }
    }

    /// String value, if any
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric value as f64, if any
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Integer(n) => Some(*n as f64),
            FieldValue::Decimal(n) => Some(*n),
            _ => None,
        }
    }
}

/// A query that passed every stage of the pipeline
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SafeQuery {
    fields: BTreeMap<String, FieldValue>,
    #[serde(skip)]
    queryable: Vec<String>,
}

impl SafeQuery {
    /// Build from a sanitized map. Every value must already be valid for
    /// its rule; anything that does not fit a [`FieldValue`] is an error.
    pub(crate) fn from_sanitized(map: &Map<String, Value>, rules: &RuleSet) -> Result<Self> {
        let mut fields = BTreeMap::new();
        let mut queryable = Vec::new();

        for (field, value) in map {
            let rule = rules
                .get(field)
                .ok_or_else(|| GuardError::validation(field.as_str(), "unknown field"))?;
            let typed = match (rule.kind, value) {
                (RuleKind::Integer { .. }, Value::Number(n)) => n.as_i64().map(FieldValue::Integer),
                (RuleKind::Decimal { .. }, Value::Number(n)) => n.as_f64().map(FieldValue::Decimal),
                (RuleKind::Enum { multi: true, .. }, Value::Array(items)) => items
                    .iter()
                    .map(|item| item.as_str().map(str::to_string))
                    .collect::<Option<Vec<_>>>()
                    .map(FieldValue::TextList),
                (_, Value::String(s)) if !rule.kind.is_numeric() => Some(FieldValue::Text(s.clone())),
                _ => None,
            };
            let typed = typed.ok_or_else(|| {
                GuardError::validation(
                    field.as_str(),
                    format!("unexpected {} after sanitization", type_name(value)),
                )
            })?;

            if rule.queryable {
                queryable.push(field.clone());
            }
            fields.insert(field.clone(), typed);
        }

        Ok(Self { fields, queryable })
    }

    /// Value of a field
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    /// All fields, ordered by name
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Fields that become part of the database filter
    pub fn filter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields
            .iter()
            .filter(|(k, _)| self.queryable.contains(k))
            .map(|(k, v)| (k.as_str(), v))
    }

    /// Paging and sorting fields (`limit`, `offset`, `sort`)
    pub fn options(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields
            .iter()
            .filter(|(k, _)| !self.queryable.contains(k))
            .map(|(k, v)| (k.as_str(), v))
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the query has no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The query as a JSON object
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }

    /// The filter document for the database (queryable fields only)
    pub fn into_document(self) -> Map<String, Value> {
        let Self { fields, queryable } = self;
        fields
            .into_iter()
            .filter(|(k, _)| queryable.contains(k))
            .map(|(k, v)| (k, v.to_json()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn build(value: Value) -> Result<SafeQuery> {
        let Value::Object(map) = value else {
            unreachable!()
        };
        SafeQuery::from_sanitized(&map, &RuleSet::catalogue())
    }

    #[test]
    fn test_typed_fields() {
        let query = build(json!({
            "face_shape": ["oval", "round"],
            "price": 129.5,
            "limit": 20,
            "sku": "ABC-123",
        }))
        .unwrap();

        assert_eq!(
            query.get("face_shape"),
            Some(&FieldValue::TextList(vec!["oval".into(), "round".into()]))
        );
        assert_eq!(query.get("price"), Some(&FieldValue::Decimal(129.5)));
        assert_eq!(query.get("limit"), Some(&FieldValue::Integer(20)));
        assert_eq!(query.get("sku").and_then(FieldValue::as_str), Some("ABC-123"));
    }

    #[test]
    fn test_filter_and_options_split() {
        let query = build(json!({"gender": "women", "limit": 10, "sort": "-price"})).unwrap();
        let filter: Vec<_> = query.filter().map(|(k, _)| k).collect();
        let options: Vec<_> = query.options().map(|(k, _)| k).collect();
        assert_eq!(filter, vec!["gender"]);
        assert_eq!(options, vec!["limit", "sort"]);

        let doc = query.into_document();
        assert_eq!(Value::Object(doc), json!({"gender": "women"}));
    }

    #[test]
    fn test_integral_price_is_decimal() {
        let query = build(json!({"price": 120})).unwrap();
        assert_eq!(query.get("price").and_then(FieldValue::as_f64), Some(120.0));
    }

    #[test]
    fn test_rejects_untyped_values() {
        assert!(build(json!({"limit": "10"})).is_err());
        assert!(build(json!({"sku": {"nested": 1}})).is_err());
        assert!(build(json!({"unknown": "x"})).is_err());
    }

    #[test]
    fn test_round_trip_json() {
        let raw = json!({"face_shape": "oval", "limit": 5});
        assert_eq!(build(raw.clone()).unwrap().to_json(), raw);
    }
}
