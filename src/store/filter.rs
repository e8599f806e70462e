// Copyright (c) 2025 - Cowboy AI, Inc.
//! Field filters over top-level document fields

use serde_json::Value;

/// Predicate over a document body
///
/// Missing fields compare as `null`.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every document
    All,
    /// Field equals value
    Eq(String, Value),
    /// Field differs from value
    Ne(String, Value),
    /// Field equals one of the values
    In(String, Vec<Value>),
    /// Array field contains the value
    Contains(String, Value),
    /// Array field is missing, null or empty
    Empty(String),
    /// Every sub-filter matches
    And(Vec<Filter>),
    /// At least one sub-filter matches
    Or(Vec<Filter>),
    /// Sub-filter does not match
    Not(Box<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(field.into(), value.into())
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Ne(field.into(), value.into())
    }

    pub fn is_in<V: Into<Value>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Filter::In(field.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn contains(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Contains(field.into(), value.into())
    }

    pub fn empty(field: impl Into<String>) -> Self {
        Filter::Empty(field.into())
    }

    pub fn negate(filter: Filter) -> Self {
        Filter::Not(Box::new(filter))
    }

    /// Evaluate the filter against a document body
    pub fn matches(&self, body: &Value) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(field, value) => field_of(body, field) == value,
            Filter::Ne(field, value) => field_of(body, field) != value,
            Filter::In(field, values) => values.contains(field_of(body, field)),
            Filter::Contains(field, value) => match field_of(body, field) {
                Value::Array(items) => items.contains(value),
                _ => false,
            },
            Filter::Empty(field) => match field_of(body, field) {
                Value::Null => true,
                Value::Array(items) => items.is_empty(),
                _ => false,
            },
            Filter::And(filters) => filters.iter().all(|f| f.matches(body)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(body)),
            Filter::Not(filter) => !filter.matches(body),
        }
    }
}

fn field_of<'a>(body: &'a Value, field: &str) -> &'a Value {
    body.get(field).unwrap_or(&Value::Null)
}
