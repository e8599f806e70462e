// Copyright (c) 2025 - Cowboy AI, Inc.
//! Field-level updates applied to stored documents

use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq)]
enum FieldOp {
    Set(String, Value),
    Unset(String),
    Inc(String, i64),
    AddToSet(String, Value),
    Pull(String, Value),
}

/// Ordered list of field operations on one document
///
/// ```rust
/// use cim_machine_state::store::Update;
/// use serde_json::json;
///
/// let update = Update::new()
///     .set("life", "dying")
///     .add_to_set("principals", "wordpress/0");
///
/// let mut body = json!({"life": "alive"});
/// update.apply(&mut body).unwrap();
/// assert_eq!(body, json!({"life": "dying", "principals": ["wordpress/0"]}));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    ops: Vec<FieldOp>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(FieldOp::Set(field.into(), value.into()));
        self
    }

    pub fn unset(mut self, field: impl Into<String>) -> Self {
        self.ops.push(FieldOp::Unset(field.into()));
        self
    }

    pub fn inc(mut self, field: impl Into<String>, by: i64) -> Self {
        self.ops.push(FieldOp::Inc(field.into(), by));
        self
    }

    /// Append to an array field unless already present
    pub fn add_to_set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(FieldOp::AddToSet(field.into(), value.into()));
        self
    }

    /// Remove every occurrence of the value from an array field
    pub fn pull(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(FieldOp::Pull(field.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Apply to a document body; the error names the offending field
    pub fn apply(&self, body: &mut Value) -> Result<(), String> {
        if body.is_null() {
            *body = Value::Object(Map::new());
        }
        let fields = body
            .as_object_mut()
            .ok_or_else(|| "document body is not an object".to_string())?;

        for op in &self.ops {
            match op {
                FieldOp::Set(field, value) => {
                    fields.insert(field.clone(), value.clone());
                }
                FieldOp::Unset(field) => {
                    fields.remove(field);
                }
                FieldOp::Inc(field, by) => {
                    let current = match fields.get(field) {
                        None | Some(Value::Null) => 0,
                        Some(v) => v
                            .as_i64()
                            .ok_or_else(|| format!("field {field:?} is not an integer"))?,
                    };
                    fields.insert(field.clone(), Value::from(current + by));
                }
                FieldOp::AddToSet(field, value) => {
                    let items = array_field(fields, field)?;
                    if !items.contains(value) {
                        items.push(value.clone());
                    }
                }
                FieldOp::Pull(field, value) => {
                    let items = array_field(fields, field)?;
                    items.retain(|item| item != value);
                }
            }
        }
        Ok(())
    }
}

fn array_field<'a>(
    fields: &'a mut Map<String, Value>,
    field: &str,
) -> Result<&'a mut Vec<Value>, String> {
    let entry = fields
        .entry(field.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if entry.is_null() {
        *entry = Value::Array(Vec::new());
    }
    entry
        .as_array_mut()
        .ok_or_else(|| format!("field {field:?} is not an array"))
}
