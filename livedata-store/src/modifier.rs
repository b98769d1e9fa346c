//! Typed update patches.

use std::collections::BTreeSet;

use serde_json::{Map, Number, Value};

use crate::{Document, StoreError};

/// A field-level patch: overwrite (`set`), delete (`unset`) and
/// increment (`inc`).
///
/// Applied in that order. `_id` is immutable under every operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Modifier {
    pub set: Map<String, Value>,
    pub unset: BTreeSet<String>,
    pub inc: Map<String, Value>,
}

impl Modifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: Value) -> Self {
        self.set.insert(field.into(), value);
        self
    }

    pub fn unset(mut self, field: impl Into<String>) -> Self {
        self.unset.insert(field.into());
        self
    }

    pub fn inc(mut self, field: impl Into<String>, by: impl Into<Number>) -> Self {
        self.inc.insert(field.into(), Value::Number(by.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.unset.is_empty() && self.inc.is_empty()
    }

    /// Check that the patch can be applied to `doc` without touching it.
    pub fn validate(&self, doc: &Document) -> Result<(), StoreError> {
        if self.set.contains_key("_id") || self.unset.contains("_id") || self.inc.contains_key("_id") {
            return Err(StoreError::ImmutableId);
        }
        for (field, by) in &self.inc {
            if !by.is_number() {
                return Err(StoreError::NotNumeric(field.clone()));
            }
            match doc.get(field) {
                None | Some(Value::Number(_)) => {}
                Some(_) => return Err(StoreError::NotNumeric(field.clone())),
            }
        }
        Ok(())
    }

    /// Apply the patch in place. Nothing is written if validation fails.
    pub fn apply(&self, doc: &mut Document) -> Result<(), StoreError> {
        self.validate(doc)?;
        for (field, value) in &self.set {
            doc.insert(field.clone(), value.clone());
        }
        for field in &self.unset {
            doc.remove(field);
        }
        for (field, by) in &self.inc {
            let current = doc.get(field).cloned().unwrap_or_else(|| Value::from(0));
            doc.insert(field.clone(), add_numbers(&current, by));
        }
        Ok(())
    }

    /// Mongo-style JSON form used in method parameters.
    pub fn to_wire(&self) -> Value {
        let mut wire = Map::new();
        if !self.set.is_empty() {
            wire.insert("$set".into(), Value::Object(self.set.clone()));
        }
        if !self.unset.is_empty() {
            let unset = self.unset.iter().map(|f| (f.clone(), Value::from(1))).collect();
            wire.insert("$unset".into(), Value::Object(unset));
        }
        if !self.inc.is_empty() {
            wire.insert("$inc".into(), Value::Object(self.inc.clone()));
        }
        Value::Object(wire)
    }
}

fn add_numbers(a: &Value, b: &Value) -> Value {
    match (a.as_i64(), b.as_i64()) {
        (Some(x), Some(y)) => Value::from(x.saturating_add(y)),
        _ => {
            let sum = a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0);
            Number::from_f64(sum).map(Value::Number).unwrap_or(Value::Null)
        }
    }
}
