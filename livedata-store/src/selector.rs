//! Document selection and query options.
//!
//! A [`Selector`] is a closed set of match rules. `All` and `Nothing` are
//! kept distinct on purpose: an explicit match-everything query is not the
//! same thing as a query with no selector at all, which matches no
//! document.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{lookup, Document};

/// Which documents a query or mutation applies to.
#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    /// Every document.
    All,
    /// No document.
    Nothing,
    /// The document with this `_id`.
    Id(String),
    /// Documents whose fields equal every given value.
    ///
    /// Keys may be dotted paths (`"address.city"`). A `null` value also
    /// matches a missing field.
    Fields(Map<String, Value>),
}

impl Selector {
    /// Build a field-equality selector from `(path, value)` pairs.
    pub fn fields<K, I>(pairs: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Selector::Fields(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Whether `doc` is selected.
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Selector::All => true,
            Selector::Nothing => false,
            Selector::Id(id) => doc.get("_id").and_then(Value::as_str) == Some(id.as_str()),
            Selector::Fields(fields) => fields.iter().all(|(path, expected)| {
                match lookup(doc, path) {
                    Some(actual) => actual == expected,
                    None => expected.is_null(),
                }
            }),
        }
    }

    /// The id this selector pins, if any.
    pub fn single_id(&self) -> Option<&str> {
        match self {
            Selector::Id(id) => Some(id),
            Selector::Fields(fields) if fields.len() == 1 => {
                fields.get("_id").and_then(Value::as_str)
            }
            _ => None,
        }
    }

    /// Mongo-style JSON form used in method parameters.
    pub fn to_wire(&self) -> Value {
        match self {
            Selector::All => Value::Object(Map::new()),
            Selector::Nothing => Value::Null,
            Selector::Id(id) => Value::String(id.clone()),
            Selector::Fields(fields) => Value::Object(fields.clone()),
        }
    }

    /// Inverse of [`to_wire`](Self::to_wire). Returns `None` for shapes
    /// that are not selectors (numbers, arrays, booleans).
    pub fn from_wire(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(Selector::Nothing),
            Value::String(id) => Some(Selector::Id(id.clone())),
            Value::Object(map) if map.is_empty() => Some(Selector::All),
            Value::Object(map) => Some(Selector::Fields(map.clone())),
            _ => None,
        }
    }
}

impl From<&str> for Selector {
    fn from(id: &str) -> Self {
        Selector::Id(id.to_string())
    }
}

impl From<String> for Selector {
    fn from(id: String) -> Self {
        Selector::Id(id)
    }
}

/// Sort direction for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// One sort key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    pub order: SortOrder,
}

/// Options for [`LocalCollection::find`](crate::LocalCollection::find).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FindOptions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<SortKey>,
    #[serde(default)]
    pub skip: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl FindOptions {
    pub fn sort_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort.push(SortKey { field: field.into(), order });
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Order two documents by the configured sort keys.
    pub(crate) fn compare(&self, a: &Document, b: &Document) -> Ordering {
        for key in &self.sort {
            let ord = compare_values(lookup(a, &key.field), lookup(b, &key.field));
            let ord = match key.order {
                SortOrder::Ascending => ord,
                SortOrder::Descending => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

/// Options for [`LocalCollection::update`](crate::LocalCollection::update).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateOptions {
    /// Update every match instead of the first one.
    #[serde(default)]
    pub multi: bool,
}

impl UpdateOptions {
    pub fn multi() -> Self {
        Self { multi: true }
    }

    pub fn to_wire(&self) -> Value {
        serde_json::json!({ "multi": self.multi })
    }
}

// Missing and null sort first, then numbers, strings, objects, arrays, booleans.
fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Number(_)) => 1,
        Some(Value::String(_)) => 2,
        Some(Value::Object(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Bool(_)) => 5,
    }
}

/// Total order over optional JSON values used for sorting.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Array(x)), Some(Value::Array(y))) => {
            for (l, r) in x.iter().zip(y.iter()) {
                let ord = compare_values(Some(l), Some(r));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Some(Value::Object(x)), Some(Value::Object(y))) => {
            Value::Object(x.clone()).to_string().cmp(&Value::Object(y.clone()).to_string())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}
