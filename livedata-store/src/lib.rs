//! # livedata-store: in-memory document store for livedata clients
//!
//! Each [`LocalCollection`] is an ordered set of JSON documents keyed by a
//! string `_id`, with:
//!
//! - selector queries with sort / skip / limit ([`Selector`], [`FindOptions`])
//! - typed set / unset / inc patches ([`Modifier`])
//! - a single rollback checkpoint (`snapshot` / `restore`)
//! - an optional change journal for observers ([`Change`])

pub mod collection;
pub mod error;
pub mod modifier;
pub mod selector;

pub use collection::{Change, LocalCollection};
pub use error::StoreError;
pub use modifier::Modifier;
pub use selector::{compare_values, FindOptions, Selector, SortKey, SortOrder, UpdateOptions};

use serde_json::{Map, Value};

/// A stored document: a JSON object carrying a string `_id`.
pub type Document = Map<String, Value>;

/// The `_id` of a document, if it is a string.
pub fn document_id(doc: &Document) -> Option<&str> {
    doc.get("_id").and_then(Value::as_str)
}

/// Resolve a dotted field path (`"a.b.c"`) inside a document.
pub fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Turn a JSON value into a document. Non-objects yield `None`.
pub fn into_document(value: Value) -> Option<Document> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}
