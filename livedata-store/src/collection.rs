//! Ordered in-memory document collection with a rollback checkpoint.
//!
//! ```text
//!  insert / update / remove
//!          │
//!          ▼
//!  ┌────────────────┐  snapshot()   ┌────────────────┐
//!  │ docs (ordered) │ ────────────► │ saved (clone)  │
//!  │                │ ◄──────────── │                │
//!  └───────┬────────┘  restore()    └────────────────┘
//!          │
//!          ▼ (when observed)
//!   journal: Added / Changed / Removed
//! ```
//!
//! Documents keep insertion order, so an unsorted `find` returns them in
//! the order they were first inserted.

use indexmap::IndexMap;

use crate::{document_id, Document, FindOptions, Modifier, Selector, StoreError, UpdateOptions};

/// One observed mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Added(Document),
    Changed { old: Document, new: Document },
    Removed(Document),
}

impl Change {
    /// `_id` of the affected document.
    pub fn id(&self) -> Option<&str> {
        match self {
            Change::Added(doc) | Change::Removed(doc) => document_id(doc),
            Change::Changed { new, .. } => document_id(new),
        }
    }
}

/// In-memory collection of JSON documents keyed by `_id`.
#[derive(Debug, Default)]
pub struct LocalCollection {
    docs: IndexMap<String, Document>,
    /// Checkpoint taken by `snapshot()`.
    saved: Option<IndexMap<String, Document>>,
    /// Pending change records; `None` when nobody observes.
    journal: Option<Vec<Change>>,
}

impl LocalCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a collection that records every mutation for
    /// [`drain_changes`](Self::drain_changes).
    pub fn observed() -> Self {
        Self {
            journal: Some(Vec::new()),
            ..Self::default()
        }
    }

    /// Take the changes recorded since the last call.
    pub fn drain_changes(&mut self) -> Vec<Change> {
        self.journal.as_mut().map(std::mem::take).unwrap_or_default()
    }

    fn record(&mut self, change: Change) {
        if let Some(journal) = self.journal.as_mut() {
            journal.push(change);
        }
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Borrow a document by `_id`.
    pub fn get(&self, id: &str) -> Option<&Document> {
        self.docs.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.docs.contains_key(id)
    }

    /// Ids of every document matching `selector`, in store order.
    fn matching_ids(&self, selector: &Selector) -> Vec<String> {
        if let Some(id) = selector.single_id() {
            return match self.docs.get(id) {
                Some(doc) if selector.matches(doc) => vec![id.to_string()],
                _ => Vec::new(),
            };
        }
        self.docs
            .iter()
            .filter(|(_, doc)| selector.matches(doc))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Query documents. Results are copies.
    pub fn find(&self, selector: &Selector, options: &FindOptions) -> Vec<Document> {
        let mut found: Vec<&Document> = self.docs.values().filter(|d| selector.matches(d)).collect();
        if !options.sort.is_empty() {
            // stable: ties keep store order
            found.sort_by(|a, b| options.compare(a, b));
        }
        let limit = options.limit.unwrap_or(usize::MAX);
        found
            .into_iter()
            .skip(options.skip)
            .take(limit)
            .cloned()
            .collect()
    }

    /// First match, honouring the sort in `options`.
    pub fn find_one(&self, selector: &Selector, options: &FindOptions) -> Option<Document> {
        let options = FindOptions {
            limit: Some(1),
            ..options.clone()
        };
        self.find(selector, &options).into_iter().next()
    }

    pub fn count(&self, selector: &Selector) -> usize {
        self.docs.values().filter(|d| selector.matches(d)).count()
    }

    /// Insert a document that already carries a string `_id`.
    pub fn insert(&mut self, doc: Document) -> Result<String, StoreError> {
        let id = document_id(&doc).ok_or(StoreError::MissingId)?.to_string();
        if self.docs.contains_key(&id) {
            return Err(StoreError::DuplicateId(id));
        }
        self.record(Change::Added(doc.clone()));
        self.docs.insert(id.clone(), doc);
        Ok(id)
    }

    /// Apply `modifier` to the first (or, with `multi`, every) match.
    ///
    /// Returns the number of documents changed. The first failing
    /// document aborts the update; earlier ones stay modified.
    pub fn update(
        &mut self,
        selector: &Selector,
        modifier: &Modifier,
        options: &UpdateOptions,
    ) -> Result<usize, StoreError> {
        let mut ids = self.matching_ids(selector);
        if !options.multi {
            ids.truncate(1);
        }
        let mut updated = 0;
        for id in ids {
            let Some(doc) = self.docs.get_mut(&id) else { continue };
            let old = doc.clone();
            modifier.apply(doc)?;
            let new = doc.clone();
            self.record(Change::Changed { old, new });
            updated += 1;
        }
        Ok(updated)
    }

    /// Remove every match. Returns how many were removed.
    pub fn remove(&mut self, selector: &Selector) -> usize {
        let ids = self.matching_ids(selector);
        for id in &ids {
            if let Some(doc) = self.docs.shift_remove(id) {
                self.record(Change::Removed(doc));
            }
        }
        ids.len()
    }

    /// Remove every document.
    pub fn clear(&mut self) -> usize {
        self.remove(&Selector::All)
    }

    /// Checkpoint the current contents, replacing any older checkpoint.
    pub fn snapshot(&mut self) {
        self.saved = Some(self.docs.clone());
    }

    pub fn has_snapshot(&self) -> bool {
        self.saved.is_some()
    }

    /// Roll back to the checkpoint and drop it. Returns `false` when no
    /// checkpoint was held.
    pub fn restore(&mut self) -> bool {
        match self.saved.take() {
            Some(saved) => {
                log::trace!("restoring checkpoint ({} -> {} docs)", self.docs.len(), saved.len());
                self.docs = saved;
                true
            }
            None => false,
        }
    }

    /// Drop the checkpoint without restoring it.
    pub fn discard_snapshot(&mut self) {
        self.saved = None;
    }

    /// Iterate documents in store order.
    pub fn iter(&self) -> impl Iterator<Item = &Document> {
        self.docs.values()
    }
}
