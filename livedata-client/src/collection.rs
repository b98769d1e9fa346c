//! Collection proxies: the read/write surface over local stores.
//!
//! A named collection mirrors a server collection. Every write is applied
//! locally at once (optimistic) and forwarded as a `/{name}/{op}` method
//! call; the first such write after a reconciliation checkpoints the store
//! so the speculative state can be rolled back when authoritative data
//! lands. Unnamed collections are purely local and never touch the wire.

use std::collections::HashMap;

use livedata_store::{
    Document, FindOptions, LocalCollection, Modifier, Selector, UpdateOptions,
};
use serde_json::Value;

use crate::error::LiveDataError;
use crate::ids::IdGenerator;
use crate::methods::MethodTracker;
use crate::stream::Outbox;

/// Opaque reference to a collection owned by a [`LiveClient`](crate::LiveClient).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CollectionHandle(usize);

/// Per-collection state held by the client.
#[derive(Debug, Default)]
pub struct CollectionState {
    name: Option<String>,
    store: LocalCollection,
    snapshot_taken: bool,
}

impl CollectionState {
    fn new(name: Option<String>) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }

    /// Server collection name; `None` for a local scratch collection.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn store(&self) -> &LocalCollection {
        &self.store
    }

    /// Direct access to the store, bypassing checkpoint and outbox.
    pub fn store_mut(&mut self) -> &mut LocalCollection {
        &mut self.store
    }

    /// Whether a checkpoint is held since the last reconcile.
    pub fn snapshot_taken(&self) -> bool {
        self.snapshot_taken
    }

    fn ensure_snapshot(&mut self) {
        if !self.snapshot_taken {
            self.store.snapshot();
            self.snapshot_taken = true;
        }
    }

    /// Roll speculative writes back to the checkpoint, if one is held.
    pub fn rollback(&mut self) -> bool {
        if !self.snapshot_taken {
            return false;
        }
        self.snapshot_taken = false;
        self.store.restore()
    }
}

/// Every collection of one client.
#[derive(Debug, Default)]
pub struct CollectionSet {
    slots: Vec<CollectionState>,
    by_name: HashMap<String, usize>,
}

impl CollectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a collection. Server-backed names must be unique.
    pub fn create(&mut self, name: Option<&str>) -> Result<CollectionHandle, LiveDataError> {
        let index = self.slots.len();
        if let Some(name) = name {
            if self.by_name.contains_key(name) {
                return Err(LiveDataError::DuplicateCollection(name.to_string()));
            }
            self.by_name.insert(name.to_string(), index);
        }
        self.slots.push(CollectionState::new(name.map(str::to_string)));
        Ok(CollectionHandle(index))
    }

    /// `None` for a handle from another client.
    pub fn get(&self, handle: CollectionHandle) -> Option<&CollectionState> {
        self.slots.get(handle.0)
    }

    pub fn get_mut(&mut self, handle: CollectionHandle) -> Option<&mut CollectionState> {
        self.slots.get_mut(handle.0)
    }

    /// Handle of the server-backed collection `name`.
    pub fn handle_of(&self, name: &str) -> Option<CollectionHandle> {
        self.by_name.get(name).copied().map(CollectionHandle)
    }

    /// Server-backed collection `name`, as addressed by data frames.
    pub fn named_mut(&mut self, name: &str) -> Option<&mut CollectionState> {
        let index = *self.by_name.get(name)?;
        self.slots.get_mut(index)
    }

    /// Server-backed collections.
    pub fn server_backed_mut(&mut self) -> impl Iterator<Item = &mut CollectionState> {
        self.slots.iter_mut().filter(|c| c.name.is_some())
    }

    /// Roll back every collection holding a checkpoint. Returns how many.
    pub fn rollback_all(&mut self) -> usize {
        self.slots.iter_mut().filter(|c| c.snapshot_taken).map(|c| c.rollback()).filter(|r| *r).count()
    }

    /// Empty every server-backed store and forget its checkpoint.
    pub fn clear_server_backed(&mut self) -> usize {
        let mut removed = 0;
        for state in self.server_backed_mut() {
            removed += state.store.clear();
            state.store.discard_snapshot();
            state.snapshot_taken = false;
        }
        removed
    }

    /// Collections of both kinds.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Borrowed read/write view of one collection.
pub struct Collection<'a> {
    pub(crate) state: &'a mut CollectionState,
    pub(crate) methods: &'a mut MethodTracker,
    pub(crate) outbox: &'a mut Outbox,
    pub(crate) ids: &'a mut dyn IdGenerator,
}

impl Collection<'_> {
    pub fn name(&self) -> Option<&str> {
        self.state.name()
    }

    pub fn is_snapshot_taken(&self) -> bool {
        self.state.snapshot_taken
    }

    /// Query. `Selector::All` and `Selector::Nothing` are distinct.
    pub fn find(&self, selector: &Selector, options: &FindOptions) -> Vec<Document> {
        self.state.store.find(selector, options)
    }

    /// Every document, in store order.
    pub fn find_all(&self) -> Vec<Document> {
        self.find(&Selector::All, &FindOptions::default())
    }

    pub fn find_one(&self, selector: &Selector) -> Option<Document> {
        self.state.store.find_one(selector, &FindOptions::default())
    }

    pub fn count(&self, selector: &Selector) -> usize {
        self.state.store.count(selector)
    }

    /// Checkpoint (once) and send the write to the server, if named.
    fn forward(&mut self, op: &str, params: Vec<Value>) {
        let Some(name) = self.state.name.clone() else { return };
        self.state.ensure_snapshot();
        self.methods.issue(format!("/{name}/{op}"), params, None, self.outbox);
    }

    /// Insert `doc` under a freshly generated `_id`, written back into
    /// `doc`. A caller-supplied `_id` is replaced.
    pub fn insert(&mut self, doc: &mut Document) -> String {
        if doc.contains_key("_id") {
            log::warn!("trying to insert object with _id set; replacing it");
        }
        let id = self.ids.next_id();
        doc.insert("_id".into(), Value::String(id.clone()));

        self.forward("insert", vec![Value::Object(doc.clone())]);
        if let Err(e) = self.state.store.insert(doc.clone()) {
            log::warn!("local insert into {:?} failed: {e}", self.state.name);
        }
        id
    }

    /// Update the first (or every, with `multi`) match.
    pub fn update(&mut self, selector: &Selector, modifier: &Modifier, options: &UpdateOptions) -> usize {
        self.forward(
            "update",
            vec![selector.to_wire(), modifier.to_wire(), options.to_wire()],
        );
        match self.state.store.update(selector, modifier, options) {
            Ok(n) => n,
            Err(e) => {
                log::warn!("local update on {:?} failed: {e}", self.state.name);
                0
            }
        }
    }

    /// Remove every match.
    pub fn remove(&mut self, selector: &Selector) -> usize {
        self.forward("remove", vec![selector.to_wire()]);
        self.state.store.remove(selector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::SequentialIds;
    use crate::protocol::{Message, MethodId};
    use serde_json::json;

    struct Fixture {
        set: CollectionSet,
        methods: MethodTracker,
        outbox: Outbox,
        ids: SequentialIds,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                set: CollectionSet::new(),
                methods: MethodTracker::new(),
                outbox: Outbox::new(),
                ids: SequentialIds::new("doc"),
            }
        }

        fn view(&mut self, handle: CollectionHandle) -> Collection<'_> {
            Collection {
                state: self.set.get_mut(handle).unwrap(),
                methods: &mut self.methods,
                outbox: &mut self.outbox,
                ids: &mut self.ids,
            }
        }
    }

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_duplicate_named_collection() {
        let mut set = CollectionSet::new();
        set.create(Some("todos")).unwrap();
        assert!(matches!(
            set.create(Some("todos")),
            Err(LiveDataError::DuplicateCollection(_))
        ));
        // unnamed ones never clash
        set.create(None).unwrap();
        set.create(None).unwrap();
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_named_insert_forwards_and_snapshots() {
        let mut fx = Fixture::new();
        let todos = fx.set.create(Some("todos")).unwrap();
        let mut d = doc(json!({"_id": "mine", "title": "a"}));
        let id = fx.view(todos).insert(&mut d);

        assert_eq!(id, "doc-1");
        assert_eq!(d["_id"], json!("doc-1"));
        assert!(fx.set.get(todos).unwrap().snapshot_taken());
        assert_eq!(
            fx.outbox.drain(),
            vec![Message::Method {
                method: "/todos/insert".into(),
                params: vec![json!({"_id": "doc-1", "title": "a"})],
                id: MethodId(1),
            }]
        );
        assert_eq!(fx.view(todos).count(&Selector::All), 1);
    }

    #[test]
    fn test_snapshot_taken_once() {
        let mut fx = Fixture::new();
        let todos = fx.set.create(Some("todos")).unwrap();
        fx.view(todos).insert(&mut doc(json!({"n": 1})));
        fx.view(todos).insert(&mut doc(json!({"n": 2})));
        // rollback restores the state before the first write
        assert!(fx.set.get_mut(todos).unwrap().rollback());
        assert!(fx.view(todos).find_all().is_empty());
        assert!(!fx.set.get(todos).unwrap().snapshot_taken());
    }

    #[test]
    fn test_local_collection_never_forwards() {
        let mut fx = Fixture::new();
        let scratch = fx.set.create(None).unwrap();
        let mut view = fx.view(scratch);
        let id = view.insert(&mut doc(json!({"n": 1})));
        view.update(&Selector::Id(id.clone()), &Modifier::new().set("n", json!(2)), &UpdateOptions::default());
        assert_eq!(view.find_one(&Selector::Id(id)).unwrap()["n"], json!(2));
        assert_eq!(view.remove(&Selector::All), 1);
        assert!(!view.is_snapshot_taken());
        assert!(fx.outbox.is_empty());
        assert_eq!(fx.methods.pending_count(), 0);
    }

    #[test]
    fn test_update_and_remove_wire_params() {
        let mut fx = Fixture::new();
        let todos = fx.set.create(Some("todos")).unwrap();
        let mut view = fx.view(todos);
        view.update(&Selector::from("x"), &Modifier::new().set("done", json!(true)), &UpdateOptions::default());
        view.remove(&Selector::All);

        let frames = fx.outbox.drain();
        assert_eq!(
            frames[0],
            Message::Method {
                method: "/todos/update".into(),
                params: vec![json!("x"), json!({"$set": {"done": true}}), json!({"multi": false})],
                id: MethodId(1),
            }
        );
        assert_eq!(
            frames[1],
            Message::Method { method: "/todos/remove".into(), params: vec![json!({})], id: MethodId(2) }
        );
    }

    #[test]
    fn test_failed_local_update_is_not_surfaced() {
        let mut fx = Fixture::new();
        let todos = fx.set.create(Some("todos")).unwrap();
        let mut view = fx.view(todos);
        let id = view.insert(&mut doc(json!({"name": "x"})));
        let changed = view.update(&Selector::Id(id), &Modifier::new().inc("name", 1), &UpdateOptions::default());
        assert_eq!(changed, 0);
        // still forwarded
        assert_eq!(fx.outbox.len(), 2);
    }

    #[test]
    fn test_clear_server_backed_leaves_local() {
        let mut fx = Fixture::new();
        let todos = fx.set.create(Some("todos")).unwrap();
        let scratch = fx.set.create(None).unwrap();
        fx.view(todos).insert(&mut doc(json!({"n": 1})));
        fx.view(scratch).insert(&mut doc(json!({"n": 1})));

        assert_eq!(fx.set.clear_server_backed(), 1);
        assert_eq!(fx.view(todos).count(&Selector::All), 0);
        assert_eq!(fx.view(scratch).count(&Selector::All), 1);
        assert!(!fx.set.get(todos).unwrap().snapshot_taken());
    }
}
