//! Quiescence-gated application of server data.
//!
//! ```text
//!   data frame ──► buffer.push ──► satisfy(frame.methods)
//!                                       │
//!                       unsatisfied ≠ ∅ │ unsatisfied = ∅
//!                     ┌─────────────────┴──────────────────┐
//!                     ▼                                    ▼
//!                  (wait)            1. roll back every checkpointed collection
//!                                    2. replay buffer in arrival order
//!                                       (doc diffs, then ready callbacks)
//!                                    3. clear buffer
//! ```
//!
//! While any call issued by this client is still waiting for its data,
//! nothing is applied: the client never sees half of a server-side
//! transaction it caused, and its optimistic writes are not thrown away
//! before the authoritative version is available.

use livedata_store::{LocalCollection, Modifier, Selector, StoreError, UpdateOptions};
use serde_json::Value;

use crate::collection::CollectionSet;
use crate::methods::MethodTracker;
use crate::protocol::{DataMessage, DataPatch};
use crate::subscription::SubscriptionRegistry;

/// What one document diff did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    Inserted,
    Updated,
    Removed,
}

/// Apply one server diff to `store`.
///
/// - existing doc left with only `_id` ⇒ removed
/// - existing doc otherwise ⇒ `set`, then `unset`
/// - absent doc ⇒ inserted as `_id` + `set`
pub fn apply_patch(store: &mut LocalCollection, id: &str, patch: &DataPatch) -> Result<PatchOutcome, StoreError> {
    let selector = Selector::Id(id.to_string());
    match store.get(id) {
        Some(doc) if patch.empties(doc) => {
            store.remove(&selector);
            Ok(PatchOutcome::Removed)
        }
        Some(_) => {
            let modifier = Modifier {
                set: patch.set.clone(),
                unset: patch.unset.clone(),
                ..Modifier::default()
            };
            store.update(&selector, &modifier, &UpdateOptions::default())?;
            Ok(PatchOutcome::Updated)
        }
        None => {
            let mut doc = patch.set.clone();
            doc.insert("_id".into(), Value::String(id.to_string()));
            store.insert(doc)?;
            Ok(PatchOutcome::Inserted)
        }
    }
}

/// Buffer of data frames waiting for quiescence.
#[derive(Debug, Default)]
pub struct DataReconciler {
    buffer: Vec<DataMessage>,
}

impl DataReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames received but not yet applied.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Accept one data frame. Returns the number of frames applied if
    /// this frame completed quiescence, `None` if still waiting.
    pub fn receive(
        &mut self,
        msg: DataMessage,
        methods: &mut MethodTracker,
        collections: &mut CollectionSet,
        subscriptions: &mut SubscriptionRegistry,
    ) -> Option<usize> {
        methods.satisfy(msg.method_ids());
        self.buffer.push(msg);

        if !methods.is_quiescent() {
            log::trace!(
                "{} methods outstanding; {} data frames buffered",
                methods.unsatisfied_count(),
                self.buffer.len()
            );
            return None;
        }
        Some(self.reconcile(collections, subscriptions))
    }

    /// Roll back speculative writes and replay the whole buffer.
    fn reconcile(&mut self, collections: &mut CollectionSet, subscriptions: &mut SubscriptionRegistry) -> usize {
        let rolled_back = collections.rollback_all();
        let frames = std::mem::take(&mut self.buffer);
        log::debug!("reconciling {} frames ({} collections rolled back)", frames.len(), rolled_back);

        for msg in &frames {
            if let Some((name, id)) = msg.target() {
                match collections.named_mut(name) {
                    None => {
                        log::warn!("discarding data received for unknown collection {name:?}");
                        continue;
                    }
                    Some(state) => {
                        if let Err(e) = apply_patch(state.store_mut(), id, &msg.patch()) {
                            log::warn!("failed to apply server data to {name}/{id}: {e}");
                        }
                    }
                }
            }
            for sub in msg.subscription_ids() {
                subscriptions.mark_ready(sub);
            }
        }
        frames.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::SequentialIds;
    use crate::stream::Outbox;
    use livedata_store::Document;
    use serde_json::json;
    use std::cell::Cell;
    use std::rc::Rc;

    fn store_with(value: Value) -> LocalCollection {
        let mut store = LocalCollection::new();
        store.insert(value.as_object().cloned().unwrap()).unwrap();
        store
    }

    fn get(store: &LocalCollection, id: &str) -> Option<Value> {
        store.get(id).cloned().map(Value::Object)
    }

    #[test]
    fn test_patch_sequence() {
        let mut store = store_with(json!({"_id": "X", "a": 0, "b": 2}));

        let out = apply_patch(&mut store, "X", &DataPatch::new().set("a", json!(1))).unwrap();
        assert_eq!(out, PatchOutcome::Updated);
        assert_eq!(get(&store, "X"), Some(json!({"_id": "X", "a": 1, "b": 2})));

        apply_patch(&mut store, "X", &DataPatch::new().unset("b")).unwrap();
        assert_eq!(get(&store, "X"), Some(json!({"_id": "X", "a": 1})));

        let out = apply_patch(&mut store, "X", &DataPatch::new().unset("a")).unwrap();
        assert_eq!(out, PatchOutcome::Removed);
        assert_eq!(get(&store, "X"), None);
    }

    #[test]
    fn test_patch_setting_and_unsetting_last_field_removes() {
        let mut store = store_with(json!({"_id": "X", "a": 0}));
        let patch = DataPatch::new().set("a", json!(1)).unset("a");
        let out = apply_patch(&mut store, "X", &patch).unwrap();
        assert_eq!(out, PatchOutcome::Removed);
        assert_eq!(get(&store, "X"), None);
    }

    #[test]
    fn test_patch_inserts_absent_doc() {
        let mut store = LocalCollection::new();
        let out = apply_patch(&mut store, "Y", &DataPatch::new().set("n", json!(5))).unwrap();
        assert_eq!(out, PatchOutcome::Inserted);
        assert_eq!(get(&store, "Y"), Some(json!({"_id": "Y", "n": 5})));
    }

    #[test]
    fn test_patch_touching_id_fails() {
        let mut store = store_with(json!({"_id": "X", "a": 0}));
        let err = apply_patch(&mut store, "X", &DataPatch::new().set("_id", json!("Z"))).unwrap_err();
        assert_eq!(err, StoreError::ImmutableId);
    }

    struct Fixture {
        reconciler: DataReconciler,
        methods: MethodTracker,
        collections: CollectionSet,
        subs: SubscriptionRegistry,
        outbox: Outbox,
    }

    impl Fixture {
        fn new() -> Self {
            let mut collections = CollectionSet::new();
            collections.create(Some("items")).unwrap();
            Self {
                reconciler: DataReconciler::new(),
                methods: MethodTracker::new(),
                collections,
                subs: SubscriptionRegistry::new(),
                outbox: Outbox::new(),
            }
        }

        fn receive(&mut self, msg: DataMessage) -> Option<usize> {
            self.reconciler
                .receive(msg, &mut self.methods, &mut self.collections, &mut self.subs)
        }

        fn items(&mut self) -> &mut LocalCollection {
            self.collections.named_mut("items").unwrap().store_mut()
        }
    }

    #[test]
    fn test_applies_immediately_when_quiescent() {
        let mut fx = Fixture::new();
        let applied = fx.receive(DataMessage::document("items", "a", DataPatch::new().set("n", json!(1))));
        assert_eq!(applied, Some(1));
        assert!(fx.items().contains("a"));
        assert_eq!(fx.reconciler.buffered(), 0);
    }

    #[test]
    fn test_waits_for_every_outstanding_method() {
        let mut fx = Fixture::new();
        let m1 = fx.methods.issue("one", vec![], None, &mut fx.outbox);
        let m2 = fx.methods.issue("two", vec![], None, &mut fx.outbox);

        let first = DataMessage::document("items", "a", DataPatch::new().set("n", json!(1))).with_methods([m1]);
        assert_eq!(fx.receive(first), None);
        assert!(!fx.items().contains("a"));

        let second = DataMessage::document("items", "b", DataPatch::new().set("n", json!(2)));
        assert_eq!(fx.receive(second), None);
        assert_eq!(fx.reconciler.buffered(), 2);

        assert_eq!(fx.receive(DataMessage::methods_done([m2])), Some(3));
        assert!(fx.items().contains("a"));
        assert!(fx.items().contains("b"));
        assert_eq!(fx.reconciler.buffered(), 0);
    }

    #[test]
    fn test_unknown_collection_skips_only_that_frame() {
        let mut fx = Fixture::new();
        let mut ids = SequentialIds::new("s");
        let ready = Rc::new(Cell::new(false));
        let flag = ready.clone();
        let handle = fx.subs.subscribe("items", vec![], Some(Box::new(move || flag.set(true))), &mut ids, &mut fx.outbox);

        let m = fx.methods.issue("m", vec![], None, &mut fx.outbox);
        fx.receive(DataMessage::document("ghosts", "g", DataPatch::new().set("n", json!(1))));
        fx.receive(
            DataMessage::document("items", "a", DataPatch::new().set("n", json!(1)))
                .with_methods([m])
                .with_subs([handle.id().clone()]),
        );
        assert!(fx.items().contains("a"));
        assert!(ready.get());
    }

    #[test]
    fn test_rollback_then_replay() {
        let mut fx = Fixture::new();
        let state = fx.collections.named_mut("items").unwrap();
        state.store_mut().insert(json!({"_id": "d", "x": 0}).as_object().cloned().unwrap()).unwrap();

        // optimistic write through a proxy
        let handle = fx.collections.handle_of("items").unwrap();
        let mut ids = SequentialIds::new("doc");
        let mut view = crate::collection::Collection {
            state: fx.collections.get_mut(handle).unwrap(),
            methods: &mut fx.methods,
            outbox: &mut fx.outbox,
            ids: &mut ids,
        };
        view.update(&Selector::from("d"), &Modifier::new().set("x", json!(1)), &UpdateOptions::default());
        let mut extra: Document = Document::new();
        view.insert(&mut extra);
        assert_eq!(view.count(&Selector::All), 2);

        // server: x = 2, and confirms the update and insert
        fx.receive(
            DataMessage::document("items", "d", DataPatch::new().set("x", json!(2)))
                .with_methods([crate::protocol::MethodId(1), crate::protocol::MethodId(2)]),
        );
        assert_eq!(get(fx.items(), "d"), Some(json!({"_id": "d", "x": 2})));
        // the unconfirmed local insert is gone
        assert_eq!(fx.items().len(), 1);
        assert!(!fx.collections.named_mut("items").unwrap().snapshot_taken());
    }
}
