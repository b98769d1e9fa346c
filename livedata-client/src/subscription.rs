//! Reference-counted subscription registry.
//!
//! The registry is itself a local-only document collection, one document
//! per distinct `(name, args)`:
//!
//! ```text
//! { _id: <sub id>, name: "todos", args: ["inbox"], count: 2 }
//! ```
//!
//! Wire traffic is a side effect of observing that collection, never of
//! the API call itself:
//!
//! ```text
//!  subscribe ──► insert ──► Added   ──► sub frame
//!            └─► count+1
//!  stop ───────► count-1 ──► Changed ──► (count ≤ 0) schedule removal
//!  sweep ──────► remove  ──► Removed ──► unsub frame
//! ```
//!
//! Removal is never performed while a change is being observed. It is
//! queued and carried out by [`SubscriptionRegistry::sweep`] on the next
//! loop turn, after re-checking that nobody re-subscribed meanwhile.

use std::cell::Cell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use livedata_store::{
    document_id, Change, Document, FindOptions, LocalCollection, Modifier, Selector, UpdateOptions,
};
use serde_json::{json, Value};

use crate::ids::IdGenerator;
use crate::protocol::{Message, SubscriptionId};
use crate::stream::Outbox;

/// Called once when a subscription's initial data has landed.
pub type ReadyCallback = Box<dyn FnOnce()>;

/// One caller's interest in a subscription.
///
/// Clones share the stopped flag, so stopping any clone stops them all.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    stopped: Rc<Cell<bool>>,
}

impl SubscriptionHandle {
    fn new(id: SubscriptionId) -> Self {
        Self {
            id,
            stopped: Rc::new(Cell::new(false)),
        }
    }

    pub fn id(&self) -> &SubscriptionId {
        &self.id
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.get()
    }
}

/// A live registry entry.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionEntry {
    pub id: SubscriptionId,
    pub name: String,
    pub args: Vec<Value>,
    pub count: i64,
}

impl SubscriptionEntry {
    fn from_doc(doc: &Document) -> Option<Self> {
        Some(Self {
            id: SubscriptionId(document_id(doc)?.to_string()),
            name: doc.get("name")?.as_str()?.to_string(),
            args: doc.get("args").and_then(Value::as_array).cloned().unwrap_or_default(),
            count: doc.get("count").and_then(Value::as_i64).unwrap_or(0),
        })
    }

    fn sub_frame(&self) -> Message {
        Message::Sub {
            id: self.id.clone(),
            name: self.name.clone(),
            params: self.args.clone(),
        }
    }
}

/// Subscriptions keyed by `(name, args)`, plus their ready callbacks.
pub struct SubscriptionRegistry {
    subs: LocalCollection,
    /// Present while not ready; removed once a data frame marks it ready.
    ready_callbacks: HashMap<SubscriptionId, Vec<ReadyCallback>>,
    /// Entries whose count hit zero, awaiting the next sweep.
    doomed: VecDeque<SubscriptionId>,
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            subs: LocalCollection::observed(),
            ready_callbacks: HashMap::new(),
            doomed: VecDeque::new(),
        }
    }

    fn key(name: &str, args: &[Value]) -> Selector {
        Selector::fields([("name", json!(name)), ("args", Value::Array(args.to_vec()))])
    }

    fn bump(&mut self, id: &SubscriptionId, by: i64) -> usize {
        let modifier = Modifier::new().inc("count", by);
        match self.subs.update(&Selector::Id(id.0.clone()), &modifier, &UpdateOptions::default()) {
            Ok(n) => n,
            Err(e) => {
                log::warn!("failed to adjust subscription {id}: {e}");
                0
            }
        }
    }

    /// Register interest in `(name, args)`.
    ///
    /// Reuses an existing entry if there is one. `callback` runs right away
    /// if that entry is already ready, otherwise when it becomes ready.
    pub fn subscribe(
        &mut self,
        name: &str,
        args: Vec<Value>,
        callback: Option<ReadyCallback>,
        ids: &mut dyn IdGenerator,
        outbox: &mut Outbox,
    ) -> SubscriptionHandle {
        let existing = self
            .subs
            .find_one(&Self::key(name, &args), &FindOptions::default())
            .and_then(|doc| SubscriptionEntry::from_doc(&doc));

        let id = match existing {
            Some(entry) => {
                self.bump(&entry.id, 1);
                if let Some(callback) = callback {
                    match self.ready_callbacks.get_mut(&entry.id) {
                        Some(queue) => queue.push(callback),
                        None => callback(),
                    }
                }
                entry.id
            }
            None => {
                let id = SubscriptionId(ids.next_id());
                let doc = json!({"_id": id.0, "name": name, "args": args, "count": 1});
                if let Some(doc) = livedata_store::into_document(doc) {
                    if let Err(e) = self.subs.insert(doc) {
                        log::warn!("failed to register subscription {name}: {e}");
                    }
                }
                self.ready_callbacks.insert(id.clone(), callback.into_iter().collect());
                id
            }
        };

        self.observe(outbox);
        SubscriptionHandle::new(id)
    }

    /// Drop one reference. Repeated or late calls do nothing.
    pub fn release(&mut self, handle: &SubscriptionHandle, outbox: &mut Outbox) {
        if handle.stopped.replace(true) {
            return;
        }
        if self.bump(&handle.id, -1) == 0 {
            log::debug!("stop on removed subscription {}", handle.id);
        }
        self.observe(outbox);
    }

    /// Translate recorded registry changes into frames and removals.
    fn observe(&mut self, outbox: &mut Outbox) {
        for change in self.subs.drain_changes() {
            match change {
                Change::Added(doc) => {
                    if let Some(entry) = SubscriptionEntry::from_doc(&doc) {
                        log::debug!("subscribe {} ({})", entry.name, entry.id);
                        outbox.push(entry.sub_frame());
                    }
                }
                Change::Changed { new, .. } => {
                    let Some(entry) = SubscriptionEntry::from_doc(&new) else { continue };
                    if entry.count <= 0 && !self.doomed.contains(&entry.id) {
                        self.doomed.push_back(entry.id);
                    }
                }
                Change::Removed(doc) => {
                    if let Some(id) = document_id(&doc) {
                        let id = SubscriptionId(id.to_string());
                        log::debug!("unsubscribe {id}");
                        self.ready_callbacks.remove(&id);
                        outbox.push(Message::Unsub { id });
                    }
                }
            }
        }
    }

    /// Remove entries scheduled for removal whose count is still ≤ 0.
    /// Returns how many were removed.
    pub fn sweep(&mut self, outbox: &mut Outbox) -> usize {
        let mut removed = 0;
        while let Some(id) = self.doomed.pop_front() {
            let still_dead = self
                .subs
                .get(id.as_str())
                .and_then(SubscriptionEntry::from_doc)
                .is_some_and(|entry| entry.count <= 0);
            if still_dead {
                removed += self.subs.remove(&Selector::Id(id.0));
            }
        }
        self.observe(outbox);
        removed
    }

    pub fn has_pending_removals(&self) -> bool {
        !self.doomed.is_empty()
    }

    /// Fire and forget the ready callbacks of `id`; it is ready from now on.
    pub fn mark_ready(&mut self, id: &SubscriptionId) {
        if let Some(callbacks) = self.ready_callbacks.remove(id) {
            log::debug!("subscription {id} ready");
            for callback in callbacks {
                callback();
            }
        }
    }

    /// The server refused or ended `id`. Queued callbacks are dropped
    /// unrun; the entry stays not-ready. Returns how many were dropped.
    pub fn reject(&mut self, id: &SubscriptionId) -> usize {
        match self.ready_callbacks.get_mut(id) {
            Some(queue) => std::mem::take(queue).len(),
            None => 0,
        }
    }

    pub fn is_ready(&self, id: &SubscriptionId) -> bool {
        self.subs.contains(id.as_str()) && !self.ready_callbacks.contains_key(id)
    }

    /// Current refcount of `(name, args)`, if registered.
    pub fn count(&self, name: &str, args: &[Value]) -> Option<i64> {
        self.subs
            .find_one(&Self::key(name, args), &FindOptions::default())
            .and_then(|doc| SubscriptionEntry::from_doc(&doc))
            .map(|entry| entry.count)
    }

    /// Every entry, in registration order.
    pub fn entries(&self) -> Vec<SubscriptionEntry> {
        self.subs.iter().filter_map(SubscriptionEntry::from_doc).collect()
    }

    /// `sub` frames for every entry with a positive count, in order.
    pub fn resubscribe_frames(&self) -> Vec<Message> {
        self.entries()
            .into_iter()
            .filter(|entry| entry.count > 0)
            .map(|entry| entry.sub_frame())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.subs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::SequentialIds;
    use std::cell::RefCell;

    fn setup() -> (SubscriptionRegistry, SequentialIds, Outbox) {
        (SubscriptionRegistry::new(), SequentialIds::new("sub"), Outbox::new())
    }

    fn tags(outbox: &mut Outbox) -> Vec<&'static str> {
        outbox.drain().iter().map(Message::tag).collect()
    }

    #[test]
    fn test_dedup_by_name_and_args() {
        let (mut reg, mut ids, mut outbox) = setup();
        let a = reg.subscribe("todos", vec![json!("inbox")], None, &mut ids, &mut outbox);
        let b = reg.subscribe("todos", vec![json!("inbox")], None, &mut ids, &mut outbox);
        let c = reg.subscribe("todos", vec![json!("archive")], None, &mut ids, &mut outbox);

        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), c.id());
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.count("todos", &[json!("inbox")]), Some(2));
        assert_eq!(tags(&mut outbox), vec!["sub", "sub"]);
    }

    #[test]
    fn test_unsub_only_after_last_stop_and_sweep() {
        let (mut reg, mut ids, mut outbox) = setup();
        let a = reg.subscribe("todos", vec![], None, &mut ids, &mut outbox);
        let b = reg.subscribe("todos", vec![], None, &mut ids, &mut outbox);
        outbox.clear();

        reg.release(&a, &mut outbox);
        assert_eq!(reg.sweep(&mut outbox), 0);
        assert!(outbox.is_empty());

        reg.release(&b, &mut outbox);
        // deferred: nothing until the sweep
        assert!(outbox.is_empty());
        assert!(reg.has_pending_removals());
        assert_eq!(reg.sweep(&mut outbox), 1);
        assert_eq!(
            outbox.drain(),
            vec![Message::Unsub { id: a.id().clone() }]
        );
        assert!(reg.is_empty());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (mut reg, mut ids, mut outbox) = setup();
        let a = reg.subscribe("todos", vec![], None, &mut ids, &mut outbox);
        let b = reg.subscribe("todos", vec![], None, &mut ids, &mut outbox);
        reg.release(&a, &mut outbox);
        reg.release(&a, &mut outbox);
        assert_eq!(reg.count("todos", &[]), Some(1));
        assert!(a.is_stopped());
        assert!(!b.is_stopped());

        reg.release(&b, &mut outbox);
        reg.sweep(&mut outbox);
        // late stop on a removed entry
        let clone = b.clone();
        reg.release(&clone, &mut outbox);
        assert_eq!(reg.count("todos", &[]), None);
    }

    #[test]
    fn test_resubscribe_before_sweep_keeps_entry() {
        let (mut reg, mut ids, mut outbox) = setup();
        let a = reg.subscribe("todos", vec![], None, &mut ids, &mut outbox);
        reg.release(&a, &mut outbox);
        let b = reg.subscribe("todos", vec![], None, &mut ids, &mut outbox);
        outbox.clear();

        assert_eq!(reg.sweep(&mut outbox), 0);
        assert!(outbox.is_empty());
        assert_eq!(a.id(), b.id());
        assert_eq!(reg.count("todos", &[]), Some(1));
    }

    #[test]
    fn test_ready_callbacks() {
        let (mut reg, mut ids, mut outbox) = setup();
        let fired = Rc::new(RefCell::new(Vec::new()));

        let log1 = fired.clone();
        let a = reg.subscribe("todos", vec![], Some(Box::new(move || log1.borrow_mut().push(1))), &mut ids, &mut outbox);
        let log2 = fired.clone();
        reg.subscribe("todos", vec![], Some(Box::new(move || log2.borrow_mut().push(2))), &mut ids, &mut outbox);
        assert!(fired.borrow().is_empty());
        assert!(!reg.is_ready(a.id()));

        reg.mark_ready(a.id());
        assert_eq!(*fired.borrow(), vec![1, 2]);
        assert!(reg.is_ready(a.id()));

        // already ready: immediate
        let log3 = fired.clone();
        reg.subscribe("todos", vec![], Some(Box::new(move || log3.borrow_mut().push(3))), &mut ids, &mut outbox);
        assert_eq!(*fired.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn test_reject_drops_callbacks() {
        let (mut reg, mut ids, mut outbox) = setup();
        let fired = Rc::new(Cell::new(false));
        let flag = fired.clone();
        let a = reg.subscribe("secret", vec![], Some(Box::new(move || flag.set(true))), &mut ids, &mut outbox);

        assert_eq!(reg.reject(a.id()), 1);
        reg.mark_ready(a.id());
        assert!(!fired.get());
    }

    #[test]
    fn test_resubscribe_frames_skip_dead_entries() {
        let (mut reg, mut ids, mut outbox) = setup();
        let a = reg.subscribe("a", vec![json!(1)], None, &mut ids, &mut outbox);
        reg.subscribe("b", vec![], None, &mut ids, &mut outbox);
        reg.release(&a, &mut outbox);

        let frames = reg.resubscribe_frames();
        assert_eq!(frames.len(), 1);
        assert!(matches!(&frames[0], Message::Sub { name, .. } if name == "b"));
    }
}
