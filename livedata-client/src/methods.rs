//! Remote method invocation tracking.
//!
//! Each outgoing call gets the next ascending [`MethodId`]. The id is
//! tracked twice:
//!
//! - **pending** until its `result` frame arrives (callback fired), and
//! - **unsatisfied** until a `data` frame lists it in `methods`, meaning
//!   the server's writes for that call are in the data stream.
//!
//! Reconciliation waits for the unsatisfied set to drain. Neither set
//! times out.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde_json::Value;

use crate::error::LiveDataError;
use crate::protocol::{Message, MethodId, RemoteError, ResultMessage};
use crate::stream::Outbox;

/// Completion callback of a remote call.
pub type ResultCallback = Box<dyn FnOnce(Result<Option<Value>, RemoteError>)>;

/// Local simulation of a method, run for its optimistic return value.
pub type MethodHandler = Box<dyn Fn(&MethodContext<'_>, &[Value]) -> Value>;

/// What a local method handler knows about its invocation.
#[derive(Debug, Clone, Copy)]
pub struct MethodContext<'a> {
    pub method: &'a str,
    /// Identity of the calling user, if configured.
    pub user_id: Option<&'a str>,
}

/// Pending/unsatisfied bookkeeping plus local handlers.
pub struct MethodTracker {
    next_id: u64,
    pending: BTreeMap<MethodId, ResultCallback>,
    unsatisfied: BTreeSet<MethodId>,
    handlers: HashMap<String, MethodHandler>,
}

impl Default for MethodTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl MethodTracker {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            pending: BTreeMap::new(),
            unsatisfied: BTreeSet::new(),
            handlers: HashMap::new(),
        }
    }

    /// Register a local handler. Names are unique.
    pub fn register<F>(&mut self, name: impl Into<String>, handler: F) -> Result<(), LiveDataError>
    where
        F: Fn(&MethodContext<'_>, &[Value]) -> Value + 'static,
    {
        let name = name.into();
        if self.handlers.contains_key(&name) {
            return Err(LiveDataError::DuplicateMethod(name));
        }
        self.handlers.insert(name, Box::new(handler));
        Ok(())
    }

    /// Run the local handler for `name`, if one exists.
    pub fn simulate(&self, name: &str, user_id: Option<&str>, args: &[Value]) -> Option<Value> {
        let handler = self.handlers.get(name)?;
        let cx = MethodContext { method: name, user_id };
        Some(handler(&cx, args))
    }

    /// Allocate an id, remember `callback`, and queue the `method` frame.
    pub fn issue(
        &mut self,
        name: impl Into<String>,
        params: Vec<Value>,
        callback: Option<ResultCallback>,
        outbox: &mut Outbox,
    ) -> MethodId {
        let id = MethodId(self.next_id);
        self.next_id += 1;
        self.pending.insert(id, callback.unwrap_or_else(|| Box::new(|_| {})));
        self.unsatisfied.insert(id);
        outbox.push(Message::Method {
            method: name.into(),
            params,
            id,
        });
        id
    }

    /// Consume a `result` frame. Returns `false` if the id was unknown.
    pub fn complete(&mut self, msg: ResultMessage) -> bool {
        let Some(callback) = self.pending.remove(&msg.id) else {
            log::warn!("discarding result for unknown method id {}", msg.id);
            return false;
        };
        log::debug!("method {} resolved", msg.id);
        callback(msg.into_outcome());
        true
    }

    /// Mark `ids` as reflected in the data stream.
    pub fn satisfy(&mut self, ids: &[MethodId]) {
        for id in ids {
            self.unsatisfied.remove(id);
        }
    }

    /// No call issued by this client is waiting on its data.
    pub fn is_quiescent(&self) -> bool {
        self.unsatisfied.is_empty()
    }

    pub fn is_pending(&self, id: MethodId) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn unsatisfied_count(&self) -> usize {
        self.unsatisfied.len()
    }
}
