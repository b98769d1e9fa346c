//! The livedata client engine.
//!
//! [`LiveClient`] is a synchronous state machine. It never touches a
//! socket: outbound frames go to its [`Outbox`], inbound frames are fed to
//! [`LiveClient::handle_text`] / [`LiveClient::handle_message`] by a
//! driver such as [`WsTransport`](crate::WsTransport). Every public call
//! and every inbound frame is one event; deferred work queued during an
//! event runs in [`LiveClient::run_deferred`], which the driver calls
//! after each event and before each flush.

use std::collections::{BTreeMap, VecDeque};

use serde_json::Value;

use crate::autosubscribe::{Autosubscription, AutosubscriptionId, Capture};
use crate::collection::{Collection, CollectionHandle, CollectionSet};
use crate::config::ClientConfig;
use crate::error::LiveDataError;
use crate::ids::{IdGenerator, RandomIds};
use crate::methods::{MethodHandler, MethodTracker, ResultCallback};
use crate::protocol::{Message, RemoteError, SubscriptionId};
use crate::reconcile::DataReconciler;
use crate::stream::{ConnectionState, Outbox};
use crate::subscription::{ReadyCallback, SubscriptionEntry, SubscriptionHandle, SubscriptionRegistry};

/// Oldest events are dropped beyond this many unpolled ones.
const MAX_PENDING_EVENTS: usize = 1024;

/// Events surfaced to the application.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    /// The server acknowledged `connect`.
    Connected,
    /// The channel dropped.
    Disconnected,
    /// Buffered data frames were applied after quiescence.
    Reconciled { frames: usize },
    /// The server refused or terminated a subscription.
    NoSub {
        id: SubscriptionId,
        error: Option<Value>,
    },
}

/// One logical connection to a livedata server.
pub struct LiveClient {
    config: ClientConfig,
    ids: Box<dyn IdGenerator>,
    state: ConnectionState,
    outbox: Outbox,
    methods: MethodTracker,
    reconciler: DataReconciler,
    subscriptions: SubscriptionRegistry,
    collections: CollectionSet,
    autosubs: BTreeMap<AutosubscriptionId, Autosubscription>,
    next_autosub: u64,
    /// Handles taken by the autosubscribe body currently running.
    capture: Option<Vec<SubscriptionHandle>>,
    events: VecDeque<LiveEvent>,
}

impl LiveClient {
    /// Client with random ids. Nothing is sent until a driver calls
    /// [`reset`](Self::reset) on a fresh channel.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_id_generator(config, Box::new(RandomIds))
    }

    /// Client drawing document and subscription ids from `ids`.
    pub fn with_id_generator(config: ClientConfig, ids: Box<dyn IdGenerator>) -> Self {
        Self {
            config,
            ids,
            state: ConnectionState::Disconnected,
            outbox: Outbox::new(),
            methods: MethodTracker::new(),
            reconciler: DataReconciler::new(),
            subscriptions: SubscriptionRegistry::new(),
            collections: CollectionSet::new(),
            autosubs: BTreeMap::new(),
            next_autosub: 1,
            capture: None,
            events: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Identity passed to local method handlers.
    pub fn set_user_id(&mut self, user_id: Option<String>) {
        self.config.user_id = user_id;
    }

    /// Current connection state, as last set by `reset`, a `connected`
    /// frame or [`handle_disconnect`](Self::handle_disconnect).
    pub fn status(&self) -> ConnectionState {
        self.state
    }

    /// `true` once the server has acknowledged `connect`.
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Frames waiting to be sent.
    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn outbox_mut(&mut self) -> &mut Outbox {
        &mut self.outbox
    }

    // ── collections ──────────────────────────────────────────

    /// Create a collection. `Some(name)` mirrors the server collection of
    /// that name; `None` is a local scratch collection.
    pub fn create_collection(&mut self, name: Option<&str>) -> Result<CollectionHandle, LiveDataError> {
        let handle = self.collections.create(name)?;
        log::debug!("created collection {}", name.unwrap_or("<local>"));
        Ok(handle)
    }

    /// Borrow a read/write view of a collection. Writes through it are
    /// applied locally and sent as methods for server-backed collections.
    pub fn collection(&mut self, handle: CollectionHandle) -> Option<Collection<'_>> {
        let state = self.collections.get_mut(handle)?;
        Some(Collection {
            state,
            methods: &mut self.methods,
            outbox: &mut self.outbox,
            ids: &mut *self.ids,
        })
    }

    /// View of the server-backed collection `name`.
    pub fn collection_by_name(&mut self, name: &str) -> Option<Collection<'_>> {
        let handle = self.collections.handle_of(name)?;
        self.collection(handle)
    }

    // ── subscriptions ────────────────────────────────────────

    /// Subscribe to `name(args)`. Identical subscriptions share one entry
    /// and one `sub` frame; each call returns its own handle.
    pub fn subscribe(&mut self, name: &str, args: Vec<Value>) -> SubscriptionHandle {
        self.subscribe_opt(name, args, None)
    }

    /// Subscribe; `on_ready` runs once the initial data has landed, or
    /// immediately if this `(name, args)` is already ready.
    pub fn subscribe_with<F>(&mut self, name: &str, args: Vec<Value>, on_ready: F) -> SubscriptionHandle
    where
        F: FnOnce() + 'static,
    {
        self.subscribe_opt(name, args, Some(Box::new(on_ready)))
    }

    fn subscribe_opt(&mut self, name: &str, args: Vec<Value>, on_ready: Option<ReadyCallback>) -> SubscriptionHandle {
        let handle = self
            .subscriptions
            .subscribe(name, args, on_ready, &mut *self.ids, &mut self.outbox);
        if let Some(captured) = self.capture.as_mut() {
            captured.push(handle.clone());
        }
        handle
    }

    /// Stop one handle. The `unsub` frame, if this was the last
    /// reference, is sent by the next [`run_deferred`](Self::run_deferred).
    pub fn unsubscribe(&mut self, handle: &SubscriptionHandle) {
        self.subscriptions.release(handle, &mut self.outbox);
    }

    /// Whether the server has reported `id`'s initial data complete.
    pub fn is_ready(&self, id: &SubscriptionId) -> bool {
        self.subscriptions.is_ready(id)
    }

    /// Live handles on `(name, args)`, or `None` once its entry is gone.
    pub fn subscription_count(&self, name: &str, args: &[Value]) -> Option<i64> {
        self.subscriptions.count(name, args)
    }

    pub fn active_subscriptions(&self) -> Vec<SubscriptionEntry> {
        self.subscriptions.entries()
    }

    // ── autosubscribe ────────────────────────────────────────

    /// Run `body` now, capturing every subscription taken while it runs.
    /// Calling this from inside a body is an error.
    pub fn autosubscribe<F>(&mut self, body: F) -> Result<AutosubscriptionId, LiveDataError>
    where
        F: FnMut(&mut Capture<'_>) + 'static,
    {
        if self.capture.is_some() {
            return Err(LiveDataError::NestedCapture);
        }
        let mut body: Box<dyn FnMut(&mut Capture<'_>)> = Box::new(body);
        let tokens = self.run_capture(&mut *body);

        let id = AutosubscriptionId(self.next_autosub);
        self.next_autosub += 1;
        log::debug!("autosubscription {} captured {} subscriptions", id.0, tokens.len());
        self.autosubs.insert(
            id,
            Autosubscription {
                body: Some(body),
                tokens,
            },
        );
        Ok(id)
    }

    /// The inputs of autosubscription `id` changed: run its body again,
    /// then stop what the previous run captured.
    pub fn invalidate(&mut self, id: AutosubscriptionId) -> Result<(), LiveDataError> {
        if self.capture.is_some() {
            return Err(LiveDataError::NestedCapture);
        }
        let mut body = self
            .autosubs
            .get_mut(&id)
            .and_then(|entry| entry.body.take())
            .ok_or(LiveDataError::UnknownAutosubscription(id.0))?;

        let fresh = self.run_capture(&mut *body);

        let stale = match self.autosubs.get_mut(&id) {
            Some(entry) => {
                entry.body = Some(body);
                std::mem::replace(&mut entry.tokens, fresh)
            }
            // stopped from inside its own body
            None => fresh,
        };
        for token in &stale {
            self.unsubscribe(token);
        }
        Ok(())
    }

    /// Stop everything the latest run captured and forget the body.
    pub fn stop_autosubscribe(&mut self, id: AutosubscriptionId) -> Result<(), LiveDataError> {
        let entry = self
            .autosubs
            .remove(&id)
            .ok_or(LiveDataError::UnknownAutosubscription(id.0))?;
        for token in &entry.tokens {
            self.unsubscribe(token);
        }
        Ok(())
    }

    fn run_capture(&mut self, body: &mut dyn FnMut(&mut Capture<'_>)) -> Vec<SubscriptionHandle> {
        self.capture = Some(Vec::new());
        body(&mut Capture { client: self });
        self.capture.take().unwrap_or_default()
    }

    // ── methods ──────────────────────────────────────────────

    /// Register a local simulation for `name`.
    pub fn register_method<F>(&mut self, name: impl Into<String>, handler: F) -> Result<(), LiveDataError>
    where
        F: Fn(&crate::methods::MethodContext<'_>, &[Value]) -> Value + 'static,
    {
        self.methods.register(name, handler)
    }

    /// Register several handlers; stops at the first duplicate.
    pub fn register_methods(
        &mut self,
        handlers: impl IntoIterator<Item = (String, MethodHandler)>,
    ) -> Result<(), LiveDataError> {
        for (name, handler) in handlers {
            self.methods.register(name, handler)?;
        }
        Ok(())
    }

    /// Call `name` without a completion callback.
    pub fn call(&mut self, name: &str, args: Vec<Value>) -> Option<Value> {
        self.apply(name, args, None)
    }

    /// Call `name`; `callback` receives the server's result or error.
    pub fn call_with<F>(&mut self, name: &str, args: Vec<Value>, callback: F) -> Option<Value>
    where
        F: FnOnce(Result<Option<Value>, RemoteError>) + 'static,
    {
        self.apply(name, args, Some(Box::new(callback)))
    }

    /// Run the local simulation, if any, and send the call. Returns the
    /// simulation's value; the authoritative one arrives via `callback`.
    pub fn apply(&mut self, name: &str, args: Vec<Value>, callback: Option<ResultCallback>) -> Option<Value> {
        let simulated = self
            .methods
            .simulate(name, self.config.user_id.as_deref(), &args);
        let id = self.methods.issue(name, args, callback, &mut self.outbox);
        log::debug!("call {name} as method {id}");
        simulated
    }

    pub fn pending_method_count(&self) -> usize {
        self.methods.pending_count()
    }

    pub fn unsatisfied_method_count(&self) -> usize {
        self.methods.unsatisfied_count()
    }

    /// No method is still waiting for its data to be written.
    pub fn is_quiescent(&self) -> bool {
        self.methods.is_quiescent()
    }

    /// Data frames held back until quiescence.
    pub fn buffered_data_count(&self) -> usize {
        self.reconciler.buffered()
    }

    // ── inbound ──────────────────────────────────────────────

    /// Decode and dispatch one text frame. Malformed frames are logged
    /// and dropped.
    pub fn handle_text(&mut self, text: &str) {
        match Message::decode(text) {
            Ok(msg) => self.handle_message(msg),
            Err(e) => log::warn!("discarding invalid frame: {e}"),
        }
    }

    pub fn handle_message(&mut self, msg: Message) {
        let tag = msg.tag();
        log::trace!("recv {tag} frame");
        match msg {
            Message::Connected => {
                log::info!("connected to {}", self.config.url);
                self.state = ConnectionState::Connected;
                self.emit(LiveEvent::Connected);
            }
            Message::Data(data) => {
                let applied = self.reconciler.receive(
                    data,
                    &mut self.methods,
                    &mut self.collections,
                    &mut self.subscriptions,
                );
                if let Some(frames) = applied {
                    self.emit(LiveEvent::Reconciled { frames });
                }
            }
            Message::Result(result) => {
                self.methods.complete(result);
            }
            Message::Nosub { id, error } => {
                match &error {
                    Some(e) => log::warn!("subscription {id} refused: {e}"),
                    None => log::info!("subscription {id} ended by server"),
                }
                let dropped = self.subscriptions.reject(&id);
                if dropped > 0 {
                    log::debug!("dropped {dropped} ready callbacks of {id}");
                }
                self.emit(LiveEvent::NoSub { id, error });
            }
            Message::Connect | Message::Sub { .. } | Message::Unsub { .. } | Message::Method { .. } => {
                log::warn!("discarding client-only {tag} frame from server");
            }
        }
    }

    // ── connection lifecycle ─────────────────────────────────

    /// Rewrite the outbound backlog for a fresh channel:
    /// `connect`, then the queued `method` frames, then a `sub` for every
    /// live subscription. Server-backed collections are emptied since the
    /// server will resend everything they should hold.
    pub fn rewrite_backlog(&mut self, backlog: Vec<Message>) -> Vec<Message> {
        let resubscribe = self.subscriptions.resubscribe_frames();
        let mut frames = Vec::with_capacity(backlog.len() + resubscribe.len() + 1);
        frames.push(Message::Connect);

        let queued = backlog.len();
        frames.extend(backlog.into_iter().filter(Message::is_method));
        let kept = frames.len() - 1;
        frames.extend(resubscribe);

        let cleared = self.collections.clear_server_backed();
        self.state = ConnectionState::Connecting;
        log::info!(
            "reset: kept {kept}/{queued} queued frames, resubscribing {}, cleared {cleared} cached docs",
            frames.len() - kept - 1
        );
        frames
    }

    /// Apply [`rewrite_backlog`](Self::rewrite_backlog) to the outbox.
    /// Called by the driver each time a channel opens.
    pub fn reset(&mut self) {
        self.run_deferred();
        let backlog = self.outbox.drain();
        let frames = self.rewrite_backlog(backlog);
        self.outbox.replace(frames);
    }

    /// The channel dropped.
    pub fn handle_disconnect(&mut self) {
        if self.state != ConnectionState::Disconnected {
            log::info!("disconnected from {}", self.config.url);
            self.state = ConnectionState::Disconnected;
            self.emit(LiveEvent::Disconnected);
        }
    }

    /// Run work deferred past the current event: removal of subscriptions
    /// whose count reached zero. Returns how many were removed.
    pub fn run_deferred(&mut self) -> usize {
        if !self.subscriptions.has_pending_removals() {
            return 0;
        }
        self.subscriptions.sweep(&mut self.outbox)
    }

    // ── events ───────────────────────────────────────────────

    fn emit(&mut self, event: LiveEvent) {
        if self.events.len() >= MAX_PENDING_EVENTS {
            self.events.pop_front();
            log::debug!("event queue full; dropped oldest event");
        }
        self.events.push_back(event);
    }

    /// Next unpolled event, oldest first.
    pub fn poll_event(&mut self) -> Option<LiveEvent> {
        self.events.pop_front()
    }

    pub fn drain_events(&mut self) -> Vec<LiveEvent> {
        self.events.drain(..).collect()
    }
}
