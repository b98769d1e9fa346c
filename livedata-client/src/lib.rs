//! # livedata-client: client half of a livedata sync protocol
//!
//! Keeps local document caches in sync with a server over a message
//! channel, with optimistic local writes that are rolled back and
//! replayed once the server's authoritative data arrives.
//!
//! ## Architecture
//!
//! ```text
//!                        ┌──────────────────────────────────┐
//!  app ── subscribe ───► │            LiveClient            │
//!      ── call ────────► │  ┌────────────┐  ┌─────────────┐ │
//!      ── insert/... ──► │  │ Subscription│  │   Method    │ │
//!                        │  │  Registry   │  │  Tracker    │ │
//!                        │  └─────┬──────┘  └──────┬──────┘ │
//!                        │        ▼                ▼        │
//!                        │     ┌──────────────────────┐     │      WebSocket
//!                        │     │        Outbox        │ ────┼──► WsTransport ──► server
//!                        │     └──────────────────────┘     │          │
//!                        │  ┌──────────────┐                │          │
//!                        │  │ DataReconciler│ ◄─────────────┼── data ──┘
//!                        │  └──────┬───────┘                │
//!                        │         ▼                        │
//!                        │  CollectionSet (LocalCollection) │
//!                        └──────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: JSON wire frames tagged by `msg`
//! - [`client`]: the [`LiveClient`] engine and its reset protocol
//! - [`subscription`]: refcounted subscriptions with deferred `unsub`
//! - [`methods`]: method ids, result callbacks, quiescence
//! - [`reconcile`]: quiescence-gated rollback and replay
//! - [`collection`]: optimistic collection proxies
//! - [`autosubscribe`]: reactive subscription sets
//! - [`transport`]: tokio WebSocket driver

pub mod autosubscribe;
pub mod client;
pub mod collection;
pub mod config;
pub mod error;
pub mod ids;
pub mod methods;
pub mod protocol;
pub mod reconcile;
pub mod stream;
pub mod subscription;
pub mod transport;

// Re-exports for convenience
pub use autosubscribe::{AutosubscriptionId, Capture};
pub use client::{LiveClient, LiveEvent};
pub use collection::{Collection, CollectionHandle};
pub use config::ClientConfig;
pub use error::LiveDataError;
pub use ids::{IdGenerator, RandomIds, SequentialIds};
pub use methods::{MethodContext, MethodHandler, ResultCallback};
pub use protocol::{
    DataMessage, DataPatch, Message, MethodId, ProtocolError, RemoteError, ResultMessage, SubscriptionId,
};
pub use stream::{ConnectionState, Outbox};
pub use subscription::{SubscriptionEntry, SubscriptionHandle};
pub use transport::WsTransport;

pub use livedata_store::{Document, FindOptions, Modifier, Selector, SortOrder, UpdateOptions};
