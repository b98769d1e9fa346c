//! Reactive subscription sets.
//!
//! An autosubscribe body runs with an explicit [`Capture`] context; every
//! subscription the client takes while it runs is remembered. When the surrounding
//! reactive computation is invalidated, the body runs again first and the
//! previously captured subscriptions are stopped only afterwards, so a
//! subscription that is still wanted never drops to zero references and
//! its data never flickers out.

use serde_json::Value;

use crate::client::LiveClient;
use crate::subscription::SubscriptionHandle;

/// Identifies one autosubscribe registration on a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AutosubscriptionId(pub u64);

/// Body of an autosubscribe registration.
pub type AutosubscribeBody = Box<dyn FnMut(&mut Capture<'_>)>;

pub(crate) struct Autosubscription {
    /// `None` while the body is running.
    pub(crate) body: Option<AutosubscribeBody>,
    pub(crate) tokens: Vec<SubscriptionHandle>,
}

/// Capture context handed to an autosubscribe body.
///
/// Every subscription the client takes while the body runs is captured,
/// whether it goes through this context or through [`Capture::client`].
pub struct Capture<'a> {
    pub(crate) client: &'a mut LiveClient,
}

impl Capture<'_> {
    pub fn subscribe(&mut self, name: &str, args: Vec<Value>) -> SubscriptionHandle {
        self.client.subscribe(name, args)
    }

    /// Subscribe with a ready callback.
    pub fn subscribe_with<F>(&mut self, name: &str, args: Vec<Value>, on_ready: F) -> SubscriptionHandle
    where
        F: FnOnce() + 'static,
    {
        self.client.subscribe_with(name, args, on_ready)
    }

    /// The client itself, for helpers that take `&mut LiveClient`.
    pub fn client(&mut self) -> &mut LiveClient {
        self.client
    }
}
