//! JSON wire protocol for livedata frames.
//!
//! Every frame is a JSON object discriminated by its `msg` field:
//! ```text
//!  client → server            server → client
//!  ───────────────            ───────────────
//!  connect                    connected
//!  sub    {id,name,params}    data   {collection?,id?,set?,unset?,methods?,subs?}
//!  unsub  {id}                result {id, result | error}
//!  method {method,params,id}  nosub  {id, error?}
//! ```

use std::collections::BTreeSet;
use std::fmt;

use livedata_store::Document;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identifier of an outgoing remote call. Allocated ascending from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MethodId(pub u64);

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a subscription. Stable across connection resets.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub String);

impl SubscriptionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubscriptionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Error payload of a failed remote call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteError {
    /// Error code (number or string, server-defined).
    #[serde(default)]
    pub error: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            Some(reason) => write!(f, "{reason} [{}]", self.error),
            None => write!(f, "remote error [{}]", self.error),
        }
    }
}

/// Outcome of a remote call as reported by a `result` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMessage {
    pub id: MethodId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteError>,
}

impl ResultMessage {
    /// Split into the value a result callback receives.
    pub fn into_outcome(self) -> Result<Option<Value>, RemoteError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.result),
        }
    }
}

/// Authoritative diff pushed by the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unset: Option<Vec<String>>,
    /// Methods whose writes are now reflected in the data stream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub methods: Option<Vec<MethodId>>,
    /// Subscriptions that became ready with this frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subs: Option<Vec<SubscriptionId>>,
}

impl DataMessage {
    /// A document diff for `collection`/`id`.
    pub fn document(collection: impl Into<String>, id: impl Into<String>, patch: DataPatch) -> Self {
        Self {
            collection: Some(collection.into()),
            id: Some(id.into()),
            set: Some(patch.set),
            unset: Some(patch.unset.into_iter().collect()),
            ..Self::default()
        }
    }

    /// A frame that only satisfies `methods`.
    pub fn methods_done(methods: impl IntoIterator<Item = MethodId>) -> Self {
        Self {
            methods: Some(methods.into_iter().collect()),
            ..Self::default()
        }
    }

    /// A frame that only marks `subs` ready.
    pub fn subs_ready(subs: impl IntoIterator<Item = SubscriptionId>) -> Self {
        Self {
            subs: Some(subs.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn with_methods(mut self, methods: impl IntoIterator<Item = MethodId>) -> Self {
        self.methods = Some(methods.into_iter().collect());
        self
    }

    pub fn with_subs(mut self, subs: impl IntoIterator<Item = SubscriptionId>) -> Self {
        self.subs = Some(subs.into_iter().collect());
        self
    }

    /// `(collection, id)` if this frame carries a document diff.
    pub fn target(&self) -> Option<(&str, &str)> {
        match (&self.collection, &self.id) {
            (Some(collection), Some(id)) => Some((collection, id)),
            _ => None,
        }
    }

    /// The typed set/unset patch carried by this frame.
    pub fn patch(&self) -> DataPatch {
        DataPatch {
            set: self.set.clone().unwrap_or_default(),
            unset: self.unset.iter().flatten().cloned().collect(),
        }
    }

    pub fn method_ids(&self) -> &[MethodId] {
        self.methods.as_deref().unwrap_or(&[])
    }

    pub fn subscription_ids(&self) -> &[SubscriptionId] {
        self.subs.as_deref().unwrap_or(&[])
    }
}

/// Field overwrites plus field deletions for one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataPatch {
    pub set: Map<String, Value>,
    pub unset: BTreeSet<String>,
}

impl DataPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: Value) -> Self {
        self.set.insert(field.into(), value);
        self
    }

    pub fn unset(mut self, field: impl Into<String>) -> Self {
        self.unset.insert(field.into());
        self
    }

    /// Whether applying this patch to `doc` would leave nothing but `_id`.
    /// `set` applies before `unset`, so a field in both ends up absent.
    pub fn empties(&self, doc: &Document) -> bool {
        doc.keys()
            .filter(|field| *field != "_id")
            .chain(self.set.keys())
            .all(|field| self.unset.contains(field))
    }
}

/// Top-level protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg", rename_all = "lowercase")]
pub enum Message {
    Connect,
    Connected,
    Sub {
        id: SubscriptionId,
        name: String,
        #[serde(default)]
        params: Vec<Value>,
    },
    Unsub {
        id: SubscriptionId,
    },
    Method {
        method: String,
        #[serde(default)]
        params: Vec<Value>,
        id: MethodId,
    },
    Result(ResultMessage),
    Data(DataMessage),
    Nosub {
        id: SubscriptionId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<Value>,
    },
}

/// Every tag the protocol knows, in either direction.
pub const KNOWN_TAGS: &[&str] = &[
    "connect", "connected", "sub", "unsub", "method", "result", "data", "nosub",
];

impl Message {
    /// The `msg` tag of this frame.
    pub fn tag(&self) -> &'static str {
        match self {
            Message::Connect => "connect",
            Message::Connected => "connected",
            Message::Sub { .. } => "sub",
            Message::Unsub { .. } => "unsub",
            Message::Method { .. } => "method",
            Message::Result(_) => "result",
            Message::Data(_) => "data",
            Message::Nosub { .. } => "nosub",
        }
    }

    pub fn is_method(&self) -> bool {
        matches!(self, Message::Method { .. })
    }

    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Parse a JSON text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Self::from_value(value)
    }

    /// Classify and parse an already-decoded JSON value.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let tag = match value.as_object().and_then(|obj| obj.get("msg")) {
            Some(Value::String(tag)) => tag.clone(),
            _ => return Err(ProtocolError::MissingTag),
        };
        if !KNOWN_TAGS.contains(&tag.as_str()) {
            return Err(ProtocolError::UnknownTag(tag));
        }
        serde_json::from_value(value).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    /// Frame is not an object or has no string `msg`.
    MissingTag,
    UnknownTag(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::MissingTag => write!(f, "Frame is not an object with a msg tag"),
            Self::UnknownTag(tag) => write!(f, "Unknown message type: {tag}"),
        }
    }
}

impl std::error::Error for ProtocolError {}
