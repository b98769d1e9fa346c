//! Outbound frame backlog and connection status.
//!
//! The client never writes to a socket directly. Every outbound frame is
//! appended to the [`Outbox`]; the transport drains it while connected.
//! Whatever is still queued when the channel (re)establishes is handed to
//! the reset hook, which rewrites it before anything is sent.

use std::collections::VecDeque;

use crate::protocol::Message;

/// Connection status as seen by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    /// Channel open, `connect` queued, waiting for `connected`.
    Connecting,
    Connected,
}

/// FIFO of frames waiting to be written to the transport.
#[derive(Debug, Default)]
pub struct Outbox {
    queue: VecDeque<Message>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a frame behind everything already waiting.
    pub fn push(&mut self, msg: Message) {
        log::trace!("queue {} frame", msg.tag());
        self.queue.push_back(msg);
    }

    /// Next frame to send, left in place until [`pop_front`](Self::pop_front).
    pub fn front(&self) -> Option<&Message> {
        self.queue.front()
    }

    pub fn pop_front(&mut self) -> Option<Message> {
        self.queue.pop_front()
    }

    /// Take the whole backlog.
    pub fn drain(&mut self) -> Vec<Message> {
        self.queue.drain(..).collect()
    }

    /// Replace the backlog wholesale.
    pub fn replace(&mut self, frames: Vec<Message>) {
        self.queue = frames.into();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.queue.iter()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}
