//! WebSocket driver for [`LiveClient`].
//!
//! The transport owns the socket and nothing else. Each inbound text
//! frame is one client event; after every event the outbox is flushed.
//! A frame leaves the outbox only once the socket accepted it, so
//! anything unsent when the channel drops is still there for the reset
//! hook on the next connect.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::client::LiveClient;
use crate::error::LiveDataError;
use crate::stream::ConnectionState;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A (re)connectable WebSocket channel to a livedata server.
pub struct WsTransport {
    url: String,
    socket: Option<Socket>,
}

impl WsTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            socket: None,
        }
    }

    /// Transport for the endpoint in `client`'s config.
    pub fn for_client(client: &LiveClient) -> Self {
        Self::new(client.config().url.clone())
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    /// Connection status: the client's view while a socket is open.
    pub fn status(&self, client: &LiveClient) -> ConnectionState {
        match self.socket {
            Some(_) => client.status(),
            None => ConnectionState::Disconnected,
        }
    }

    /// Open the socket, run the client's reset hook, and send the
    /// rewritten backlog.
    pub async fn connect(&mut self, client: &mut LiveClient) -> Result<(), LiveDataError> {
        let (socket, _) = connect_async(self.url.as_str()).await?;
        log::info!("channel open to {}", self.url);
        self.socket = Some(socket);
        client.reset();
        self.flush(client).await?;
        Ok(())
    }

    /// Drop the current channel, if any, and connect again.
    pub async fn reconnect(&mut self, client: &mut LiveClient) -> Result<(), LiveDataError> {
        self.close(client).await;
        self.connect(client).await
    }

    /// Run deferred client work, then send queued frames in order.
    /// Returns how many were sent. With no socket open nothing is sent
    /// and the frames stay queued.
    pub async fn flush(&mut self, client: &mut LiveClient) -> Result<usize, LiveDataError> {
        client.run_deferred();
        let Some(socket) = self.socket.as_mut() else {
            return Ok(0);
        };

        let mut sent = 0;
        while let Some(msg) = client.outbox().front() {
            let text = match msg.encode() {
                Ok(text) => text,
                Err(e) => {
                    log::warn!("dropping unencodable {} frame: {e}", msg.tag());
                    client.outbox_mut().pop_front();
                    continue;
                }
            };
            if let Err(e) = socket.send(WsMessage::Text(text.into())).await {
                log::warn!("send failed: {e}");
                self.socket = None;
                client.handle_disconnect();
                return Err(e.into());
            }
            client.outbox_mut().pop_front();
            sent += 1;
        }
        if sent > 0 {
            log::trace!("flushed {sent} frames");
        }
        Ok(sent)
    }

    /// Wait for one inbound frame, hand it to the client, and flush.
    /// Returns `false` once the channel is closed.
    pub async fn pump(&mut self, client: &mut LiveClient) -> Result<bool, LiveDataError> {
        let Some(socket) = self.socket.as_mut() else {
            return Ok(false);
        };

        let open = match socket.next().await {
            Some(Ok(WsMessage::Text(text))) => {
                client.handle_text(text.as_str());
                true
            }
            Some(Ok(WsMessage::Binary(data))) => {
                match std::str::from_utf8(&data) {
                    Ok(text) => client.handle_text(text),
                    Err(_) => log::warn!("discarding non-UTF-8 binary frame ({} bytes)", data.len()),
                }
                true
            }
            Some(Ok(WsMessage::Close(_))) | None => false,
            Some(Ok(_)) => true,
            Some(Err(e)) => {
                log::warn!("receive failed: {e}");
                false
            }
        };

        if !open {
            self.socket = None;
            client.handle_disconnect();
            return Ok(false);
        }
        self.flush(client).await?;
        Ok(true)
    }

    /// Pump until `done` holds or the channel closes. Returns whether
    /// `done` was reached.
    pub async fn pump_until<F>(&mut self, client: &mut LiveClient, mut done: F) -> Result<bool, LiveDataError>
    where
        F: FnMut(&LiveClient) -> bool,
    {
        while !done(client) {
            if !self.pump(client).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Close the socket. Queued frames are kept.
    pub async fn close(&mut self, client: &mut LiveClient) {
        if let Some(mut socket) = self.socket.take() {
            if let Err(e) = socket.close(None).await {
                log::debug!("close: {e}");
            }
        }
        client.handle_disconnect();
    }
}
