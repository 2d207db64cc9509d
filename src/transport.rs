//! The duplex message channel a session talks over.

use async_trait::async_trait;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::protocol::{Message, Request, Response};

/// An ordered, framed, bidirectional channel of typed messages.
///
/// `recv` must be cancel-safe: a session races it against the line stream
/// while a file is being followed.
#[async_trait]
pub trait Transport: Send {
    /// Waits for the next request. `None` means the peer closed the channel
    /// in an orderly way.
    async fn recv(&mut self) -> Option<Result<Request>>;

    async fn send(&mut self, response: &Response) -> Result<()>;
}

/// [`Transport`] over an upgraded axum websocket. Requests arrive as JSON
/// text frames.
pub struct WsTransport {
    socket: WebSocket,
}

impl WsTransport {
    pub fn new(socket: WebSocket) -> Self {
        WsTransport { socket }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn recv(&mut self) -> Option<Result<Request>> {
        loop {
            let frame = match self.socket.recv().await? {
                Ok(frame) => frame,
                Err(e) => return Some(Err(Error::transport(e))),
            };

            return match frame {
                WsMessage::Text(text) => Some(Request::decode(text.as_str())),
                WsMessage::Binary(bytes) => Some(
                    std::str::from_utf8(&bytes)
                        .map_err(Error::transport)
                        .and_then(Request::decode),
                ),
                WsMessage::Close(_) => None,
                // Control frames are answered by the websocket layer itself.
                WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
            };
        }
    }

    async fn send(&mut self, response: &Response) -> Result<()> {
        let text = response.encode()?;
        self.socket
            .send(WsMessage::Text(text.into()))
            .await
            .map_err(Error::transport)
    }
}

/// In-process [`Transport`], driven by a [`Client`].
#[derive(Debug)]
pub struct ChannelTransport {
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: mpsc::UnboundedSender<String>,
}

/// The viewer end of a [`channel`] pair. Dropping it (or calling
/// [`Client::close`]) closes the session's inbound side.
#[derive(Debug)]
pub struct Client {
    outbound: Option<mpsc::UnboundedSender<String>>,
    inbound: mpsc::UnboundedReceiver<String>,
}

/// Creates a connected in-memory transport and its client.
pub fn channel() -> (ChannelTransport, Client) {
    let (to_server, from_client) = mpsc::unbounded_channel();
    let (to_client, from_server) = mpsc::unbounded_channel();

    (
        ChannelTransport {
            inbound: from_client,
            outbound: to_client,
        },
        Client {
            outbound: Some(to_server),
            inbound: from_server,
        },
    )
}

#[derive(Debug, thiserror::Error)]
#[error("channel closed")]
pub struct ChannelClosed;

#[async_trait]
impl Transport for ChannelTransport {
    async fn recv(&mut self) -> Option<Result<Request>> {
        let text = self.inbound.recv().await?;
        Some(Request::decode(&text))
    }

    async fn send(&mut self, response: &Response) -> Result<()> {
        let text = response.encode()?;
        self.outbound
            .send(text)
            .map_err(|_| Error::transport(ChannelClosed))
    }
}

impl Client {
    /// Sends a request frame.
    pub fn send(&self, message: &Message) -> Result<()> {
        let text = serde_json::to_string(message)?;
        self.send_raw(text)
    }

    /// Sends a frame verbatim, well-formed or not.
    pub fn send_raw(&self, text: impl Into<String>) -> Result<()> {
        self.outbound
            .as_ref()
            .ok_or(ChannelClosed)
            .and_then(|tx| tx.send(text.into()).map_err(|_| ChannelClosed))
            .map_err(Error::transport)
    }

    /// Waits for the next frame from the session. `None` once the session
    /// has ended.
    pub async fn recv(&mut self) -> Option<String> {
        self.inbound.recv().await
    }

    /// Closes the inbound side of the session, as a disconnecting viewer
    /// would.
    pub fn close(&mut self) {
        self.outbound.take();
    }
}
