//! WebSocket push channel subscriber.
//!
//! A [`PushSocket`] is a single WebSocket connection to the inventory
//! server's push endpoint. Channels are joined with
//! [`subscribe`](PushSocket::subscribe) and frames are drained with
//! [`next_frame`](PushSocket::next_frame).
//!
//! The socket models one connection only. Reconnect policy (backoff,
//! resubscription after a drop) belongs to the application, which knows
//! which channels should currently be live.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use crate::objects::push::{WsClientFrame, WsServerFrame};

/// Errors produced by the push socket.
#[derive(Debug, thiserror::Error)]
pub enum PushSocketError {
    /// Transport-level failure (connect, send, receive).
    #[error("websocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    /// A text frame could not be parsed as a server frame.
    #[error("invalid frame: {0}")]
    InvalidFrame(#[from] serde_json::Error),
}

/// One live WebSocket connection to the push endpoint.
pub struct PushSocket {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl PushSocket {
    /// Connect to the push endpoint.
    pub async fn connect(ws_url: &Url) -> Result<Self, PushSocketError> {
        let (stream, _response) = connect_async(ws_url.as_str()).await?;
        Ok(Self { stream })
    }

    /// Join a channel.
    pub async fn subscribe(&mut self, channel: &str) -> Result<(), PushSocketError> {
        self.send_frame(&WsClientFrame::Subscribe {
            channel: channel.into(),
        })
        .await
    }

    /// Leave a channel.
    pub async fn unsubscribe(&mut self, channel: &str) -> Result<(), PushSocketError> {
        self.send_frame(&WsClientFrame::Unsubscribe {
            channel: channel.into(),
        })
        .await
    }

    /// Receive the next server frame.
    ///
    /// Returns `Ok(None)` when the server closed the connection. Ping/pong
    /// and binary frames are skipped; only text frames carry the protocol.
    pub async fn next_frame(&mut self) -> Result<Option<WsServerFrame>, PushSocketError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(serde_json::from_str(&text)?));
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    /// Send a close frame and drop the connection.
    pub async fn close(mut self) -> Result<(), PushSocketError> {
        self.stream.close(None).await?;
        Ok(())
    }

    async fn send_frame(&mut self, frame: &WsClientFrame) -> Result<(), PushSocketError> {
        let json = serde_json::to_string(frame)?;
        self.stream.send(Message::Text(json.into())).await?;
        Ok(())
    }
}
