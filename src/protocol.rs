// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2024 John C. Murray

//! WebSocket framing for the Zello control + audio protocol. `tungstenite`
//! reassembles fragmented frames into a single `Message` before handing it
//! to us, which already satisfies the accumulate-until-`EndOfMessage`
//! requirement a naive fixed-size receive buffer would miss.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;
use tungstenite::protocol::Message as WsMessage;

use crate::ZELLO_DEFAULT_URL;
use crate::error::{GatewayError, Result};
use crate::message::{IncomingMessage, Message, parse_audio_frame};

/// One decoded unit of work off the wire.
#[derive(Debug)]
pub enum WireFrame {
    /// Binary audio frame: stream id plus raw Opus payload.
    Audio { stream_id: u32, opus: Bytes },
    /// Parsed JSON control message.
    Control(IncomingMessage),
}

/// Low-level Zello WebSocket transport. Holds the socket and the outbound
/// `seq` counter; everything above the wire format lives in
/// [`crate::session::ZelloSession`].
#[derive(Debug)]
pub struct Protocol {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    sequence: u32,
}

impl Protocol {
    /// Connect to the Zello WebSocket endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Network`] if the connection fails.
    pub async fn connect(url: Option<&str>) -> Result<Self> {
        let url = url.unwrap_or(ZELLO_DEFAULT_URL);
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        Ok(Self { ws, sequence: 1 })
    }

    /// Send a control message.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Network`] if sending fails.
    pub async fn send(&mut self, message: &Message) -> Result<()> {
        let json = serde_json::to_string(message)?;
        debug!(seq = message.seq(), "sending control message: {json}");
        self.ws
            .send(WsMessage::Text(json.into()))
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        Ok(())
    }

    /// Send raw binary audio data (already framed with the 9-byte header).
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Network`] if sending fails.
    pub async fn send_audio_frame(&mut self, data: Bytes) -> Result<()> {
        self.ws
            .send(WsMessage::Binary(data.to_vec().into()))
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        Ok(())
    }

    /// Receive the next frame. Returns `Ok(None)` on a clean stream end.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Network`] on a transport error or an
    /// explicit close frame, [`GatewayError::Protocol`] if a binary frame
    /// fails to parse or a text frame isn't valid JSON.
    pub async fn receive(&mut self) -> Result<Option<WireFrame>> {
        loop {
            match self.ws.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    debug!("received control message: {text}");
                    let message = IncomingMessage::parse(&text)
                        .map_err(|e| GatewayError::Protocol(e.to_string()))?;
                    return Ok(Some(WireFrame::Control(message)));
                }
                Some(Ok(WsMessage::Binary(data))) => {
                    let data = Bytes::from(data.to_vec());
                    let (stream_id, opus) = parse_audio_frame(data)
                        .map_err(|e| GatewayError::Protocol(e.to_string()))?;
                    return Ok(Some(WireFrame::Audio { stream_id, opus }));
                }
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_))) => {
                    // tungstenite answers Ping automatically; Pong/raw Frame
                    // carry no control-plane meaning for us.
                }
                Some(Ok(WsMessage::Close(_))) => return Ok(None),
                Some(Err(e)) => return Err(GatewayError::from(e)),
                None => return Ok(None),
            }
        }
    }

    /// Allocate the next outbound `seq`, strictly monotonic within a
    /// session.
    #[must_use]
    pub fn next_seq(&mut self) -> u32 {
        let seq = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        seq
    }

    /// Close the connection with a normal-closure frame.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Network`] if the close handshake fails.
    pub async fn close(mut self) -> Result<()> {
        self.ws
            .close(None)
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        Ok(())
    }
}
