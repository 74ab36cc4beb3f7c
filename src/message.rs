// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2024 John C. Murray

//! JSON control-plane message types for the Zello leg.

use anyhow::{Result, anyhow};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// The constant outbound codec header: 16000 Hz, 1 frame/packet, 60 ms.
pub const OUTBOUND_CODEC_HEADER: [u8; 4] = [0x80, 0x3E, 0x01, 0x3C];

/// Messages sent to the Zello server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum Message {
    /// Logon request. The first attempt carries `auth_token` (a static
    /// developer token or a freshly minted JWT); subsequent attempts after
    /// an `on_channel_status` carrying `refresh_token` send that instead,
    /// with `auth_token` null.
    #[serde(rename = "logon")]
    Logon {
        seq: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        password: Option<String>,
        channel: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        auth_token: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        refresh_token: Option<String>,
    },

    /// Outbound ping, sent via `send_text_message` per the design notes —
    /// the source piggybacks keep-alive on a text message rather than a
    /// WebSocket-level ping frame.
    #[serde(rename = "send_text_message")]
    SendTextMessage {
        seq: u32,
        channel: String,
        #[serde(rename = "for", skip_serializing_if = "Option::is_none")]
        for_user: Option<String>,
        text: String,
    },

    /// Start an outgoing audio stream.
    #[serde(rename = "start_stream")]
    StartStream {
        seq: u32,
        channel: String,
        #[serde(rename = "type")]
        stream_type: String,
        codec: String,
        codec_header: String,
        packet_duration: u32,
    },

    /// Stop an outgoing audio stream.
    #[serde(rename = "stop_stream")]
    StopStream { seq: u32, stream_id: u32 },
}

impl Message {
    /// Build a logon message carrying a static or freshly-minted token.
    #[must_use]
    pub fn logon_with_token(
        seq: u32,
        username: Option<String>,
        password: Option<String>,
        channel: String,
        auth_token: String,
    ) -> Self {
        Self::Logon {
            seq,
            username,
            password,
            channel,
            auth_token: Some(auth_token),
            refresh_token: None,
        }
    }

    /// Build a logon message carrying a cached refresh token instead of an
    /// auth token, used on re-auth after the server has issued one.
    #[must_use]
    pub fn logon_with_refresh_token(
        seq: u32,
        username: Option<String>,
        password: Option<String>,
        channel: String,
        refresh_token: String,
    ) -> Self {
        Self::Logon {
            seq,
            username,
            password,
            channel,
            auth_token: None,
            refresh_token: Some(refresh_token),
        }
    }

    /// Build the keep-alive `send_text_message` ping.
    #[must_use]
    pub fn ping(seq: u32, channel: String, for_user: String) -> Self {
        Self::SendTextMessage {
            seq,
            channel,
            for_user: Some(for_user),
            text: "ping".to_string(),
        }
    }

    /// Build a plain outbound text message.
    #[must_use]
    pub fn send_text(seq: u32, channel: String, text: String) -> Self {
        Self::SendTextMessage {
            seq,
            channel,
            for_user: None,
            text,
        }
    }

    /// Build the `start_stream` request with the constant Opus codec
    /// header.
    #[must_use]
    pub fn start_stream(seq: u32, channel: String, packet_duration: u32) -> Self {
        Self::StartStream {
            seq,
            channel,
            stream_type: "audio".to_string(),
            codec: "opus".to_string(),
            codec_header: STANDARD.encode(OUTBOUND_CODEC_HEADER),
            packet_duration,
        }
    }

    /// Build the `stop_stream` request.
    #[must_use]
    pub fn stop_stream(seq: u32, stream_id: u32) -> Self {
        Self::StopStream { seq, stream_id }
    }

    /// The sequence number carried by this message.
    #[must_use]
    pub fn seq(&self) -> u32 {
        match self {
            Self::Logon { seq, .. }
            | Self::SendTextMessage { seq, .. }
            | Self::StartStream { seq, .. }
            | Self::StopStream { seq, .. } => *seq,
        }
    }
}

/// Response messages from Zello, keyed loosely by whichever fields are
/// present — the wire format doesn't tag responses by command name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub seq: Option<u32>,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub stream_id: Option<u32>,
    #[serde(default)]
    pub codec_header: Option<String>,
}

/// Events pushed by the Zello server, discriminated by `command`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum Event {
    /// `on_stream_start`: a new inbound audio stream.
    #[serde(rename = "on_stream_start")]
    StreamStart {
        stream_id: u32,
        #[serde(default)]
        from: Option<String>,
        #[serde(default)]
        codec_header: Option<String>,
        #[serde(default)]
        channel: Option<String>,
    },

    /// `on_stream_stop`: an inbound audio stream ended.
    #[serde(rename = "on_stream_stop")]
    StreamStop { stream_id: u32 },

    /// `on_channel_status`: channel occupancy / auth-completed signal. May
    /// carry a `refresh_token` to cache for the next re-auth.
    #[serde(rename = "on_channel_status")]
    ChannelStatus {
        #[serde(default)]
        channel: Option<String>,
        #[serde(default)]
        status: Option<String>,
        #[serde(default)]
        users_online: Option<u32>,
        #[serde(default)]
        refresh_token: Option<String>,
    },

    /// `on_alert`: Zello's page / call-alert channel, the only non-audio
    /// text surface this gateway recognizes.
    #[serde(rename = "on_alert")]
    Alert {
        #[serde(default)]
        from: Option<String>,
        text: String,
    },
}

/// Errors pushed by the Zello server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum ServerError {
    #[serde(rename = "on_error")]
    Error { error: String },
}

/// Top-level union of everything that can arrive on the control channel.
/// Tried in order: a tagged [`Event`] or [`ServerError`] if `command` is
/// present and recognized, otherwise an untagged [`Response`].
#[derive(Debug, Clone)]
pub enum IncomingMessage {
    Event(Event),
    Error(ServerError),
    Response(Response),
}

impl IncomingMessage {
    /// Parse a single JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns a [`serde_json::Error`] if `text` is not valid JSON, or if
    /// it carries a recognized `command` whose shape doesn't match.
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)?;

        if let Some(command) = value.get("command").and_then(|c| c.as_str()) {
            match command {
                "on_stream_start" | "on_stream_stop" | "on_channel_status" | "on_alert" => {
                    return Ok(Self::Event(serde_json::from_value(value)?));
                }
                "on_error" => {
                    return Ok(Self::Error(serde_json::from_value(value)?));
                }
                _ => {}
            }
        }

        Ok(Self::Response(serde_json::from_value(value)?))
    }
}

/// Opus codec header: sample rate, frames per packet, and frame duration,
/// base64-decoded from Zello's 4-byte descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecHeader {
    pub sample_rate_hz: u16,
    pub frames_per_packet: u8,
    pub frame_size_ms: u8,
}

impl CodecHeader {
    /// Decode a base64-encoded codec header.
    ///
    /// # Errors
    ///
    /// Returns an error if base64 decoding fails or the decoded length
    /// isn't exactly 4 bytes.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| anyhow!("invalid codec header base64: {e}"))?;
        Self::from_bytes(Bytes::from(bytes))
    }

    /// Parse a codec header from exactly 4 raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if `bytes` isn't exactly 4 bytes long.
    pub fn from_bytes(mut bytes: Bytes) -> Result<Self> {
        if bytes.len() != 4 {
            return Err(anyhow!(
                "invalid codec header length: expected 4 bytes, got {}",
                bytes.len()
            ));
        }

        let sample_rate_hz = bytes.get_u16_le();
        let frames_per_packet = bytes.get_u8();
        let frame_size_ms = bytes.get_u8();

        Ok(Self {
            sample_rate_hz,
            frames_per_packet,
            frame_size_ms,
        })
    }

    /// Derived frame length in samples: `rate * ms / 1000 * frames`,
    /// integer arithmetic, no rounding.
    #[must_use]
    pub fn frame_len_samples(&self) -> usize {
        usize::from(self.sample_rate_hz) * usize::from(self.frame_size_ms) / 1000
            * usize::from(self.frames_per_packet)
    }

    /// Encode to a base64 string.
    #[must_use]
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.to_bytes())
    }

    /// Convert to raw bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(4);
        buf.put_u16_le(self.sample_rate_hz);
        buf.put_u8(self.frames_per_packet);
        buf.put_u8(self.frame_size_ms);
        buf.freeze()
    }
}

impl Default for CodecHeader {
    fn default() -> Self {
        Self {
            sample_rate_hz: 16000,
            frames_per_packet: 1,
            frame_size_ms: 60,
        }
    }
}

/// Parse a Zello binary audio frame: byte 0 = `0x01`, bytes 1..5 =
/// big-endian stream id, bytes 5..9 reserved, remainder = Opus payload.
///
/// # Errors
///
/// Returns an error if the frame is shorter than the 9-byte header or its
/// type byte isn't `0x01`.
pub fn parse_audio_frame(mut data: Bytes) -> Result<(u32, Bytes)> {
    if data.len() < 9 {
        return Err(anyhow!(
            "audio frame too short: {} bytes, need at least 9",
            data.len()
        ));
    }
    let frame_type = data.get_u8();
    if frame_type != 0x01 {
        return Err(anyhow!("unexpected binary frame type: {frame_type:#x}"));
    }
    let stream_id = data.get_u32();
    let _reserved = data.split_to(4);
    Ok((stream_id, data))
}

/// Build a Zello binary audio frame: `[0x01, stream_id_be, 0,0,0,0, opus]`.
#[must_use]
pub fn build_audio_frame(stream_id: u32, opus_payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(9 + opus_payload.len());
    buf.put_u8(0x01);
    buf.put_u32(stream_id);
    buf.put_u32(0);
    buf.extend_from_slice(opus_payload);
    buf.freeze()
}

/// Parse a Zello `on_alert` page, tolerating both `"page <id>"` and
/// `"page<id>"`, per the documented ambiguity in the source parser.
#[must_use]
pub fn parse_page_text(text: &str) -> Option<u32> {
    let lower = text.trim();
    if lower.len() < 4 || !lower[..4].eq_ignore_ascii_case("page") {
        return None;
    }
    let rest = lower[4..].trim_start();
    rest.parse::<u32>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_header_round_trip() {
        let header = CodecHeader::default();
        assert_eq!(header.to_bytes().as_ref(), &OUTBOUND_CODEC_HEADER);
        let decoded = CodecHeader::from_base64(&header.to_base64()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn outbound_codec_header_is_the_documented_constant() {
        assert_eq!(OUTBOUND_CODEC_HEADER, [0x80, 0x3E, 0x01, 0x3C]);
        let msg = Message::start_stream(1, "ch".to_string(), 60);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("gD4BPA=="));
    }

    #[test]
    fn frame_length_formula_has_no_drift() {
        let header = CodecHeader {
            sample_rate_hz: 8000,
            frames_per_packet: 1,
            frame_size_ms: 20,
        };
        for _ in 0..1000 {
            assert_eq!(header.frame_len_samples(), 160);
        }
    }

    #[test]
    fn audio_frame_round_trip_and_big_endian_stream_id() {
        let frame = build_audio_frame(0x0000_002A, &[1, 2, 3]);
        assert_eq!(&frame[1..5], &[0x00, 0x00, 0x00, 0x2A]);

        let (stream_id, payload) = parse_audio_frame(frame).unwrap();
        assert_eq!(stream_id, 0x2A);
        assert_eq!(payload.as_ref(), &[1, 2, 3]);
    }

    #[test]
    fn audio_frame_rejects_short_or_wrong_type() {
        assert!(parse_audio_frame(Bytes::from_static(&[0x01, 0, 0])).is_err());
        let mut bad = BytesMut::new();
        bad.put_u8(0x02);
        bad.extend_from_slice(&[0u8; 8]);
        assert!(parse_audio_frame(bad.freeze()).is_err());
    }

    #[test]
    fn page_text_accepts_both_spacing_variants() {
        assert_eq!(parse_page_text("page 9001"), Some(9001));
        assert_eq!(parse_page_text("page9001"), Some(9001));
        assert_eq!(parse_page_text("nope"), None);
    }

    #[test]
    fn incoming_message_dispatches_by_command() {
        let event = IncomingMessage::parse(
            r#"{"command":"on_alert","from":"Alice","text":"page 9001"}"#,
        )
        .unwrap();
        assert!(matches!(event, IncomingMessage::Event(Event::Alert { .. })));

        let response = IncomingMessage::parse(r#"{"seq":3,"success":true}"#).unwrap();
        assert!(matches!(response, IncomingMessage::Response(_)));
    }
}
