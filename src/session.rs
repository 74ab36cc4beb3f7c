// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2024 John C. Murray

//! `ZelloSession`: the WebSocket client speaking Zello's control+audio
//! protocol. Owns the Opus codecs, the live stream IDs, and the
//! reconnect/re-auth state machine. Drains [`ZelloCommand`]s raised by
//! [`crate::bridge::CallBridge`] and turns them into protocol operations.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use audiopus::coder::{Decoder as OpusDecoder, Encoder as OpusEncoder};
use audiopus::{Application, Channels, SampleRate};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, info, warn};

use crate::bridge::ZelloCommand;
use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::jwt::JwtSigner;
use crate::keepalive::{KeepAlive, KeepAliveEvent};
use crate::message::{CodecHeader, Event, IncomingMessage, Message, ServerError, parse_page_text};
use crate::protocol::{Protocol, WireFrame};
use crate::resampler::{downsample_16k_to_8k, upsample_8k_to_16k};

/// 60 ms at 16 kHz mono.
const ZELLO_FRAME_SAMPLES: usize = 960;
/// Opus encode output is bounded at 1275 bytes per the RFC 6716 max packet
/// size for any bitrate/complexity combination.
const OPUS_MAX_PACKET: usize = 1275;
const RECONNECT_MAX_RETRIES: u32 = 3;
const RECONNECT_DELAY: Duration = Duration::from_millis(5000);

/// Observable state of the session, per the design's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    AwaitingLogon,
    Authenticated,
    Reconnecting,
}

/// Events raised to whatever owns the session (normally [`crate::gateway::GatewayHost`]).
pub enum SessionEvent {
    /// Decoded, resampled 8 kHz PCM ready for the radio leg.
    PcmReceived { samples: Vec<i16>, from: Option<String> },
    /// The inbound stream ended.
    StreamEnd,
    /// A non-audio radio command, currently only `page`.
    RadioCommand { command: &'static str, src: u32, dst: u32 },
}

struct PerStreamCodec {
    header: CodecHeader,
    decoder: OpusDecoder,
    playback_accumulator: Vec<i16>,
}

/// WebSocket client state machine for the Zello leg.
pub struct ZelloSession {
    config: GatewayConfig,
    protocol: Option<Protocol>,
    state: SessionState,
    stop_reconnect: bool,
    retries_since_success: u32,

    encoder: OpusEncoder,
    send_accumulator: Vec<i16>,
    tx_stream_id: u32,

    codec_headers: HashMap<u32, PerStreamCodec>,
    default_rx_header: CodecHeader,
    current_rx_stream_id: Option<u32>,

    refresh_token: Option<String>,
    keep_alive: KeepAlive,
}

impl std::fmt::Debug for ZelloSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZelloSession")
            .field("state", &self.state)
            .field("tx_stream_id", &self.tx_stream_id)
            .finish_non_exhaustive()
    }
}

impl ZelloSession {
    /// Build a new, disconnected session.
    ///
    /// # Errors
    ///
    /// Returns an error if the Opus encoder can't be constructed.
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let encoder = OpusEncoder::new(SampleRate::Hz16000, Channels::Mono, Application::Voip)
            .map_err(|e| GatewayError::Codec(e.to_string()))?;
        let keep_alive = KeepAlive::new(config.zello_ping_interval);

        Ok(Self {
            config,
            protocol: None,
            state: SessionState::Disconnected,
            stop_reconnect: false,
            retries_since_success: 0,
            encoder,
            send_accumulator: Vec::new(),
            tx_stream_id: 0,
            codec_headers: HashMap::new(),
            default_rx_header: CodecHeader::default(),
            current_rx_stream_id: None,
            refresh_token: None,
            keep_alive,
        })
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Open the WebSocket. On failure returns to `Disconnected`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Network`] if the connection can't be
    /// established.
    pub async fn connect(&mut self) -> Result<()> {
        self.state = SessionState::Connecting;
        match Protocol::connect(Some(&self.config.zello_url)).await {
            Ok(protocol) => {
                self.protocol = Some(protocol);
                self.state = SessionState::AwaitingLogon;
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Disconnected;
                Err(e)
            }
        }
    }

    /// Send the logon message: a fresh/static auth token on the first
    /// attempt, the cached refresh token afterward.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotConnected`] if not connected, or
    /// propagates send/JWT errors.
    pub async fn authenticate(&mut self) -> Result<()> {
        let protocol = self.protocol.as_mut().ok_or(GatewayError::NotConnected)?;
        let seq = protocol.next_seq();

        let message = if let Some(refresh_token) = self.refresh_token.clone() {
            Message::logon_with_refresh_token(
                seq,
                self.config.zello_username.clone(),
                self.config.zello_password.clone(),
                self.config.zello_channel.clone(),
                refresh_token,
            )
        } else {
            let token = self.resolve_auth_token()?;
            Message::logon_with_token(
                seq,
                self.config.zello_username.clone(),
                self.config.zello_password.clone(),
                self.config.zello_channel.clone(),
                token,
            )
        };

        protocol.send(&message).await
    }

    fn resolve_auth_token(&self) -> Result<String> {
        if let Some(token) = &self.config.zello_auth_token {
            return Ok(token.clone());
        }
        let issuer = self
            .config
            .zello_issuer
            .as_deref()
            .ok_or_else(|| GatewayError::Auth("no zelloAuthToken or zelloIssuer configured".into()))?;
        let pem_path = self
            .config
            .zello_pem_file_path
            .as_deref()
            .ok_or_else(|| GatewayError::Auth("zelloIssuer set but zelloPemFilePath missing".into()))?;
        let pem = std::fs::read(pem_path)?;
        JwtSigner::create_jwt(issuer, &pem).map_err(GatewayError::from)
    }

    /// Reconnect loop: idempotent, bounded at `max_retries`, sticky on
    /// exhaustion until explicitly reset.
    ///
    /// # Errors
    ///
    /// Returns the last connect/authenticate error if every retry fails.
    pub async fn reconnect(&mut self) -> Result<()> {
        if self.stop_reconnect {
            return Err(GatewayError::Auth("reconnect exhausted, stop_reconnect is set".into()));
        }

        self.state = SessionState::Reconnecting;
        self.keep_alive.stop();
        self.protocol = None;

        let mut last_err = None;
        while self.retries_since_success < RECONNECT_MAX_RETRIES {
            self.retries_since_success += 1;
            match self.connect().await {
                Ok(()) => match self.authenticate().await {
                    Ok(()) => {
                        self.retries_since_success = 0;
                        return Ok(());
                    }
                    Err(e) => last_err = Some(e),
                },
                Err(e) => last_err = Some(e),
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
        }

        self.stop_reconnect = true;
        Err(last_err.unwrap_or(GatewayError::Network("reconnect failed".into())))
    }

    /// Clear the sticky reconnect-exhaustion flag, e.g. on operator
    /// intervention.
    pub fn reset_reconnect_state(&mut self) {
        self.stop_reconnect = false;
        self.retries_since_success = 0;
    }

    #[must_use]
    pub fn stop_reconnect(&self) -> bool {
        self.stop_reconnect
    }

    /// Request an outbound audio stream.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotConnected`] if not connected.
    pub async fn start_stream(&mut self) -> Result<()> {
        let protocol = self.protocol.as_mut().ok_or(GatewayError::NotConnected)?;
        let seq = protocol.next_seq();
        let message = Message::start_stream(seq, self.config.zello_channel.clone(), 60);
        protocol.send(&message).await
    }

    /// Stop the current outbound audio stream.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotConnected`] if not connected.
    pub async fn stop_stream(&mut self) -> Result<()> {
        let protocol = self.protocol.as_mut().ok_or(GatewayError::NotConnected)?;
        let seq = protocol.next_seq();
        let message = Message::stop_stream(seq, self.tx_stream_id);
        protocol.send(&message).await
    }

    /// Record the server-assigned stream id from a `start_stream` reply.
    pub fn set_tx_stream_id(&mut self, stream_id: u32) {
        self.tx_stream_id = stream_id;
    }

    /// Egress: upsample 8 kHz radio PCM, accumulate to 60 ms (960 samples
    /// @ 16 kHz), Opus-encode, and send as a binary frame.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotConnected`] if not connected, or a
    /// [`GatewayError::Codec`] if Opus encoding fails.
    pub async fn send_audio(&mut self, pcm_8k: &[i16]) -> Result<()> {
        let upsampled = upsample_8k_to_16k(pcm_8k);
        self.send_accumulator.extend_from_slice(&upsampled);

        while self.send_accumulator.len() >= ZELLO_FRAME_SAMPLES {
            let frame: Vec<i16> = self.send_accumulator.drain(..ZELLO_FRAME_SAMPLES).collect();
            let mut out = [0u8; OPUS_MAX_PACKET];
            let written = self
                .encoder
                .encode(&frame, &mut out)
                .map_err(|e| GatewayError::Codec(e.to_string()))?;

            let protocol = self.protocol.as_mut().ok_or(GatewayError::NotConnected)?;
            protocol
                .send_audio_frame(crate::message::build_audio_frame(
                    self.tx_stream_id,
                    &out[..written],
                ))
                .await?;
        }
        Ok(())
    }

    /// Send the keep-alive ping.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotConnected`] if not connected.
    pub async fn send_ping(&mut self) -> Result<()> {
        let channel = self.config.zello_channel.clone();
        let username = self.config.zello_username.clone().unwrap_or_default();
        let protocol = self.protocol.as_mut().ok_or(GatewayError::NotConnected)?;
        let seq = protocol.next_seq();
        let message = Message::ping(seq, channel, username);
        protocol.send(&message).await?;
        self.keep_alive.record_ping_sent();
        Ok(())
    }

    /// Start the keep-alive timer; call once authenticated. Returns the
    /// receiving half of its tick channel: owned by the caller (rather than
    /// stored on `self`) so it can sit in its own `tokio::select!` branch
    /// without aliasing the `&mut self` borrows `send_ping`/`receive` need.
    pub fn start_keep_alive(&mut self) -> UnboundedReceiver<KeepAliveEvent> {
        self.keep_alive.start()
    }

    /// Receive the next frame off the wire and translate it into zero or
    /// more [`SessionEvent`]s, updating internal codec/stream-id state.
    ///
    /// # Errors
    ///
    /// Propagates [`Protocol::receive`] errors; on a clean close, returns
    /// `Ok(None)`.
    pub async fn receive(&mut self) -> Result<Option<SessionEvent>> {
        let frame = {
            let protocol = self.protocol.as_mut().ok_or(GatewayError::NotConnected)?;
            protocol.receive().await?
        };

        let Some(frame) = frame else {
            return Ok(None);
        };

        match frame {
            WireFrame::Audio { stream_id, opus } => Ok(self.handle_audio(stream_id, &opus)),
            WireFrame::Control(message) => Ok(self.handle_control(message)),
        }
    }

    fn handle_audio(&mut self, stream_id: u32, opus: &[u8]) -> Option<SessionEvent> {
        self.current_rx_stream_id = Some(stream_id);
        let header = self
            .codec_headers
            .get(&stream_id)
            .map_or(self.default_rx_header, |c| c.header);
        let frame_len = header.frame_len_samples();

        let entry = self.codec_headers.entry(stream_id).or_insert_with(|| {
            PerStreamCodec {
                header,
                decoder: build_decoder(header).unwrap_or_else(|_| {
                    build_decoder(CodecHeader::default())
                        .expect("default codec header always constructs a decoder")
                }),
                playback_accumulator: Vec::new(),
            }
        });

        if entry.header != header {
            match build_decoder(header) {
                Ok(decoder) => {
                    entry.decoder = decoder;
                    entry.header = header;
                }
                Err(e) => {
                    warn!("failed to rebuild decoder for new codec header: {e}");
                    return None;
                }
            }
        }

        let mut pcm = vec![0i16; frame_len.max(1)];
        let written = match entry.decoder.decode(Some(opus), &mut pcm, false) {
            Ok(n) => n,
            Err(e) => {
                warn!("opus decode failed, dropping frame: {e}");
                return None;
            }
        };
        pcm.truncate(written);

        let resampled = if header.sample_rate_hz == 8000 {
            pcm
        } else {
            downsample_16k_to_8k(&pcm)
        };
        entry.playback_accumulator.extend_from_slice(&resampled);

        let target = if header.sample_rate_hz == 8000 {
            header.frame_len_samples()
        } else {
            header.frame_len_samples() / 2
        };
        if target == 0 || entry.playback_accumulator.len() < target {
            return None;
        }
        let samples: Vec<i16> = entry.playback_accumulator.drain(..target).collect();
        Some(SessionEvent::PcmReceived { samples, from: None })
    }

    fn handle_control(&mut self, message: IncomingMessage) -> Option<SessionEvent> {
        match message {
            IncomingMessage::Event(Event::StreamStart {
                stream_id,
                codec_header,
                ..
            }) => {
                self.current_rx_stream_id = Some(stream_id);
                if let Some(encoded) = codec_header {
                    self.store_codec_header(stream_id, &encoded);
                }
                None
            }
            IncomingMessage::Event(Event::StreamStop { stream_id }) => {
                self.codec_headers.remove(&stream_id);
                Some(SessionEvent::StreamEnd)
            }
            IncomingMessage::Event(Event::ChannelStatus { refresh_token, .. }) => {
                self.state = SessionState::Authenticated;
                if let Some(token) = refresh_token {
                    self.refresh_token = Some(token);
                }
                None
            }
            IncomingMessage::Event(Event::Alert { text, .. }) => {
                parse_page_text(&text).map(|dst| SessionEvent::RadioCommand {
                    command: "page",
                    src: self.config.source_id,
                    dst,
                })
            }
            IncomingMessage::Error(ServerError::Error { error }) => {
                error!("Zello server error: {error}");
                None
            }
            IncomingMessage::Response(response) => {
                if let Some(stream_id) = response.stream_id {
                    self.tx_stream_id = stream_id;
                }
                if let Some(token) = response.refresh_token {
                    self.refresh_token = Some(token);
                }
                if let (Some(stream_id), Some(encoded)) =
                    (response.stream_id, response.codec_header.as_deref())
                {
                    self.store_codec_header(stream_id, encoded);
                }
                self.keep_alive.record_pong_received();
                None
            }
        }
    }

    fn store_codec_header(&mut self, stream_id: u32, encoded: &str) {
        match CodecHeader::from_base64(encoded) {
            Ok(header) => {
                debug!(stream_id, ?header, "stored codec header override");
                self.codec_headers.insert(
                    stream_id,
                    PerStreamCodec {
                        header,
                        decoder: build_decoder(header).unwrap_or_else(|_| {
                            build_decoder(CodecHeader::default())
                                .expect("default codec header always constructs a decoder")
                        }),
                        playback_accumulator: Vec::new(),
                    },
                );
            }
            Err(e) => warn!("ignoring malformed codec header: {e}"),
        }
    }

    /// Graceful shutdown sequence: stop keep-alive, close the WebSocket
    /// with a normal-closure frame. The caller is responsible for sending
    /// `stop_stream` first if a call is in progress.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake fails.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.keep_alive.stop();
        if let Some(protocol) = self.protocol.take() {
            protocol.close().await?;
        }
        self.state = SessionState::Disconnected;
        Ok(())
    }

    /// Drain and apply one [`ZelloCommand`] from CallBridge.
    ///
    /// # Errors
    ///
    /// Propagates whichever protocol operation the command maps to.
    pub async fn apply_command(&mut self, command: ZelloCommand) -> Result<()> {
        match command {
            ZelloCommand::StartStream => self.start_stream().await,
            ZelloCommand::StopStream => self.stop_stream().await,
            ZelloCommand::SendAudio(pcm) => self.send_audio(&pcm).await,
            ZelloCommand::SendAlertPage { dst, .. } => {
                // Wire format for forwarding an incoming radio alert back
                // onto Zello as a message is out of scope; log the hook.
                info!(dst, "radio-originated alert (forwarding not implemented)");
                Ok(())
            }
        }
    }
}

fn build_decoder(header: CodecHeader) -> Result<OpusDecoder> {
    let rate = match header.sample_rate_hz {
        8000 => SampleRate::Hz8000,
        12000 => SampleRate::Hz12000,
        24000 => SampleRate::Hz24000,
        48000 => SampleRate::Hz48000,
        _ => SampleRate::Hz16000,
    };
    OpusDecoder::new(rate, Channels::Mono).map_err(|e| GatewayError::Codec(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> GatewayConfig {
        GatewayConfig::from_yaml(
            "
zelloChannel: Ops
sourceId: 1001
destinationId: 2002
txMode: p25
zelloAuthToken: static-token
",
        )
        .unwrap()
    }

    #[test]
    fn new_session_starts_disconnected() {
        let session = ZelloSession::new(test_config()).unwrap();
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!session.stop_reconnect());
    }

    #[test]
    fn resolve_auth_token_prefers_static_token() {
        let session = ZelloSession::new(test_config()).unwrap();
        assert_eq!(session.resolve_auth_token().unwrap(), "static-token");
    }

    #[test]
    fn resolve_auth_token_errors_without_token_or_issuer() {
        let mut cfg = test_config();
        cfg.zello_auth_token = None;
        let session = ZelloSession::new(cfg).unwrap();
        assert!(session.resolve_auth_token().is_err());
    }

    #[test]
    fn page_alert_produces_radio_command_event() {
        let mut session = ZelloSession::new(test_config()).unwrap();
        let event = session.handle_control(
            IncomingMessage::parse(r#"{"command":"on_alert","from":"Alice","text":"page 9001"}"#)
                .unwrap(),
        );
        match event {
            Some(SessionEvent::RadioCommand { command, dst, .. }) => {
                assert_eq!(command, "page");
                assert_eq!(dst, 9001);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn channel_status_marks_authenticated_and_caches_refresh_token() {
        let mut session = ZelloSession::new(test_config()).unwrap();
        session.handle_control(
            IncomingMessage::parse(
                r#"{"command":"on_channel_status","status":"online","refresh_token":"abc"}"#,
            )
            .unwrap(),
        );
        assert_eq!(session.state(), SessionState::Authenticated);
        assert_eq!(session.refresh_token.as_deref(), Some("abc"));
    }

    #[test]
    fn bare_codec_header_response_is_stored_per_stream_regardless_of_command() {
        let mut session = ZelloSession::new(test_config()).unwrap();
        session.handle_control(
            IncomingMessage::parse(r#"{"codec_header":"QB8BPA==","stream_id":7}"#).unwrap(),
        );
        let stored = session.codec_headers.get(&7).expect("codec header should be stored");
        assert_eq!(stored.header.sample_rate_hz, 8000);
    }
}

impl std::fmt::Debug for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PcmReceived { samples, from } => f
                .debug_struct("PcmReceived")
                .field("len", &samples.len())
                .field("from", from)
                .finish(),
            Self::StreamEnd => write!(f, "StreamEnd"),
            Self::RadioCommand { command, src, dst } => f
                .debug_struct("RadioCommand")
                .field("command", command)
                .field("src", src)
                .field("dst", dst)
                .finish(),
        }
    }
}
