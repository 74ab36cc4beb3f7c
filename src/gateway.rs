// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2024 John C. Murray

//! `GatewayHost`: composes the FNE peer, `CallBridge`, and `ZelloSession`,
//! and owns the shutdown ordering the design calls for: stop keep-alive →
//! send `stop_stream` if in-call → close WebSocket with normal closure →
//! dispose codecs.

use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{error, info, warn};

use crate::alias::AliasMap;
use crate::bridge::{CallBridge, ZelloCommand};
use crate::config::GatewayConfig;
use crate::error::Result;
use crate::fne::{FneEvent, FnePeer, UdpFnePeer};
use crate::keepalive::KeepAliveEvent;
use crate::session::{SessionEvent, ZelloSession};

/// Owns every long-lived piece of the gateway and runs its main loop.
pub struct GatewayHost<P: FnePeer> {
    config: GatewayConfig,
    session: ZelloSession,
    bridge: CallBridge<P>,
    fne_events: UnboundedReceiver<FneEvent>,
    zello_commands: UnboundedReceiver<ZelloCommand>,
    keep_alive_rx: Option<UnboundedReceiver<KeepAliveEvent>>,
    #[allow(dead_code)]
    aliases: AliasMap,
}

/// Await the next item from an optional channel, pending forever if the
/// channel hasn't been set up yet. Lets an unstarted keep-alive timer sit
/// in a `tokio::select!` branch without ever winning the race.
async fn recv_optional<T>(rx: &mut Option<UnboundedReceiver<T>>) -> Option<T> {
    match rx.as_mut() {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl<P: FnePeer> std::fmt::Debug for GatewayHost<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayHost").finish_non_exhaustive()
    }
}

impl GatewayHost<UdpFnePeer> {
    /// Build a gateway host wired to a real UDP FNE transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the Zello Opus encoder can't be built, the
    /// alias file (if configured) can't be loaded, or the FNE UDP socket
    /// can't be bound/connected.
    pub fn build(config: GatewayConfig) -> Result<Self> {
        let aliases = match &config.zello_alias_file {
            Some(path) => AliasMap::load(path)?,
            None => AliasMap::empty(),
        };

        let (fne, fne_events) = UdpFnePeer::connect(
            &config.fne_bind_addr,
            &config.fne_master_addr,
            config.peer_id,
        )?;

        Self::new(config, fne, fne_events, aliases)
    }
}

impl<P: FnePeer> GatewayHost<P> {
    /// Build a gateway host around an arbitrary [`FnePeer`] implementation
    /// (the real UDP transport, or a fake for tests).
    ///
    /// # Errors
    ///
    /// Returns an error if the Zello Opus encoder can't be built.
    pub fn new(
        config: GatewayConfig,
        fne: P,
        fne_events: UnboundedReceiver<FneEvent>,
        aliases: AliasMap,
    ) -> Result<Self> {
        let (zello_tx, zello_commands) = mpsc::unbounded_channel();
        let session = ZelloSession::new(config.clone())?;
        let bridge = CallBridge::new(config.clone(), fne, zello_tx);

        Ok(Self {
            config,
            session,
            bridge,
            fne_events,
            zello_commands,
            keep_alive_rx: None,
            aliases,
        })
    }

    /// Connect and authenticate the Zello leg, then run until the
    /// cancellation token fires or a fatal error occurs.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial connect/authenticate fails, or if
    /// reconnection is exhausted while running.
    pub async fn run(&mut self, shutdown: tokio::sync::watch::Receiver<bool>) -> Result<()> {
        self.session.connect().await?;
        self.session.authenticate().await?;
        self.keep_alive_rx = Some(self.session.start_keep_alive());
        info!(channel = %self.config.zello_channel, "gateway running");

        let mut shutdown = shutdown;
        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }

                fne_event = self.fne_events.recv() => {
                    match fne_event {
                        Some(FneEvent::P25DataReceived(event)) => {
                            if self.config.override_source_id_from_udp {
                                self.bridge.set_src_override(event.src_id);
                            }
                            if let Err(e) = self.bridge.on_p25_data(&event) {
                                warn!("CallBridge::on_p25_data failed: {e}");
                            }
                        }
                        Some(FneEvent::PeerConnected { peer_id }) => {
                            info!(peer_id, "FNE peer connected");
                        }
                        None => {
                            warn!("FNE event channel closed, stopping");
                            break;
                        }
                    }
                }

                command = self.zello_commands.recv() => {
                    match command {
                        Some(ZelloCommand::StartStream) => {
                            if let Err(e) = self.session.start_stream().await {
                                warn!("failed to start Zello stream: {e}");
                            }
                        }
                        Some(command) => {
                            if let Err(e) = self.session.apply_command(command).await {
                                warn!("failed to apply Zello command: {e}");
                            }
                        }
                        None => {}
                    }
                }

                keep_alive_event = recv_optional(&mut self.keep_alive_rx) => {
                    match keep_alive_event {
                        Some(KeepAliveEvent::Ping) => {
                            if let Err(e) = self.session.send_ping().await {
                                warn!("failed to send keep-alive ping: {e}");
                            }
                        }
                        None => {}
                    }
                }

                session_event = self.session.receive() => {
                    match session_event {
                        Ok(Some(SessionEvent::PcmReceived { samples, .. })) => {
                            if let Err(e) = self.bridge.process_tx_pcm(&samples) {
                                warn!("CallBridge::process_tx_pcm failed: {e}");
                            }
                        }
                        Ok(Some(SessionEvent::StreamEnd)) => {
                            self.bridge.stop_tx_call();
                        }
                        Ok(Some(SessionEvent::RadioCommand { command: "page", dst, .. })) => {
                            if let Err(e) = self.bridge.on_radio_command_page(dst) {
                                warn!("failed to forward page to FNE: {e}");
                            }
                        }
                        Ok(Some(SessionEvent::RadioCommand { .. })) | Ok(None) => {}
                        Err(e) => {
                            error!("Zello receive loop error, reconnecting: {e}");
                            if self.session.reconnect().await.is_err() && self.session.stop_reconnect() {
                                error!("reconnect attempts exhausted, giving up");
                                break;
                            }
                        }
                    }
                }
            }
        }

        self.shutdown().await
    }

    /// Graceful shutdown: stop keep-alive, stop the current call if any,
    /// close the WebSocket, and let codec handles drop.
    ///
    /// # Errors
    ///
    /// Returns an error if the WebSocket close handshake fails.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.bridge.stop_tx_call();
        if matches!(self.session.state(), crate::session::SessionState::Authenticated) {
            let _ = self.session.stop_stream().await;
        }
        self.session.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fne::FakeFnePeer;
    use tokio::sync::mpsc as tokio_mpsc;

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

    #[tokio::test]
    async fn build_wires_bridge_and_session_without_connecting() {
        let (_fne_tx, fne_events) = tokio_mpsc::unbounded_channel();
        let host = GatewayHost::new(test_config(), FakeFnePeer::new(), fne_events, AliasMap::empty());
        assert!(host.is_ok());
    }

    #[tokio::test]
    async fn shutdown_without_a_live_session_is_a_noop_error_free() {
        let (_fne_tx, fne_events) = tokio_mpsc::unbounded_channel();
        let mut host =
            GatewayHost::new(test_config(), FakeFnePeer::new(), fne_events, AliasMap::empty()).unwrap();
        assert!(host.shutdown().await.is_ok());
    }
}
