// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2024 John C. Murray

//! Periodic ping timer for [`crate::session::ZelloSession`]. `KeepAlive`
//! never touches the WebSocket directly; it raises a [`KeepAliveEvent`]
//! that the session consumes.

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::{Duration, interval};

/// Event emitted by the keep-alive timer.
#[derive(Debug, Clone, Copy)]
pub enum KeepAliveEvent {
    /// A ping should be sent now.
    Ping,
}

/// Timer producing periodic pings on a tick, and tracking outstanding
/// pongs. `awaiting_pong` is advisory telemetry only — current policy does
/// not force a disconnect on a missed pong (see the design notes on the
/// source's `AwaitingPong` field, which is set but never observed).
#[derive(Debug)]
pub struct KeepAlive {
    ping_interval: Duration,
    ping_count: u64,
    awaiting_pong: bool,
    handle: Option<JoinHandle<()>>,
}

impl KeepAlive {
    /// Create a new keep-alive timer with the given ping interval.
    #[must_use]
    pub fn new(ping_interval_ms: u64) -> Self {
        Self {
            ping_interval: Duration::from_millis(ping_interval_ms.max(1)),
            ping_count: 0,
            awaiting_pong: false,
            handle: None,
        }
    }

    /// Start the timer, producing a channel of [`KeepAliveEvent`]. Call on
    /// session authenticated.
    pub fn start(&mut self) -> UnboundedReceiver<KeepAliveEvent> {
        self.stop();

        let (tx, rx) = mpsc::unbounded_channel();
        let period = self.ping_interval;
        self.handle = Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                if tx.send(KeepAliveEvent::Ping).is_err() {
                    break;
                }
            }
        }));

        rx
    }

    /// Stop the timer. Call on Dispose or before reconnection.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Record that a ping was sent.
    pub fn record_ping_sent(&mut self) {
        self.ping_count += 1;
        self.awaiting_pong = true;
    }

    /// Record that a pong (or any liveness signal) was received.
    pub fn record_pong_received(&mut self) {
        self.awaiting_pong = false;
    }

    /// Number of pings sent so far.
    #[must_use]
    pub fn ping_count(&self) -> u64 {
        self.ping_count
    }

    /// Whether a pong is currently outstanding. Advisory only.
    #[must_use]
    pub fn awaiting_pong(&self) -> bool {
        self.awaiting_pong
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ping_count_and_awaiting_pong_track_manually() {
        let mut ka = KeepAlive::new(10_000);
        assert_eq!(ka.ping_count(), 0);
        assert!(!ka.awaiting_pong());

        ka.record_ping_sent();
        assert_eq!(ka.ping_count(), 1);
        assert!(ka.awaiting_pong());

        ka.record_pong_received();
        assert!(!ka.awaiting_pong());
    }

    #[tokio::test]
    async fn start_produces_ticks_and_stop_ends_them() {
        let mut ka = KeepAlive::new(5);
        let mut rx = ka.start();

        let event = tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .expect("should receive a tick within the timeout");
        assert!(matches!(event, Some(KeepAliveEvent::Ping)));

        ka.stop();
        // After stop, the channel should eventually close (sender dropped).
        let _ = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
    }
}
