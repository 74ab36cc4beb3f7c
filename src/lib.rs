// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2024 John C. Murray

#![warn(clippy::all, clippy::pedantic, rust_2018_idioms)]
#![warn(missing_debug_implementations, clippy::unwrap_used)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]
#![doc = include_str!("../README.md")]

pub mod alias;
pub mod bridge;
pub mod config;
pub mod error;
pub mod fne;
pub mod gateway;
pub mod jwt;
pub mod keepalive;
pub mod message;
pub mod protocol;
pub mod resampler;
pub mod session;
pub mod utilities;
pub mod vocoder;
pub mod voice_frame;

// Re-exports for convenience
pub use bridge::{CallBridge, ZelloCommand};
pub use config::GatewayConfig;
pub use error::{GatewayError, Result};
pub use fne::{FnePeer, UdpFnePeer};
pub use gateway::GatewayHost;
pub use message::{CodecHeader, Event, IncomingMessage, Message, Response};
pub use protocol::Protocol;
pub use session::{SessionEvent, SessionState, ZelloSession};
pub use utilities::{initialize_logging, load_dotenv, load_dotenv_from_file};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// GIT version
pub const GIT_VERSION: &str = env!("GIT_VERSION");

/// Zello uses a mono audio stream.
pub const OPUS_CHANNELS: audiopus::Channels = audiopus::Channels::Mono;

/// Zello uses a 16kHz sample rate.
pub const OPUS_SAMPLE_RATE: audiopus::SampleRate = audiopus::SampleRate::Hz16000;

/// Default Zello WebSocket URL.
pub const ZELLO_DEFAULT_URL: &str = "wss://zello.io/ws";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_git_version() {
        assert!(!GIT_VERSION.is_empty());
    }
}
