// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2024 John C. Murray

//! Error types for the gateway

use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T> = anyhow::Result<T, GatewayError>;

/// Error taxonomy for the bridge. Propagation policy: `Codec` and
/// `Protocol` errors are logged and the offending frame or message is
/// dropped, the stream continues; `Network` errors terminate the affected
/// loop and trigger a reconnect; `Auth` exhaustion is sticky; `Policy`
/// silently ends the affected call.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// WebSocket/UDP transport failure
    #[error("network error: {0}")]
    Network(String),

    /// Malformed JSON, bad codec header, bad frame-type marker
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Opus/IMBE/AMBE encode or decode failure
    #[error("codec error: {0}")]
    Codec(String),

    /// Logon failed, JWT signing failed, PEM parse failed
    #[error("auth error: {0}")]
    Auth(String),

    /// Encrypted call rejected, alias not found, and similar policy outcomes
    #[error("policy: {0}")]
    Policy(String),

    /// Invariant violation — should not occur outside of a programming error
    #[error("internal error: {0}")]
    Internal(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Operation timed out
    #[error("operation timed out")]
    Timeout,

    /// Client is not connected / not authenticated
    #[error("not connected")]
    NotConnected,

    /// Channel error (internal handoff queues)
    #[error("channel error: {0}")]
    Channel(String),

    /// WebSocket error (boxed to reduce size)
    #[error("websocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    /// Network I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML deserialization error
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for GatewayError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

/// Errors specific to JWT construction, kept distinct from [`GatewayError`]
/// so [`crate::jwt::JwtSigner`] can be unit-tested without the rest of the
/// gateway's error taxonomy in scope.
#[derive(Debug, Error)]
pub enum JwtError {
    /// Either the issuer or the PEM argument was empty
    #[error("empty input: {0}")]
    EmptyInput(&'static str),

    /// The PEM block did not decode to a usable RSA private key
    #[error("failed to parse PEM RSA private key: {0}")]
    PemParse(String),

    /// RSASSA-PKCS1-v1_5/SHA-256 signing failed
    #[error("failed to sign JWT: {0}")]
    Signing(String),
}

impl From<JwtError> for GatewayError {
    fn from(err: JwtError) -> Self {
        Self::Auth(err.to_string())
    }
}
