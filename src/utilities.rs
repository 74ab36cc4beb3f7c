// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2024 John C. Murray

//! Ambient-stack utilities: logging init, `.env` loading, and the Zello-leg
//! Opus decoder builder. The radio-leg vocoders live in
//! [`crate::vocoder`]; this module is purely about the Zello side's
//! default codec and process bootstrapping.

use audiopus::coder::Decoder;
use dotenvy::{dotenv, from_path};
use tracing_subscriber::EnvFilter;

use crate::error::{GatewayError, Result};
use crate::{OPUS_CHANNELS, OPUS_SAMPLE_RATE};

/// Initialize structured logging from `RUST_LOG`, defaulting to `info`.
///
/// # Errors
///
/// This never actually fails (the filter always falls back to a default),
/// but returns `Result` for call-site consistency with the rest of the
/// bootstrap sequence.
pub fn initialize_logging() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    Ok(())
}

/// Load environment variables from the default `.env` file in the current
/// directory, if present. A missing file is not an error.
///
/// # Errors
///
/// Returns [`GatewayError::Config`] if a `.env` file exists but can't be
/// parsed.
pub fn load_dotenv() -> Result<()> {
    match dotenv() {
        Ok(_) | Err(dotenvy::Error::Io(_)) => Ok(()),
        Err(e) => Err(GatewayError::Config(format!("failed to load .env: {e}"))),
    }
}

/// Load environment variables from a specific file.
///
/// # Errors
///
/// Returns [`GatewayError::Config`] if the file can't be loaded or parsed.
pub fn load_dotenv_from_file(path: &str) -> Result<()> {
    from_path(path).map_err(|e| GatewayError::Config(format!("failed to load '{path}': {e}")))?;
    Ok(())
}

/// Build the Opus decoder used for the default (16 kHz) Zello stream. Most
/// streams override this at runtime via the per-stream `codec_header`; see
/// [`crate::session::ZelloSession`].
///
/// # Errors
///
/// Returns [`GatewayError::Codec`] if the underlying decoder can't be
/// constructed.
pub fn create_default_decoder() -> Result<Decoder> {
    Decoder::new(OPUS_SAMPLE_RATE, OPUS_CHANNELS).map_err(|e| GatewayError::Codec(e.to_string()))
}
