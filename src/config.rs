// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2024 John C. Murray

//! YAML configuration for the gateway. Loaded once at process start into an
//! immutable value passed through constructors, rather than read from a
//! process-wide mutable singleton.

use serde::Deserialize;
use std::path::Path;

use crate::error::Result;

fn default_zello_url() -> String {
    crate::ZELLO_DEFAULT_URL.to_string()
}

fn default_ping_interval() -> u64 {
    30_000
}

fn default_drop_time_ms() -> u64 {
    1000
}

fn default_gain() -> f32 {
    1.0
}

/// Which radio technology outbound Zello audio is transcoded to. The
/// source configuration surface uses the numeric form (`1`=DMR, `2`=P25);
/// the string form is accepted too for readability in hand-written YAML.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    /// DMR (AMBE)
    Dmr = 1,
    /// P25 (IMBE)
    P25 = 2,
}

impl<'de> Deserialize<'de> for TxMode {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Num(u8),
            Str(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Num(1) => Ok(TxMode::Dmr),
            Raw::Num(2) => Ok(TxMode::P25),
            Raw::Str(s) if s.eq_ignore_ascii_case("dmr") => Ok(TxMode::Dmr),
            Raw::Str(s) if s.eq_ignore_ascii_case("p25") => Ok(TxMode::P25),
            other => Err(serde::de::Error::custom(format!(
                "invalid txMode (expected 1, 2, \"dmr\" or \"p25\"): {}",
                match other {
                    Raw::Num(n) => n.to_string(),
                    Raw::Str(s) => s,
                }
            ))),
        }
    }
}

/// Top-level gateway configuration, deserialized from YAML. Field names
/// mirror the `camelCase` keys the source configuration uses.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    #[serde(default = "default_zello_url")]
    pub zello_url: String,
    pub zello_username: Option<String>,
    pub zello_password: Option<String>,
    pub zello_channel: String,
    pub zello_auth_token: Option<String>,
    pub zello_issuer: Option<String>,
    pub zello_pem_file_path: Option<String>,
    #[serde(default = "default_ping_interval")]
    pub zello_ping_interval: u64,
    pub zello_alias_file: Option<String>,

    pub source_id: u32,
    pub destination_id: u32,
    pub tx_mode: TxMode,
    #[serde(default, rename = "overrideSourceIdFromUDP")]
    pub override_source_id_from_udp: bool,
    #[serde(default)]
    pub grant_demand: bool,

    #[serde(default = "default_gain")]
    pub rx_audio_gain: f32,
    #[serde(default = "default_gain")]
    pub tx_audio_gain: f32,
    #[serde(default = "default_gain")]
    pub vocoder_decoder_audio_gain: f32,
    #[serde(default = "default_gain")]
    pub vocoder_encoder_audio_gain: f32,
    #[serde(default)]
    pub vocoder_decoder_auto_gain: bool,
    /// Select the external USB hardware vocoder dongle instead of the
    /// software IMBE/AMBE path, regardless of `txMode`.
    #[serde(default)]
    pub vocoder_external_usb: bool,

    #[serde(default = "default_drop_time_ms")]
    pub drop_time_ms: u64,

    /// Address of the FNE master this gateway peers with, e.g.
    /// `"127.0.0.1:62031"`. Not part of the original source configuration
    /// surface, but required to construct the UDP transport this repo
    /// implements at the FNE boundary.
    #[serde(default = "default_fne_master")]
    pub fne_master_addr: String,
    #[serde(default = "default_fne_bind")]
    pub fne_bind_addr: String,
    #[serde(default)]
    pub peer_id: u32,
}

fn default_fne_master() -> String {
    "127.0.0.1:62031".to_string()
}

fn default_fne_bind() -> String {
    "0.0.0.0:0".to_string()
}

impl GatewayConfig {
    /// Load and parse a YAML configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::GatewayError::Io`] if the file can't be read
    /// or [`crate::error::GatewayError::Yaml`] if it doesn't parse.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    /// Parse a YAML configuration document directly, then apply any
    /// `ZELLO_USERNAME` / `ZELLO_PASSWORD` / `ZELLO_AUTH_TOKEN` environment
    /// overrides for fields the document left unset. This lets credentials
    /// be supplied via `.env` rather than committed to the config file,
    /// mirroring the teacher's `load_credentials()` env-var pattern.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::GatewayError::Yaml`] if `yaml` doesn't parse.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let mut config: Self = serde_yaml::from_str(yaml)?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if self.zello_username.is_none() {
            self.zello_username = std::env::var("ZELLO_USERNAME").ok();
        }
        if self.zello_password.is_none() {
            self.zello_password = std::env::var("ZELLO_PASSWORD").ok();
        }
        if self.zello_auth_token.is_none() {
            self.zello_auth_token = std::env::var("ZELLO_AUTH_TOKEN").ok();
        }
    }

    /// Render an annotated default configuration document, used by
    /// `--gen-config` to bootstrap new deployments.
    #[must_use]
    pub fn annotated_default_yaml() -> &'static str {
        include_str!("../config.default.yml")
    }
}
