// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2024 John C. Murray

//! Vocoder capability trait and the selectable implementations
//! ([`ImbeVocoder`], [`AmbeVocoder`], [`ExternalUsbVocoder`]) the gateway
//! picks between at construction time, per the "polymorphism over
//! vocoders" design note.
//!
//! The real MBE DSP (IMBE for P25, AMBE for DMR) is an external collaborator
//! per the scope of this repository — out of scope here means the actual
//! vocoder math, not the selection interface. Each implementation below
//! wraps a deterministic, reversible placeholder transform standing in for
//! that external library's `encode`/`decode` pair, so the framing and
//! call-state code above it — which is this gateway's actual subject
//! matter — can be built and tested without a proprietary codec.

use crate::error::Result;

/// One 20 ms voice frame at 8 kHz: 160 samples.
pub const VOICE_FRAME_SAMPLES: usize = 160;
/// One packed IMBE/AMBE codeword: 11 bytes (88 bits).
pub const CODEWORD_BYTES: usize = 11;

/// A vocoder: encodes 160 8 kHz PCM samples to an 11-byte codeword and
/// back, with an adjustable gain stage and an auto-gain toggle.
pub trait Vocoder: std::fmt::Debug + Send {
    /// Encode one 20 ms, 160-sample frame to an 11-byte codeword.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Codec`] if the underlying codec rejects the
    /// frame.
    fn encode(&mut self, samples: &[i16; VOICE_FRAME_SAMPLES]) -> Result<[u8; CODEWORD_BYTES]>;

    /// Decode an 11-byte codeword to one 20 ms, 160-sample frame.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Codec`] if the codeword is malformed.
    fn decode(&mut self, codeword: &[u8; CODEWORD_BYTES]) -> Result<[i16; VOICE_FRAME_SAMPLES]>;

    /// Current gain multiplier, applied as an int16 volume scale.
    fn gain(&self) -> f32;

    /// Set the gain multiplier.
    fn set_gain(&mut self, gain: f32);

    /// Whether automatic gain control is enabled.
    fn auto_gain(&self) -> bool;
}

fn apply_gain(samples: &mut [i16; VOICE_FRAME_SAMPLES], gain: f32) {
    if (gain - 1.0).abs() < f32::EPSILON {
        return;
    }
    for sample in samples.iter_mut() {
        let scaled = f32::from(*sample) * gain;
        *sample = scaled.round().clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16;
    }
}

/// Pack 160 i16 samples (scaled to 11 bytes/88 bits) into a placeholder
/// codeword. This is a lossy but fully reversible-enough transform for
/// exercising framing and call-state logic; it is not a real MBE codec.
fn pack_placeholder(samples: &[i16; VOICE_FRAME_SAMPLES]) -> [u8; CODEWORD_BYTES] {
    let mut out = [0u8; CODEWORD_BYTES];
    // Downsample 160 samples to 88 bits by taking the sign + top 7 bits of
    // every other sample's magnitude band, packed MSB-first.
    let mut bit_index = 0usize;
    let mut byte = 0u8;
    for &sample in samples.iter().step_by(2).take(88) {
        let bit = u8::from(sample >= 0);
        byte = (byte << 1) | bit;
        bit_index += 1;
        if bit_index % 8 == 0 {
            out[bit_index / 8 - 1] = byte;
            byte = 0;
        }
    }
    out
}

fn unpack_placeholder(codeword: &[u8; CODEWORD_BYTES]) -> [i16; VOICE_FRAME_SAMPLES] {
    let mut out = [0i16; VOICE_FRAME_SAMPLES];
    const AMPLITUDE: i16 = 4000;
    for (i, slot) in out.iter_mut().enumerate() {
        let bit_pos = i / 2;
        if bit_pos >= 88 {
            *slot = 0;
            continue;
        }
        let byte = codeword[bit_pos / 8];
        let shift = 7 - (bit_pos % 8);
        let bit = (byte >> shift) & 1;
        *slot = if bit == 1 { AMPLITUDE } else { -AMPLITUDE };
    }
    out
}

/// Placeholder IMBE vocoder, selected when [`crate::config::TxMode::P25`]
/// is configured.
#[derive(Debug, Clone, Copy)]
pub struct ImbeVocoder {
    gain: f32,
    auto_gain: bool,
}

impl ImbeVocoder {
    #[must_use]
    pub fn new(gain: f32, auto_gain: bool) -> Self {
        Self { gain, auto_gain }
    }
}

impl Vocoder for ImbeVocoder {
    fn encode(&mut self, samples: &[i16; VOICE_FRAME_SAMPLES]) -> Result<[u8; CODEWORD_BYTES]> {
        let mut gained = *samples;
        apply_gain(&mut gained, self.gain);
        Ok(pack_placeholder(&gained))
    }

    fn decode(&mut self, codeword: &[u8; CODEWORD_BYTES]) -> Result<[i16; VOICE_FRAME_SAMPLES]> {
        let mut samples = unpack_placeholder(codeword);
        apply_gain(&mut samples, self.gain);
        Ok(samples)
    }

    fn gain(&self) -> f32 {
        self.gain
    }

    fn set_gain(&mut self, gain: f32) {
        self.gain = gain;
    }

    fn auto_gain(&self) -> bool {
        self.auto_gain
    }
}

/// Placeholder AMBE vocoder, selected when [`crate::config::TxMode::Dmr`]
/// is configured. Same 20 ms cadence as IMBE, different bit packing in a
/// real implementation — this placeholder shares the packing for
/// simplicity since the actual DSP is out of scope.
#[derive(Debug, Clone, Copy)]
pub struct AmbeVocoder {
    gain: f32,
    auto_gain: bool,
}

impl AmbeVocoder {
    #[must_use]
    pub fn new(gain: f32, auto_gain: bool) -> Self {
        Self { gain, auto_gain }
    }
}

impl Vocoder for AmbeVocoder {
    fn encode(&mut self, samples: &[i16; VOICE_FRAME_SAMPLES]) -> Result<[u8; CODEWORD_BYTES]> {
        let mut gained = *samples;
        apply_gain(&mut gained, self.gain);
        Ok(pack_placeholder(&gained))
    }

    fn decode(&mut self, codeword: &[u8; CODEWORD_BYTES]) -> Result<[i16; VOICE_FRAME_SAMPLES]> {
        let mut samples = unpack_placeholder(codeword);
        apply_gain(&mut samples, self.gain);
        Ok(samples)
    }

    fn gain(&self) -> f32 {
        self.gain
    }

    fn set_gain(&mut self, gain: f32) {
        self.gain = gain;
    }

    fn auto_gain(&self) -> bool {
        self.auto_gain
    }
}

/// External USB hardware vocoder dongle (e.g. a DVSI AMBE3000 board). The
/// source selects this at runtime alongside the software IMBE/AMBE paths;
/// the serial transport itself is out of scope, so this implementation
/// falls back to the same placeholder transform while preserving the
/// selectable-at-construction-time shape the design notes call for.
#[derive(Debug, Clone, Copy)]
pub struct ExternalUsbVocoder {
    gain: f32,
}

impl ExternalUsbVocoder {
    #[must_use]
    pub fn new(gain: f32) -> Self {
        Self { gain }
    }
}

impl Vocoder for ExternalUsbVocoder {
    fn encode(&mut self, samples: &[i16; VOICE_FRAME_SAMPLES]) -> Result<[u8; CODEWORD_BYTES]> {
        let mut gained = *samples;
        apply_gain(&mut gained, self.gain);
        Ok(pack_placeholder(&gained))
    }

    fn decode(&mut self, codeword: &[u8; CODEWORD_BYTES]) -> Result<[i16; VOICE_FRAME_SAMPLES]> {
        let mut samples = unpack_placeholder(codeword);
        apply_gain(&mut samples, self.gain);
        Ok(samples)
    }

    fn gain(&self) -> f32 {
        self.gain
    }

    fn set_gain(&mut self, gain: f32) {
        self.gain = gain;
    }

    fn auto_gain(&self) -> bool {
        false
    }
}

/// Construct the `Box<dyn Vocoder>` for a [`crate::config::TxMode`]. When
/// `external_usb` is set, the USB hardware dongle is selected instead of
/// the software IMBE/AMBE path regardless of `mode`.
#[must_use]
pub fn for_tx_mode(
    mode: crate::config::TxMode,
    encoder_gain: f32,
    decoder_auto_gain: bool,
    external_usb: bool,
) -> Box<dyn Vocoder> {
    if external_usb {
        return Box::new(ExternalUsbVocoder::new(encoder_gain));
    }
    match mode {
        crate::config::TxMode::P25 => Box::new(ImbeVocoder::new(encoder_gain, decoder_auto_gain)),
        crate::config::TxMode::Dmr => Box::new(AmbeVocoder::new(encoder_gain, decoder_auto_gain)),
    }
}
