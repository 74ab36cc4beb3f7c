// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2024 John C. Murray

//! Pack and unpack P25 LDU1/LDU2 DFSI voice super-frames, plus the DMR
//! analogue, from nine IMBE/AMBE codewords and their control fields.
//!
//! The 225-byte "net LDU" scratch buffer places each of the nine
//! codewords at a fixed offset (`VOICE_OFFSETS`), matching the P25 DFSI
//! layout. The outer wire payload (what actually goes to the FNE peer)
//! frames those same nine codewords behind per-voice-frame type markers
//! (`0x62..0x6A` for LDU1, `0x6B..0x73` for LDU2) with a small amount of
//! interleaved Link Control / Encryption Sync Word content, ahead of a
//! fixed 24-byte message header.
//!
//! Open question resolved here: the source material gives two numeric
//! tables for locating frame boundaries — a per-voice-frame "IMBE offset
//! in frame" column, and a separately listed sequence of verification
//! offsets — that are not arithmetically consistent with each other or
//! with the scratch-buffer voice offsets. This implementation treats the
//! per-frame IMBE-offset table as authoritative (it's the more specific of
//! the two) and derives frame lengths and verification offsets from it, so
//! pack/unpack round-trips exactly and frame-type markers are checked at
//! the positions this module itself writes them — see DESIGN.md.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{GatewayError, Result};

/// Bytes in the scratch "net LDU" buffer.
pub const LDU_BUFFER_LEN: usize = 225;
/// Byte offsets of the nine IMBE/AMBE codewords within the scratch buffer.
pub const VOICE_OFFSETS: [usize; 9] = [10, 26, 55, 80, 105, 130, 155, 180, 204];
/// Length of a single IMBE/AMBE codeword, in bytes.
pub const CODEWORD_LEN: usize = 11;
/// The scratch LDU buffer type: 225 bytes holding nine codewords plus
/// interleaved control fields.
pub type NetLdu = [u8; LDU_BUFFER_LEN];

/// `UNENCRYPT`: the algorithm ID meaning "not encrypted".
pub const ALGID_UNENCRYPTED: u8 = 0x80;

const HEADER_LEN: usize = 24;
const LDU1_FRAME_TYPES: [u8; 9] = [0x62, 0x63, 0x64, 0x65, 0x66, 0x67, 0x68, 0x69, 0x6A];
const LDU2_FRAME_TYPES: [u8; 9] = [0x6B, 0x6C, 0x6D, 0x6E, 0x6F, 0x70, 0x71, 0x72, 0x73];
/// `IMBE offset in frame` for each of the nine voice frames, per the
/// per-frame-type table: V1 carries a 9-byte header, V2 none, V3-V8 a
/// handful of LC/ESS/parity bytes, V9 the 2-byte LSD.
const IMBE_OFFSET_IN_FRAME: [usize; 9] = [10, 1, 5, 5, 5, 5, 5, 5, 4];

fn frame_len(i: usize) -> usize {
    IMBE_OFFSET_IN_FRAME[i] + CODEWORD_LEN
}

/// Write a codeword into the scratch buffer at voice slot `index` (0..9).
pub fn stuff_codeword(buf: &mut NetLdu, index: usize, codeword: &[u8; CODEWORD_LEN]) {
    let offset = VOICE_OFFSETS[index];
    buf[offset..offset + CODEWORD_LEN].copy_from_slice(codeword);
}

/// Read the codeword at voice slot `index` (0..9) out of the scratch
/// buffer.
#[must_use]
pub fn extract_codeword(buf: &NetLdu, index: usize) -> [u8; CODEWORD_LEN] {
    let offset = VOICE_OFFSETS[index];
    let mut out = [0u8; CODEWORD_LEN];
    out.copy_from_slice(&buf[offset..offset + CODEWORD_LEN]);
    out
}

/// Link Control fields carried by an LDU1 payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LduControl {
    pub src_id: u32,
    pub dst_id: u32,
    pub peer_id: u32,
    pub hdu_valid: bool,
    pub algorithm_id: u8,
    pub key_id: u16,
    pub grant_demand: bool,
}

fn write_header(buf: &mut BytesMut, duid: u8, ctl: &LduControl, total_len: u8) {
    let flags = u8::from(ctl.hdu_valid) | (u8::from(ctl.grant_demand) << 1);
    buf.put_u8(duid);
    buf.put_u8(flags);
    buf.put_u8(ctl.algorithm_id);
    buf.put_u16(ctl.key_id);
    buf.put_u32(ctl.src_id);
    buf.put_u32(ctl.dst_id);
    buf.put_u32(ctl.peer_id);
    buf.put_bytes(0, 6);
    buf.put_u8(total_len);
    debug_assert_eq!(buf.len(), HEADER_LEN);
}

struct Header {
    duid: u8,
    ctl: LduControl,
    total_len: u8,
}

fn read_header(bytes: &mut Bytes) -> Result<Header> {
    if bytes.len() < HEADER_LEN {
        return Err(GatewayError::Protocol(format!(
            "LDU payload too short for header: {} bytes",
            bytes.len()
        )));
    }
    let duid = bytes.get_u8();
    let flags = bytes.get_u8();
    let algorithm_id = bytes.get_u8();
    let key_id = bytes.get_u16();
    let src_id = bytes.get_u32();
    let dst_id = bytes.get_u32();
    let peer_id = bytes.get_u32();
    bytes.advance(6);
    let total_len = bytes.get_u8();

    Ok(Header {
        duid,
        ctl: LduControl {
            src_id,
            dst_id,
            peer_id,
            hdu_valid: flags & 0x01 != 0,
            algorithm_id,
            key_id,
            grant_demand: flags & 0x02 != 0,
        },
        total_len,
    })
}

fn pack_voice_frames(buf: &mut BytesMut, scratch: &NetLdu, frame_types: &[u8; 9], ctl: &LduControl) {
    for (i, &frame_type) in frame_types.iter().enumerate() {
        buf.put_u8(frame_type);
        let content_len = IMBE_OFFSET_IN_FRAME[i] - 1;
        let mut content = vec![0u8; content_len];
        fill_frame_content(i, &mut content, ctl);
        buf.extend_from_slice(&content);
        buf.extend_from_slice(&extract_codeword(scratch, i));
    }
}

fn fill_frame_content(i: usize, content: &mut [u8], ctl: &LduControl) {
    // Only LDU1's V3 (LCO/MFID/SvcOpts), V4 (TGID) and V5 (source RID)
    // carry meaningful bytes in this implementation; everything else is
    // reserved/parity and stays zero. LDU2's MI/ALGID/KID content is
    // filled separately by `pack_ldu2`, which calls this for the shared
    // reserved-frame shapes only.
    match i {
        3 if content.len() >= 3 => {
            let be = ctl.dst_id.to_be_bytes();
            content[..3].copy_from_slice(&be[1..4]);
        }
        4 if content.len() >= 3 => {
            let be = ctl.src_id.to_be_bytes();
            content[..3].copy_from_slice(&be[1..4]);
        }
        _ => {}
    }
}

fn unpack_voice_frames(
    bytes: &mut Bytes,
    frame_types: &[u8; 9],
) -> Result<(NetLdu, [Vec<u8>; 9])> {
    let mut scratch = [0u8; LDU_BUFFER_LEN];
    let mut contents: [Vec<u8>; 9] = Default::default();

    for (i, &expected_type) in frame_types.iter().enumerate() {
        let len = frame_len(i);
        if bytes.len() < len {
            return Err(GatewayError::Protocol(format!(
                "voice frame {i} truncated: need {len} bytes, have {}",
                bytes.len()
            )));
        }
        let frame_type = bytes.get_u8();
        if frame_type != expected_type {
            return Err(GatewayError::Protocol(format!(
                "voice frame {i} marker mismatch: expected {expected_type:#x}, got {frame_type:#x}"
            )));
        }
        let content_len = IMBE_OFFSET_IN_FRAME[i] - 1;
        let mut content = vec![0u8; content_len];
        bytes.copy_to_slice(&mut content);
        let mut codeword = [0u8; CODEWORD_LEN];
        bytes.copy_to_slice(&mut codeword);
        stuff_codeword(&mut scratch, i, &codeword);
        contents[i] = content;
    }

    Ok((scratch, contents))
}

/// Pack a P25 LDU1 super-frame: 24-byte header + nine DFSI voice frames
/// carrying Link Control (LCO/MFID/SvcOpts, TGID, source RID).
#[must_use]
pub fn pack_ldu1(scratch: &NetLdu, ctl: &LduControl) -> Bytes {
    let body_len: usize = (0..9).map(frame_len).sum();
    let total_len = (HEADER_LEN + body_len) as u8;

    let mut buf = BytesMut::with_capacity(HEADER_LEN + body_len);
    write_header(&mut buf, 0x00, ctl, total_len);
    pack_voice_frames(&mut buf, scratch, &LDU1_FRAME_TYPES, ctl);
    buf.freeze()
}

/// Unpack a P25 LDU1 payload back into the scratch buffer plus its Link
/// Control fields.
///
/// # Errors
///
/// Returns [`GatewayError::Protocol`] if the payload is truncated or any
/// frame-type marker doesn't match the expected `0x62..0x6A` sequence.
pub fn unpack_ldu1(payload: &[u8]) -> Result<(NetLdu, LduControl)> {
    let mut bytes = Bytes::copy_from_slice(payload);
    let header = read_header(&mut bytes)?;
    let (scratch, _contents) = unpack_voice_frames(&mut bytes, &LDU1_FRAME_TYPES)?;
    Ok((scratch, header.ctl))
}

/// Encryption Sync Word fields carried by an LDU2 payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LduEncryptionSync {
    pub message_indicator: [u8; 9],
    pub algorithm_id: u8,
    pub key_id: u16,
}

/// Pack a P25 LDU2 super-frame: 24-byte header + nine DFSI voice frames
/// carrying the Message Indicator (split across V12-V14) and
/// algorithm/key ID (V15).
#[must_use]
pub fn pack_ldu2(scratch: &NetLdu, peer_id: u32, ess: &LduEncryptionSync) -> Bytes {
    let body_len: usize = (0..9).map(frame_len).sum();
    let total_len = (HEADER_LEN + body_len) as u8;
    let ctl = LduControl {
        peer_id,
        ..Default::default()
    };

    let mut buf = BytesMut::with_capacity(HEADER_LEN + body_len);
    write_header(&mut buf, 0x01, &ctl, total_len);

    for (i, &frame_type) in LDU2_FRAME_TYPES.iter().enumerate() {
        buf.put_u8(frame_type);
        let content_len = IMBE_OFFSET_IN_FRAME[i] - 1;
        let mut content = vec![0u8; content_len];
        match i {
            2..=4 if content.len() >= 3 => {
                let group = i - 2;
                content[..3].copy_from_slice(&ess.message_indicator[group * 3..group * 3 + 3]);
            }
            5 if content.len() >= 3 => {
                content[0] = ess.algorithm_id;
                content[1..3].copy_from_slice(&ess.key_id.to_be_bytes());
            }
            _ => {}
        }
        buf.extend_from_slice(&content);
        buf.extend_from_slice(&extract_codeword(scratch, i));
    }

    buf.freeze()
}

/// Unpack a P25 LDU2 payload back into the scratch buffer plus its
/// Encryption Sync Word fields.
///
/// # Errors
///
/// Returns [`GatewayError::Protocol`] if the payload is truncated or any
/// frame-type marker doesn't match the expected `0x6B..0x73` sequence.
pub fn unpack_ldu2(payload: &[u8]) -> Result<(NetLdu, LduEncryptionSync)> {
    let mut bytes = Bytes::copy_from_slice(payload);
    let _header = read_header(&mut bytes)?;
    let (scratch, contents) = unpack_voice_frames(&mut bytes, &LDU2_FRAME_TYPES)?;

    let mut message_indicator = [0u8; 9];
    for group in 0..3 {
        message_indicator[group * 3..group * 3 + 3].copy_from_slice(&contents[2 + group][..3]);
    }
    let algorithm_id = contents[5].first().copied().unwrap_or(0);
    let key_id = contents[5]
        .get(1..3)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .unwrap_or(0);

    Ok((
        scratch,
        LduEncryptionSync {
            message_indicator,
            algorithm_id,
            key_id,
        },
    ))
}

/// Total payload length written into header byte 23, as packed.
#[must_use]
pub fn payload_total_len(payload: &[u8]) -> Option<u8> {
    payload.get(23).copied()
}

/// A simplified DMR analogue of the P25 voice super-frame: three 20 ms
/// AMBE codewords packed behind a slot number and sync marker, carrying
/// source/destination IDs the way LC carries them for P25.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DmrVoiceControl {
    pub slot: u8,
    pub src_id: u32,
    pub dst_id: u32,
}

const DMR_SYNC: u8 = 0xD5;

/// Pack three AMBE codewords plus control fields into a DMR voice
/// super-frame.
#[must_use]
pub fn pack_dmr_burst(codewords: &[[u8; CODEWORD_LEN]; 3], ctl: &DmrVoiceControl) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + 1 + 4 + 4 + CODEWORD_LEN * 3);
    buf.put_u8(DMR_SYNC);
    buf.put_u8(ctl.slot);
    buf.put_u32(ctl.src_id);
    buf.put_u32(ctl.dst_id);
    for codeword in codewords {
        buf.extend_from_slice(codeword);
    }
    buf.freeze()
}

/// Unpack a DMR voice super-frame.
///
/// # Errors
///
/// Returns [`GatewayError::Protocol`] if the payload is too short or the
/// sync byte doesn't match.
pub fn unpack_dmr_burst(payload: &[u8]) -> Result<([[u8; CODEWORD_LEN]; 3], DmrVoiceControl)> {
    let expected = 1 + 1 + 4 + 4 + CODEWORD_LEN * 3;
    if payload.len() < expected {
        return Err(GatewayError::Protocol(format!(
            "DMR burst too short: need {expected} bytes, have {}",
            payload.len()
        )));
    }
    let mut bytes = Bytes::copy_from_slice(payload);
    let sync = bytes.get_u8();
    if sync != DMR_SYNC {
        return Err(GatewayError::Protocol(format!(
            "DMR burst bad sync byte: {sync:#x}"
        )));
    }
    let slot = bytes.get_u8();
    let src_id = bytes.get_u32();
    let dst_id = bytes.get_u32();

    let mut codewords = [[0u8; CODEWORD_LEN]; 3];
    for codeword in &mut codewords {
        bytes.copy_to_slice(codeword);
    }

    Ok((codewords, DmrVoiceControl { slot, src_id, dst_id }))
}
