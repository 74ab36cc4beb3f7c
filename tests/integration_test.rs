// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2024 John C. Murray

//! End-to-end tests for the ingress/egress voice pipeline and control-plane
//! parsing, exercised against a [`FakeFnePeer`] so no live WebSocket or UDP
//! master is required.

use tokio::sync::mpsc;

use zello_fne_gateway::bridge::{CallBridge, CallSlot, ZelloCommand};
use zello_fne_gateway::config::GatewayConfig;
use zello_fne_gateway::fne::{FakeFnePeer, P25DataEvent};
use zello_fne_gateway::message::{self, CodecHeader, IncomingMessage};
use zello_fne_gateway::resampler;
use zello_fne_gateway::session::ZelloSession;
use zello_fne_gateway::vocoder::VOICE_FRAME_SAMPLES;
use zello_fne_gateway::voice_frame::{self, ALGID_UNENCRYPTED, LDU_BUFFER_LEN, LduControl};

fn test_config() -> GatewayConfig {
    GatewayConfig::from_yaml(
        "
zelloChannel: Ops
sourceId: 1001
destinationId: 2002
txMode: p25
",
    )
    .unwrap()
}

fn bridge_with_fake_peer() -> (
    CallBridge<FakeFnePeer>,
    mpsc::UnboundedReceiver<ZelloCommand>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let bridge = CallBridge::new(test_config(), FakeFnePeer::new(), tx);
    (bridge, rx)
}

/// Scenario 1 (happy ingress): seven 20 ms blocks of loud 8 kHz PCM (140 ms,
/// short of the 180 ms / 9-frame LDU1 boundary) must not yet emit anything,
/// and the ninth frame must complete exactly one LDU1.
#[test]
fn happy_ingress_emits_one_ldu1_after_nine_frames() {
    let (mut bridge, _rx) = bridge_with_fake_peer();

    let seven_frames = vec![500i16; VOICE_FRAME_SAMPLES * 7];
    bridge.process_tx_pcm(&seven_frames).unwrap();
    assert_eq!(bridge.fne().sent_master.lock().unwrap().len(), 0);

    let two_more_frames = vec![500i16; VOICE_FRAME_SAMPLES * 2];
    bridge.process_tx_pcm(&two_more_frames).unwrap();
    assert_eq!(bridge.fne().sent_master.lock().unwrap().len(), 1);
}

/// Scenario 2 (happy egress): two full LDUs (18 IMBE codewords) of silence
/// must decode to exactly 2880 PCM samples at 8 kHz, which upsamples to
/// 5760 samples at 16 kHz — two 60 ms Opus-ready blocks' worth of audio.
#[test]
fn happy_egress_two_ldus_yield_two_zello_blocks_upsampled() {
    let (mut bridge, mut rx) = bridge_with_fake_peer();

    let scratch = [0u8; LDU_BUFFER_LEN];
    let ctl = LduControl {
        dst_id: 2002,
        src_id: 55,
        algorithm_id: ALGID_UNENCRYPTED,
        hdu_valid: true,
        ..Default::default()
    };
    let ldu1 = voice_frame::pack_ldu1(&scratch, &ctl);
    let ess = voice_frame::LduEncryptionSync {
        message_indicator: [0u8; 9],
        algorithm_id: ALGID_UNENCRYPTED,
        key_id: 0,
    };
    let ldu2 = voice_frame::pack_ldu2(&scratch, 1, &ess);

    for (duid, payload) in [(0x03u8, ldu1.to_vec()), (0x05u8, ldu2.to_vec())] {
        let event = P25DataEvent {
            peer_id: 1,
            src_id: 55,
            dst_id: 2002,
            call_type: 0,
            duid,
            frame_type: 0,
            stream_id: 77,
            data: payload,
        };
        bridge.on_p25_data(&event).unwrap();
    }

    let mut total_samples = 0usize;
    while let Ok(cmd) = rx.try_recv() {
        if let ZelloCommand::SendAudio(block) = cmd {
            assert_eq!(block.len(), 960, "each Zello block must be one 60ms unit at 8kHz");
            let upsampled = resampler::upsample_8k_to_16k(&block);
            assert_eq!(upsampled.len(), 1920);
            total_samples += block.len();
        }
    }
    assert_eq!(total_samples, 2880);
}

/// Scenario 3 (codec header override): an out-of-band codec header for a
/// stream id changes the decoded frame length for that stream.
#[test]
fn codec_header_override_changes_frame_length() {
    let header = CodecHeader::from_base64("QB8BPA==").unwrap();
    assert_eq!(header.sample_rate_hz, 8000);
    assert_eq!(header.frames_per_packet, 1);
    assert_eq!(header.frame_size_ms, 60);
    assert_eq!(header.frame_len_samples(), 480);

    let default_header = CodecHeader::default();
    assert_eq!(default_header.frame_len_samples(), 960);
}

/// Scenario 4 (page bridge): an inbound `on_alert` "page <dst>" event
/// parses to the destination radio id, and `CallBridge` turns it into a
/// Call Alert TSBK addressed from the configured source id.
#[test]
fn page_bridge_parses_alert_and_emits_tsbk() {
    let dst = message::parse_page_text("page 9001").unwrap();
    assert_eq!(dst, 9001);
    // the source's ambiguous "page<id>" form (no space) must also parse.
    assert_eq!(message::parse_page_text("page9001").unwrap(), 9001);

    let (bridge, _rx) = bridge_with_fake_peer();
    bridge.on_radio_command_page(dst).unwrap();

    let sent = bridge.fne().sent_tsbk.lock().unwrap();
    assert_eq!(sent.len(), 1);
    let tsbk = &sent[0];
    let encoded_dst = u32::from_be_bytes(tsbk[1..5].try_into().unwrap());
    let encoded_src = u32::from_be_bytes(tsbk[5..9].try_into().unwrap());
    assert_eq!(encoded_dst, 9001);
    assert_eq!(encoded_src, 1001);
}

/// Scenario 5 (encrypted-call drop): an LDU1 reporting a non-unencrypted
/// algorithm id must not forward audio, and the slot must keep ignoring
/// frames on that stream until a terminator resets it.
#[test]
fn encrypted_call_is_dropped_until_terminator() {
    let (mut bridge, mut rx) = bridge_with_fake_peer();
    let scratch = [0u8; LDU_BUFFER_LEN];

    let encrypted_ctl = LduControl {
        dst_id: 2002,
        src_id: 55,
        algorithm_id: 0x81,
        hdu_valid: true,
        ..Default::default()
    };
    let encrypted_ldu1 = voice_frame::pack_ldu1(&scratch, &encrypted_ctl);
    let event = P25DataEvent {
        peer_id: 1,
        src_id: 55,
        dst_id: 2002,
        call_type: 0,
        duid: 0x03,
        frame_type: 0,
        stream_id: 99,
        data: encrypted_ldu1.to_vec(),
    };
    bridge.on_p25_data(&event).unwrap();

    let clear_ess = voice_frame::LduEncryptionSync {
        message_indicator: [0u8; 9],
        algorithm_id: ALGID_UNENCRYPTED,
        key_id: 0,
    };
    let ldu2_same_stream = voice_frame::pack_ldu2(&scratch, 1, &clear_ess);
    let event2 = P25DataEvent {
        peer_id: 1,
        src_id: 55,
        dst_id: 2002,
        call_type: 0,
        duid: 0x05,
        frame_type: 0,
        stream_id: 99,
        data: ldu2_same_stream.to_vec(),
    };
    bridge.on_p25_data(&event2).unwrap();

    let mut saw_audio = false;
    let mut saw_start = false;
    while let Ok(cmd) = rx.try_recv() {
        match cmd {
            ZelloCommand::SendAudio(_) => saw_audio = true,
            ZelloCommand::StartStream => saw_start = true,
            _ => {}
        }
    }
    // The encrypted check runs before maybe_start_egress_call, so an
    // encrypted call never reaches Zello as a start_stream either.
    assert!(!saw_audio);
    assert!(!saw_start);

    let terminator = P25DataEvent {
        peer_id: 1,
        src_id: 55,
        dst_id: 2002,
        call_type: 0,
        duid: 0x02,
        frame_type: 0,
        stream_id: 99,
        data: vec![],
    };
    bridge.on_p25_data(&terminator).unwrap();

    let mut saw_stop = false;
    while let Ok(cmd) = rx.try_recv() {
        if matches!(cmd, ZelloCommand::StopStream) {
            saw_stop = true;
        }
    }
    // No call was ever started on Zello, so no stop signal is needed either.
    assert!(!saw_stop);
}

/// `CallBridge::process_tx_pcm` never starts a call on pure silence, no
/// matter how many frames arrive.
#[test]
fn silence_never_starts_an_ingress_call() {
    let (mut bridge, _rx) = bridge_with_fake_peer();
    let silence = vec![0i16; VOICE_FRAME_SAMPLES * 30];
    bridge.process_tx_pcm(&silence).unwrap();
    assert_eq!(bridge.fne().sent_master.lock().unwrap().len(), 0);
}

/// A terminator on a slot with no call in progress is a harmless no-op.
#[test]
fn terminator_without_a_call_in_progress_is_a_noop() {
    let (mut bridge, mut rx) = bridge_with_fake_peer();
    let terminator = P25DataEvent {
        peer_id: 1,
        src_id: 0,
        dst_id: 0,
        call_type: 0,
        duid: 0x02,
        frame_type: 0,
        stream_id: 0,
        data: vec![],
    };
    bridge.on_p25_data(&terminator).unwrap();
    assert!(rx.try_recv().is_err());
}

/// Alias lookup is case- and whitespace-insensitive, per the invariant in
/// the testable-properties list.
#[test]
fn alias_lookup_normalizes_case_and_whitespace() {
    let aliases = zello_fne_gateway::alias::AliasMap::from_yaml(
        "
- rid: 1001
  alias: Foo Bar
",
    )
    .unwrap();
    assert_eq!(aliases.lookup("Foo Bar"), 1001);
    assert_eq!(aliases.lookup("foobar"), 1001);
    assert_eq!(aliases.lookup("FOOBAR"), 1001);
    assert_eq!(aliases.lookup("nonexistent"), 0);
}

/// Resample length invariant: output length is the exact integer ratio of
/// input length by the rate ratio, with no rounding drift.
#[test]
fn resample_length_matches_rate_ratio() {
    let input = vec![0i16; 160];
    let up = resampler::resample(&input, 8000, 16000);
    assert_eq!(up.len(), 320);
    let down = resampler::resample(&up, 16000, 8000);
    assert_eq!(down.len(), 160);
}

/// Resample at equal rates is the identity function.
#[test]
fn resample_at_equal_rates_is_identity() {
    let input: Vec<i16> = (0..160).map(|i| i as i16).collect();
    let out = resampler::resample(&input, 8000, 8000);
    assert_eq!(out, input);
}

/// `CodecHeader` round-trips through its wire encoding, matching the fixed
/// `OUTBOUND_CODEC_HEADER` bytes Zello expects for 16 kHz/1/60ms.
#[test]
fn codec_header_round_trips_and_matches_outbound_constant() {
    let header = CodecHeader::default();
    let encoded = header.to_bytes();
    assert_eq!(encoded.as_ref(), &message::OUTBOUND_CODEC_HEADER);
    let decoded = CodecHeader::from_bytes(encoded).unwrap();
    assert_eq!(decoded, header);
}

/// Parsing a malformed control message surfaces a JSON error rather than
/// panicking.
#[test]
fn malformed_control_message_is_a_parse_error() {
    let result = IncomingMessage::parse("{not json");
    assert!(result.is_err());
}

/// Parsing a channel status event recognizes its command discriminator.
#[test]
fn channel_status_message_parses_as_an_event() {
    let parsed = IncomingMessage::parse(
        r#"{"command":"on_channel_status","channel":"Ops","status":"online","users_online":3}"#,
    )
    .unwrap();
    assert!(matches!(parsed, IncomingMessage::Event(_)));
}

/// `CallSlot` defaults to an idle, non-ignoring state — the baseline a
/// terminator resets every slot back to.
#[test]
fn call_slot_default_is_idle() {
    let slot = CallSlot::default();
    assert!(!slot.call_in_progress);
    assert!(!slot.ignore_call);
}

/// Requires a reachable Zello server and valid credentials; not run by
/// default.
#[tokio::test]
#[ignore]
async fn live_connect_and_authenticate_against_a_real_zello_channel() {
    let config = GatewayConfig::from_yaml(&format!(
        "
zelloChannel: {}
zelloUsername: {}
zelloPassword: {}
zelloAuthToken: {}
sourceId: 1001
destinationId: 2002
txMode: p25
",
        std::env::var("ZELLO_CHANNEL").expect("ZELLO_CHANNEL not set"),
        std::env::var("ZELLO_USERNAME").expect("ZELLO_USERNAME not set"),
        std::env::var("ZELLO_PASSWORD").expect("ZELLO_PASSWORD not set"),
        std::env::var("ZELLO_AUTH_TOKEN").expect("ZELLO_AUTH_TOKEN not set"),
    ))
    .unwrap();

    let mut session = ZelloSession::new(config).unwrap();
    session.connect().await.expect("connect should succeed");
    session.authenticate().await.expect("logon should send");
}

/// Scenario 6 (reconnect exhaustion): a session whose Zello endpoint is
/// unreachable exhausts its retries and sets the sticky `stop_reconnect`
/// flag, after which further reconnect attempts short-circuit immediately.
#[tokio::test(start_paused = true)]
async fn reconnect_exhaustion_sets_sticky_stop_reconnect() {
    let config = GatewayConfig::from_yaml(
        "
zelloUrl: ws://127.0.0.1:1
zelloChannel: Ops
sourceId: 1001
destinationId: 2002
txMode: p25
zelloAuthToken: static-token
",
    )
    .unwrap();

    let mut session = ZelloSession::new(config).unwrap();
    assert!(!session.stop_reconnect());

    let result = session.reconnect().await;
    assert!(result.is_err());
    assert!(session.stop_reconnect());

    // Sticky: a further reconnect call fails immediately without retrying.
    let result = session.reconnect().await;
    assert!(result.is_err());
}
