//! Ingress pipeline: one blocking datagram reader that classifies packets
//! by `type` and feeds the per-channel jitter queue.
//!
//! Runs on its own OS thread. Must never block the mixer — enqueue is
//! non-blocking and overflow drops the oldest frame.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::codec::VoiceDecoder;
use crate::config::MAX_DATAGRAM_BYTES;
use crate::crypto::Crypto;
use crate::error::WireError;
use crate::mixer::ChannelMap;
use crate::pcm::PcmFrame;
use crate::wire::{parse_envelope, WireEnvelope};

/// Runs the receive loop until `running` is cleared or the socket is
/// closed out from under the thread.
pub fn run_receiver(
    socket: UdpSocket,
    channels: Arc<ChannelMap>,
    crypto: Crypto,
    running: Arc<AtomicBool>,
    started_at: Instant,
    unattributed_malformed: Arc<AtomicU64>,
) {
    let mut buf = [0u8; MAX_DATAGRAM_BYTES];
    while running.load(Ordering::Relaxed) {
        let len = match socket.recv_from(&mut buf) {
            Ok((len, _from)) => len,
            Err(_) => {
                // Socket closed or unrecoverable I/O error: surface by
                // exiting the loop.
                break;
            }
        };
        process_datagram(&buf[..len], &channels, &crypto, started_at, &unattributed_malformed);
    }
}

/// spec.md §7's "Malformed datagram ... Count, discard" policy: a datagram
/// whose `channel_id` is recoverable is counted against that channel
/// (`ChannelState::record_dropped_malformed`); one that isn't valid JSON at
/// all (no `channel_id` to attribute it to) bumps the session-wide
/// `unattributed_malformed` counter instead.
fn process_datagram(
    payload: &[u8],
    channels: &ChannelMap,
    crypto: &Crypto,
    started_at: Instant,
    unattributed_malformed: &AtomicU64,
) {
    let envelope = match parse_envelope(payload) {
        Ok(e) => e,
        Err(WireError::InvalidBase64 { channel_id }) => {
            match channels.get(&channel_id) {
                Some(channel) => channel.record_dropped_malformed(),
                None => {
                    unattributed_malformed.fetch_add(1, Ordering::Relaxed);
                }
            }
            return;
        }
        Err(WireError::InvalidJson) | Err(WireError::MissingField) => {
            unattributed_malformed.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };

    let (channel_id, framed) = match envelope {
        WireEnvelope::Audio { channel_id, framed } => (channel_id, framed),
        WireEnvelope::KeepAlive | WireEnvelope::Unknown => return,
    };

    let Some(channel) = channels.get(&channel_id) else {
        return; // not an active channel — discard
    };
    let channel = channel.value().clone();

    let plaintext = match crypto.decrypt(&framed) {
        Ok(p) => p,
        Err(_) => {
            channel.record_dropped_auth();
            return;
        }
    };

    channel.record_packet_received();

    let decoded = {
        let mut decoder = channel.decoder.lock().unwrap();
        decoder.decode(Some(&plaintext))
    };

    let frame: PcmFrame = match decoded {
        Ok(frame) if !frame.is_empty() => frame,
        _ => {
            channel.record_dropped_decode();
            return;
        }
    };

    if channel.queue.push(frame) {
        channel.record_queue_overflow();
    }

    channel.touch_activity(started_at.elapsed().as_millis() as u64);
}

/// Exposed for per-channel decoder construction at `add_channel` time —
/// kept separate from `run_receiver` so the session can fail fast on
/// codec init error.
pub fn new_decoder() -> Result<VoiceDecoder, crate::error::CodecError> {
    VoiceDecoder::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelState;
    use crate::codec::VoiceEncoder;
    use crate::config::MAX_QUEUE_FRAMES;
    use crate::crypto::AudioKey;
    use crate::wire::encode_audio_envelope;
    use dashmap::DashMap;

    fn test_crypto() -> Crypto {
        Crypto::new(AudioKey::from_bytes([3u8; 32])).unwrap()
    }

    #[test]
    fn unknown_channel_is_discarded_without_panic() {
        let channels: ChannelMap = DashMap::new();
        let crypto = test_crypto();
        let packet = encode_audio_envelope("ghost", &crypto.encrypt(b"anything").unwrap());
        // Must not panic even though "ghost" is not in the map.
        process_datagram(&packet, &channels, &crypto, Instant::now(), &AtomicU64::new(0));
        assert!(channels.is_empty());
    }

    #[test]
    fn invalid_json_increments_session_wide_counter_only() {
        let channels: ChannelMap = DashMap::new();
        let crypto = test_crypto();
        let channel = Arc::new(ChannelState::new(VoiceDecoder::new().unwrap(), MAX_QUEUE_FRAMES));
        channels.insert("room".to_string(), channel.clone());
        let unattributed = AtomicU64::new(0);

        process_datagram(b"not json at all", &channels, &crypto, Instant::now(), &unattributed);

        assert_eq!(unattributed.load(Ordering::Relaxed), 1);
        assert_eq!(channel.stats().packets_dropped_malformed, 0);
    }

    #[test]
    fn invalid_base64_with_known_channel_increments_that_channels_counter() {
        let channels: ChannelMap = DashMap::new();
        let crypto = test_crypto();
        let channel = Arc::new(ChannelState::new(VoiceDecoder::new().unwrap(), MAX_QUEUE_FRAMES));
        channels.insert("room".to_string(), channel.clone());
        let unattributed = AtomicU64::new(0);

        let datagram = br#"{"type":"audio","channel_id":"room","data":"not-base64!!"}"#;
        process_datagram(datagram, &channels, &crypto, Instant::now(), &unattributed);

        assert_eq!(channel.stats().packets_dropped_malformed, 1);
        assert_eq!(unattributed.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn valid_audio_packet_enqueues_a_frame() {
        let channels: ChannelMap = DashMap::new();
        let crypto = test_crypto();
        let channel = Arc::new(ChannelState::new(VoiceDecoder::new().unwrap(), MAX_QUEUE_FRAMES));
        channels.insert("room".to_string(), channel.clone());

        let mut encoder = VoiceEncoder::new().unwrap();
        let pcm = vec![0i16; 960];
        let opus_packet = encoder.encode(&pcm).unwrap();
        let framed = crypto.encrypt(&opus_packet).unwrap();
        let datagram = encode_audio_envelope("room", &framed);

        process_datagram(&datagram, &channels, &crypto, Instant::now(), &AtomicU64::new(0));

        assert_eq!(channel.queue.len(), 1);
        assert_eq!(channel.stats().packets_received, 1);
    }

    #[test]
    fn bit_flipped_tag_increments_auth_counter_and_does_not_decode() {
        let channels: ChannelMap = DashMap::new();
        let crypto = test_crypto();
        let channel = Arc::new(ChannelState::new(VoiceDecoder::new().unwrap(), MAX_QUEUE_FRAMES));
        channels.insert("room".to_string(), channel.clone());

        let mut encoder = VoiceEncoder::new().unwrap();
        let opus_packet = encoder.encode(&vec![0i16; 960]).unwrap();
        let mut framed = crypto.encrypt(&opus_packet).unwrap();
        let last = framed.len() - 1;
        framed[last] ^= 0x01;
        let datagram = encode_audio_envelope("room", &framed);

        process_datagram(&datagram, &channels, &crypto, Instant::now(), &AtomicU64::new(0));

        assert_eq!(channel.queue.len(), 0);
        assert_eq!(channel.stats().packets_dropped_auth, 1);
    }

    #[test]
    fn garbage_plaintext_increments_decode_counter() {
        let channels: ChannelMap = DashMap::new();
        let crypto = test_crypto();
        let channel = Arc::new(ChannelState::new(VoiceDecoder::new().unwrap(), MAX_QUEUE_FRAMES));
        channels.insert("room".to_string(), channel.clone());

        let framed = crypto.encrypt(&[7u8; 16]).unwrap();
        let datagram = encode_audio_envelope("room", &framed);

        process_datagram(&datagram, &channels, &crypto, Instant::now(), &AtomicU64::new(0));

        assert_eq!(channel.queue.len(), 0);
        assert_eq!(channel.stats().packets_dropped_decode, 1);
    }

    #[test]
    fn queue_overflow_drops_oldest_and_counts() {
        let channels: ChannelMap = DashMap::new();
        let crypto = test_crypto();
        let channel = Arc::new(ChannelState::new(VoiceDecoder::new().unwrap(), MAX_QUEUE_FRAMES));
        channels.insert("room".to_string(), channel.clone());

        let mut encoder = VoiceEncoder::new().unwrap();
        let opus_packet = encoder.encode(&vec![0i16; 960]).unwrap();

        for _ in 0..25 {
            let framed = crypto.encrypt(&opus_packet).unwrap();
            let datagram = encode_audio_envelope("room", &framed);
            process_datagram(&datagram, &channels, &crypto, Instant::now(), &AtomicU64::new(0));
        }

        assert_eq!(channel.queue.len(), MAX_QUEUE_FRAMES);
        assert_eq!(channel.stats().queue_overflows, 5);
    }
}
