//! Per-channel runtime state.
//!
//! Volume/pan/gate/last-activity are atomics so the receiver thread and
//! the mixer thread can touch them without a lock; the
//! accumulation buffer, had-data flag, and last-sample are mixer-private
//! and carry no synchronization at all. The `f32`-as-`AtomicU32` trick for
//! volume is grounded on `enscrypted-gecko::stream::SharedState`.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;

use crate::codec::VoiceDecoder;
use crate::config::{Pan, DECODER_MAX_SAMPLES};
use crate::jitter::JitterQueue;

/// Snapshot returned by `session.stats(id)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelStats {
    pub packets_received: u64,
    pub packets_dropped_malformed: u64,
    pub packets_dropped_auth: u64,
    pub packets_dropped_decode: u64,
    pub queue_overflows: u64,
    pub underflows: u64,
    pub queue_size: usize,
    pub last_activity_ms: u64,
}

#[derive(Default)]
struct Counters {
    packets_received: AtomicU64,
    packets_dropped_malformed: AtomicU64,
    packets_dropped_auth: AtomicU64,
    packets_dropped_decode: AtomicU64,
    queue_overflows: AtomicU64,
    underflows: AtomicU64,
}

/// Mixer-private scratch: up to two maximum-size decoded frames' worth of
/// samples, plus a valid-sample count.
pub struct AccumulationBuffer {
    pub samples: [i16; DECODER_MAX_SAMPLES * 2],
    pub count: usize,
}

impl Default for AccumulationBuffer {
    fn default() -> Self {
        Self {
            samples: [0i16; DECODER_MAX_SAMPLES * 2],
            count: 0,
        }
    }
}

impl AccumulationBuffer {
    /// Appends as many samples as fit; returns the number actually
    /// appended (the jitter queue drain loop checks this against the
    /// source frame's length to know whether it was fully consumed).
    pub fn push(&mut self, data: &[i16]) -> usize {
        let space = self.samples.len() - self.count;
        let n = data.len().min(space);
        self.samples[self.count..self.count + n].copy_from_slice(&data[..n]);
        self.count += n;
        n
    }

    /// Shifts `[frame_size..count)` to the front after a mix cycle
    /// consumes the first `frame_size` samples.
    pub fn consume_front(&mut self, frame_size: usize) {
        let consumed = frame_size.min(self.count);
        let remaining = self.count - consumed;
        self.samples.copy_within(consumed..self.count, 0);
        self.count = remaining;
    }
}

/// Mixer-only bookkeeping that must persist across cycles but needs no
/// synchronization — only the mixer thread ever touches it.
pub struct MixerPrivate {
    pub accumulation: AccumulationBuffer,
    pub had_data_last_cycle: bool,
    pub last_sample: i16,
    pub fade_in_remaining: usize,
    /// Set the first time this channel ever completes a mix. Distinguishes
    /// the channel's very first emitted frame (no fade-in) from a resume
    /// after a genuine underflow gap (fade-in applies).
    pub ever_streamed: bool,
}

impl Default for MixerPrivate {
    fn default() -> Self {
        Self {
            accumulation: AccumulationBuffer::default(),
            had_data_last_cycle: false,
            last_sample: 0,
            fade_in_remaining: 0,
            ever_streamed: false,
        }
    }
}

/// One active channel's full runtime state. Owned by the session, shared between the receiver thread
/// (write-only enqueue + counters) and the mixer thread (read + mixer-
/// private mutation) via `Arc`.
pub struct ChannelState {
    volume_bits: AtomicU32,
    pan: AtomicU8,
    gate_open: AtomicBool,
    last_activity_ms: AtomicU64,
    counters: Counters,
    pub queue: JitterQueue,
    pub decoder: Mutex<VoiceDecoder>,
    pub mixer_private: Mutex<MixerPrivate>,
}

impl ChannelState {
    pub fn new(decoder: VoiceDecoder, max_queue_frames: usize) -> Self {
        Self {
            volume_bits: AtomicU32::new(1.0f32.to_bits()),
            pan: AtomicU8::new(Pan::Center.to_u8()),
            gate_open: AtomicBool::new(false),
            last_activity_ms: AtomicU64::new(0),
            counters: Counters::default(),
            queue: JitterQueue::new(max_queue_frames),
            decoder: Mutex::new(decoder),
            mixer_private: Mutex::new(MixerPrivate::default()),
        }
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume_bits.load(Ordering::Relaxed))
    }

    /// Clamps to [0.0, 1.0] on set.
    pub fn set_volume(&self, v: f32) {
        let clamped = v.clamp(0.0, 1.0);
        self.volume_bits.store(clamped.to_bits(), Ordering::Relaxed);
    }

    pub fn pan(&self) -> Pan {
        Pan::from_u8(self.pan.load(Ordering::Relaxed))
    }

    pub fn set_pan(&self, pan: Pan) {
        self.pan.store(pan.to_u8(), Ordering::Relaxed);
    }

    pub fn gate_is_open(&self) -> bool {
        self.gate_open.load(Ordering::Relaxed)
    }

    /// Monotonic: once opened, a channel's gate never closes again
    ///.
    pub fn open_gate(&self) {
        self.gate_open.store(true, Ordering::Relaxed);
    }

    pub fn touch_activity(&self, now_ms: u64) {
        self.last_activity_ms.store(now_ms, Ordering::Relaxed);
    }

    pub fn last_activity_ms(&self) -> u64 {
        self.last_activity_ms.load(Ordering::Relaxed)
    }

    pub fn record_packet_received(&self) {
        self.counters.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_malformed(&self) {
        self.counters
            .packets_dropped_malformed
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_auth(&self) {
        self.counters.packets_dropped_auth.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_decode(&self) {
        self.counters
            .packets_dropped_decode
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_queue_overflow(&self) {
        self.counters.queue_overflows.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_underflow(&self) {
        self.counters.underflows.fetch_add(1, Ordering::Relaxed);
    }

    pub fn underflow_count(&self) -> u64 {
        self.counters.underflows.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            packets_received: self.counters.packets_received.load(Ordering::Relaxed),
            packets_dropped_malformed: self.counters.packets_dropped_malformed.load(Ordering::Relaxed),
            packets_dropped_auth: self.counters.packets_dropped_auth.load(Ordering::Relaxed),
            packets_dropped_decode: self.counters.packets_dropped_decode.load(Ordering::Relaxed),
            queue_overflows: self.counters.queue_overflows.load(Ordering::Relaxed),
            underflows: self.counters.underflows.load(Ordering::Relaxed),
            queue_size: self.queue.len(),
            last_activity_ms: self.last_activity_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_clamps_on_set() {
        let state = ChannelState::new(VoiceDecoder::new().unwrap(), 20);
        state.set_volume(2.5);
        assert_eq!(state.volume(), 1.0);
        state.set_volume(-1.0);
        assert_eq!(state.volume(), 0.0);
        state.set_volume(0.5);
        assert_eq!(state.volume(), 0.5);
    }

    #[test]
    fn gate_is_monotonic() {
        let state = ChannelState::new(VoiceDecoder::new().unwrap(), 20);
        assert!(!state.gate_is_open());
        state.open_gate();
        assert!(state.gate_is_open());
        // No API exists to close it again; re-opening is a no-op.
        state.open_gate();
        assert!(state.gate_is_open());
    }

    #[test]
    fn accumulation_buffer_shifts_residual_to_front() {
        let mut buf = AccumulationBuffer::default();
        buf.push(&[1, 2, 3, 4, 5]);
        buf.consume_front(3);
        assert_eq!(buf.count, 2);
        assert_eq!(&buf.samples[..2], &[4, 5]);
    }
}
