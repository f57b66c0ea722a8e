//! Fixed-rate software mixer: per-channel gain/pan, whole-frame peak
//! limiting, click-free fade-in/fade-out. The trickiest subsystem in
//! this crate — getting the gate, accumulation, and fade timing wrong
//! is what produces audible clicks and pops.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::channel::ChannelState;
use crate::config::{
    Pan, FADE_SAMPLES, IDLE_SLEEP, MIXER_FRAME_SAMPLES, MIXER_LOG_EVERY_N_CYCLES,
    OUTPUT_FRAME_SHORTS,
};
use crate::error::OutputError;
use crate::output::OutputSink;

pub type ChannelId = String;
pub type ChannelMap = DashMap<ChannelId, Arc<ChannelState>>;

/// Result of mixing a single channel for one cycle, used only to drive the
/// active-channel count and observability logging.
struct ChannelCycleResult {
    contributed: bool,
    underflowed: bool,
}

pub struct Mixer<S: OutputSink> {
    channels: Arc<ChannelMap>,
    sink: S,
    running: Arc<AtomicBool>,
    jitter_gate_frames: usize,
    fade_samples: usize,
    /// 32-bit interleaved stereo accumulator, reused every cycle — no
    /// per-cycle allocation on the real-time path.
    stereo_accum: Vec<i32>,
    cycle_index: u64,
    cycles_with_clipping: AtomicU64,
    /// Running total of underflow events across every channel, logged
    /// alongside each channel's own counter (spec.md §4.3 Observability).
    cumulative_underflows: AtomicU64,
}

impl<S: OutputSink> Mixer<S> {
    pub fn new(
        channels: Arc<ChannelMap>,
        sink: S,
        running: Arc<AtomicBool>,
        jitter_gate_frames: usize,
        fade_samples: usize,
    ) -> Self {
        Self {
            channels,
            sink,
            running,
            jitter_gate_frames,
            fade_samples,
            stereo_accum: vec![0i32; OUTPUT_FRAME_SHORTS],
            cycle_index: 0,
            cycles_with_clipping: AtomicU64::new(0),
            cumulative_underflows: AtomicU64::new(0),
        }
    }

    /// Runs the mixer loop until `running` is cleared. Exits after at most
    /// one output write.
    pub fn run(&mut self) {
        while self.running.load(Ordering::Relaxed) {
            let wrote = self.run_cycle();
            if !wrote {
                std::thread::sleep(IDLE_SLEEP);
            }
            if !self.running.load(Ordering::Relaxed) {
                break;
            }
        }
    }

    /// Runs exactly one mixer cycle. Returns whether a frame was written
    /// to the output sink (idle cycles with no contributing channel do
    /// not write — spec.md §4.3 "Idle behavior").
    pub fn run_cycle(&mut self) -> bool {
        for s in self.stereo_accum.iter_mut() {
            *s = 0;
        }

        let mut active_channels = 0usize;
        let mut underflows_this_cycle = 0usize;

        // Snapshot of the channel set at cycle start.
        let snapshot: Vec<(ChannelId, Arc<ChannelState>)> = self
            .channels
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        for (id, channel) in &snapshot {
            let result = self.mix_channel(id, channel.as_ref());
            if result.contributed {
                active_channels += 1;
            }
            if result.underflowed {
                underflows_this_cycle += 1;
            }
        }

        if underflows_this_cycle > 0 {
            self.cumulative_underflows
                .fetch_add(underflows_this_cycle as u64, Ordering::Relaxed);
        }

        self.cycle_index += 1;

        if active_channels == 0 {
            return false;
        }

        let peak = self.stereo_accum.iter().map(|s| s.unsigned_abs()).max().unwrap_or(0);
        let clipped = peak > i16::MAX as u32;
        if clipped {
            let scale = i16::MAX as f64 / peak as f64;
            for s in self.stereo_accum.iter_mut() {
                *s = (*s as f64 * scale).round() as i32;
            }
            self.cycles_with_clipping.fetch_add(1, Ordering::Relaxed);
        }

        let mut out = vec![0i16; OUTPUT_FRAME_SHORTS];
        for (dst, &src) in out.iter_mut().zip(self.stereo_accum.iter()) {
            *dst = src.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        }

        if let Err(e) = self.write_output(&out) {
            log::error!("output sink write failed: {e}");
        }

        if self.cycle_index % MIXER_LOG_EVERY_N_CYCLES == 0 {
            let queue_sizes: Vec<String> = snapshot
                .iter()
                .map(|(id, channel)| format!("{id}={}", channel.queue.len()))
                .collect();
            log::info!(
                "mixer cycle={} active_channels={} samples_written={} peak={} clipped={} underflows_this_cycle={} cumulative_underflows={} queue_sizes=[{}]",
                self.cycle_index,
                active_channels,
                OUTPUT_FRAME_SHORTS,
                peak,
                clipped,
                underflows_this_cycle,
                self.cumulative_underflows.load(Ordering::Relaxed),
                queue_sizes.join(","),
            );
        }

        true
    }

    fn write_output(&mut self, samples: &[i16]) -> Result<usize, OutputError> {
        self.sink.write_blocking(samples)
    }

    fn mix_channel(&mut self, channel_id: &str, channel: &ChannelState) -> ChannelCycleResult {
        // 1. Gate check.
        if !channel.gate_is_open() {
            if channel.queue.len() < self.jitter_gate_frames {
                return ChannelCycleResult {
                    contributed: false,
                    underflowed: false,
                };
            }
            channel.open_gate();
        }

        let mut mp = channel.mixer_private.lock().unwrap();

        // 2. Accumulate: drain frames until >= MIXER_FRAME_SAMPLES or the
        // queue is empty.
        while mp.accumulation.count < MIXER_FRAME_SAMPLES {
            match channel.queue.pop() {
                Some(frame) => {
                    mp.accumulation.push(frame.as_slice());
                }
                None => break,
            }
        }

        let volume = channel.volume();
        let pan = channel.pan();

        // 3. Mix-or-skip.
        if mp.accumulation.count >= MIXER_FRAME_SAMPLES {
            // Fade in only when resuming after a genuine underflow gap —
            // the channel's very first-ever emitted frame (gate just
            // opened, never streamed before) plays at full volume from
            // sample 0, per spec.md's E1 scenario.
            let first_after_gap = mp.ever_streamed && !mp.had_data_last_cycle;
            let fade_samples = self.fade_samples.min(MIXER_FRAME_SAMPLES);

            for i in 0..MIXER_FRAME_SAMPLES {
                let raw = mp.accumulation.samples[i] as f32 * volume;
                let gain = if first_after_gap && i < fade_samples {
                    i as f32 / fade_samples as f32
                } else {
                    1.0
                };
                let sample = (raw * gain) as i32;
                self.route_sample(i, sample, pan);
            }

            mp.last_sample = mp.accumulation.samples[MIXER_FRAME_SAMPLES - 1];
            mp.accumulation.consume_front(MIXER_FRAME_SAMPLES);
            mp.had_data_last_cycle = true;
            mp.ever_streamed = true;

            ChannelCycleResult {
                contributed: true,
                underflowed: false,
            }
        } else if mp.had_data_last_cycle && mp.last_sample != 0 {
            // Fade-out from last_sample to 0, click-free.
            let fade_samples = self.fade_samples.min(MIXER_FRAME_SAMPLES);
            let last_sample_before = mp.last_sample;
            let accumulation_count_before = mp.accumulation.count;
            let last = mp.last_sample as f32 * volume;
            for i in 0..fade_samples {
                let factor = 1.0 - (i as f32 / fade_samples as f32);
                let sample = (last * factor) as i32;
                self.route_sample(i, sample, pan);
            }
            mp.had_data_last_cycle = false;
            mp.last_sample = 0;
            channel.record_underflow();
            log::warn!(
                "channel={channel_id} underflow cumulative_underflows={} last_sample={last_sample_before} accumulation_count={accumulation_count_before}",
                channel.underflow_count(),
            );

            ChannelCycleResult {
                contributed: true,
                underflowed: true,
            }
        } else {
            ChannelCycleResult {
                contributed: false,
                underflowed: false,
            }
        }
    }

    /// Routes one mono sample into the stereo accumulator according to
    /// pan: LEFT -> even index only, RIGHT -> odd index only, CENTER ->
    /// both.
    fn route_sample(&mut self, mono_index: usize, sample: i32, pan: Pan) {
        let left_idx = mono_index * 2;
        let right_idx = left_idx + 1;
        match pan {
            Pan::Left => self.stereo_accum[left_idx] += sample,
            Pan::Right => self.stereo_accum[right_idx] += sample,
            Pan::Center => {
                self.stereo_accum[left_idx] += sample;
                self.stereo_accum[right_idx] += sample;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelState;
    use crate::codec::VoiceDecoder;
    use crate::config::MAX_QUEUE_FRAMES;
    use crate::error::OutputError;
    use crate::pcm::PcmFrame;

    fn new_channel() -> Arc<ChannelState> {
        Arc::new(ChannelState::new(VoiceDecoder::new().unwrap(), MAX_QUEUE_FRAMES))
    }

    fn push_frames(channel: &ChannelState, count: usize, value: i16) {
        for _ in 0..count {
            channel.queue.push(PcmFrame::from_slice(&[value; MIXER_FRAME_SAMPLES]));
        }
    }

    /// Records every frame written to it, for assertions on emitted sample
    /// values (the real `NullOutputSink` only tracks a running count).
    #[derive(Default)]
    struct CapturingSink {
        frames: Vec<Vec<i16>>,
    }

    impl OutputSink for CapturingSink {
        fn write_blocking(&mut self, samples: &[i16]) -> Result<usize, OutputError> {
            self.frames.push(samples.to_vec());
            Ok(samples.len())
        }
    }

    #[test]
    fn single_channel_constant_value_mixes_to_both_sides() {
        let channels: Arc<ChannelMap> = Arc::new(DashMap::new());
        let channel = new_channel();
        push_frames(&channel, 5, 1000);
        channels.insert("A".to_string(), channel);

        let running = Arc::new(AtomicBool::new(true));
        let mut mixer = Mixer::new(channels, CapturingSink::default(), running, 5, FADE_SAMPLES);

        // First cycle: gate not yet open (needs 5 queued frames - exactly
        // met), opens and mixes immediately.
        assert!(mixer.run_cycle());
        let frame = &mixer.sink.frames[0];
        assert_eq!(frame.len(), OUTPUT_FRAME_SHORTS);
        // E1: the channel's very first-ever emitted frame has no fade-in —
        // every stereo slot on both sides equals the source sample from
        // sample 0, since this is not a resume after an underflow gap.
        for i in 0..MIXER_FRAME_SAMPLES {
            assert_eq!(frame[i * 2], 1000, "left sample {i}");
            assert_eq!(frame[i * 2 + 1], 1000, "right sample {i}");
        }
    }

    #[test]
    fn gate_stays_closed_below_threshold() {
        let channels: Arc<ChannelMap> = Arc::new(DashMap::new());
        let channel = new_channel();
        push_frames(&channel, 4, 1000); // one short of JITTER_GATE_FRAMES=5
        channels.insert("A".to_string(), channel.clone());

        let running = Arc::new(AtomicBool::new(true));
        let mut mixer = Mixer::new(channels, CapturingSink::default(), running, 5, FADE_SAMPLES);

        assert!(!mixer.run_cycle(), "gate must not open below the threshold");
        assert!(!channel.gate_is_open());
        assert_eq!(channel.queue.len(), 4, "frames must stay queued, not drained, while gated closed");
    }

    #[test]
    fn two_channels_left_right_pan_with_independent_volume() {
        // E2: "A" pan LEFT volume 1.0 at 10000, "B" pan RIGHT volume 0.5 at
        // 20000, each fed as 5 x 960-sample frames (4800 samples total,
        // also satisfying the 5-frame jitter gate). Expect left == 10000,
        // right == 10000 (20000 * 0.5), across floor(4800/1920) = 2 mixer
        // frames, with 960 residual samples left queued afterward.
        let channels: Arc<ChannelMap> = Arc::new(DashMap::new());

        let a = new_channel();
        a.set_pan(Pan::Left);
        a.set_volume(1.0);
        for _ in 0..5 {
            a.queue.push(PcmFrame::from_slice(&[10000i16; 960]));
        }
        channels.insert("A".to_string(), a.clone());

        let b = new_channel();
        b.set_pan(Pan::Right);
        b.set_volume(0.5);
        for _ in 0..5 {
            b.queue.push(PcmFrame::from_slice(&[20000i16; 960]));
        }
        channels.insert("B".to_string(), b.clone());

        let running = Arc::new(AtomicBool::new(true));
        let mut mixer = Mixer::new(channels, CapturingSink::default(), running, 5, 0);

        for _ in 0..2 {
            assert!(mixer.run_cycle());
            let frame = mixer.sink.frames.last().unwrap();
            for i in 0..MIXER_FRAME_SAMPLES {
                assert_eq!(frame[i * 2], 10000, "left sample {i}");
                assert_eq!(frame[i * 2 + 1], 10000, "right sample {i}");
            }
        }

        // 4800 - 2*1920 = 960 samples left over, sitting as one undrained
        // queue entry (the accumulation buffer itself is fully consumed
        // each cycle since 960 divides 1920 evenly).
        assert_eq!(a.mixer_private.lock().unwrap().accumulation.count, 0);
        assert_eq!(a.queue.len(), 1);
        assert_eq!(b.queue.len(), 1);
    }

    #[test]
    fn peak_limiter_scales_whole_frame_uniformly() {
        // Invariant 11: two CENTER channels at full-scale volume 1.0 sum to
        // 2x INT16_MAX; the limiter must scale by exactly 0.5.
        let channels: Arc<ChannelMap> = Arc::new(DashMap::new());
        let a = new_channel();
        push_frames(&a, 5, i16::MAX);
        channels.insert("A".to_string(), a);
        let b = new_channel();
        push_frames(&b, 5, i16::MAX);
        channels.insert("B".to_string(), b);

        let running = Arc::new(AtomicBool::new(true));
        let mut mixer = Mixer::new(channels, CapturingSink::default(), running, 5, 0);

        assert!(mixer.run_cycle());
        let frame = &mixer.sink.frames[0];
        let peak = frame.iter().map(|&s| (s as i32).unsigned_abs()).max().unwrap();
        assert_eq!(peak, i16::MAX as u32);
        assert_eq!(mixer.cycles_with_clipping.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn underflow_emits_fade_out_then_silence() {
        // E3: 5 frames play out, then nothing arrives. The first starved
        // cycle fades from the last sample to zero; later cycles are pure
        // silence but keep producing idle (non-writing) cycles rather than
        // starving.
        let channels: Arc<ChannelMap> = Arc::new(DashMap::new());
        let channel = new_channel();
        push_frames(&channel, 5, 500);
        channels.insert("A".to_string(), channel.clone());

        let running = Arc::new(AtomicBool::new(true));
        let mut mixer = Mixer::new(channels, CapturingSink::default(), running, 5, FADE_SAMPLES);

        // 5 queued 1920-sample frames drain one per cycle (invariant 6):
        // 5 full frames, no underflow yet.
        for _ in 0..5 {
            assert!(mixer.run_cycle());
        }
        assert_eq!(channel.underflow_count(), 0);

        assert!(mixer.run_cycle()); // queue now empty: fade-out cycle
        assert_eq!(channel.underflow_count(), 1);
        let fade_frame = mixer.sink.frames.last().unwrap();
        assert_eq!(fade_frame[0], 500, "fade-out starts at the last emitted sample");
        assert!(
            fade_frame[(FADE_SAMPLES - 1) * 2] < 500,
            "fade-out ramp must be decreasing"
        );
        assert_eq!(
            fade_frame[FADE_SAMPLES * 2],
            0,
            "samples past the ramp length are untouched silence"
        );

        // No more data and no prior fade pending: the channel contributes
        // nothing and the cycle does not write.
        assert!(!mixer.run_cycle());
    }
}
