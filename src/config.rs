//! Centralized configuration.
//!
//! Mirrors the teacher's flat `AudioConfig` record: every tunable lives in
//! one `Copy`-able struct with a `Default` impl, no external config-file
//! parsing.

// --- Fixed format constants ---

/// Output device and wire sample rate. Fixed — the core does not resample.
pub const SAMPLE_RATE: u32 = 48_000;

/// One mixer cycle produces this many mono samples per active channel
/// (40 ms at 48 kHz).
pub const MIXER_FRAME_SAMPLES: usize = 1_920;

/// Interleaved stereo samples written to the output sink per mixer cycle.
pub const OUTPUT_FRAME_SHORTS: usize = MIXER_FRAME_SAMPLES * 2;

/// Largest number of samples a single decoded frame may contain
/// (100 ms at 48 kHz). Governs the accumulation and codec scratch buffers.
pub const DECODER_MAX_SAMPLES: usize = 4_800;

/// Default jitter-gate threshold.
pub const DEFAULT_JITTER_GATE_FRAMES: usize = 5;

/// Bound on the per-channel jitter queue.
pub const MAX_QUEUE_FRAMES: usize = 20;

/// Linear fade-in/fade-out length (~1.3 ms at 48 kHz).
pub const FADE_SAMPLES: usize = 64;

/// How often (in mixer cycles) the idle sleep is retried while no channel
/// has produced output.
pub const IDLE_SLEEP: std::time::Duration = std::time::Duration::from_millis(5);

/// Keep-alive cadence.
pub const DEFAULT_KEEPALIVE_INTERVAL_MS: u64 = 10_000;

/// How many consecutive silent cycles before a channel's decoder state is
/// considered cold enough to log at debug rather than warn (not part of the
/// wire protocol — purely a logging throttle).
pub const MIXER_LOG_EVERY_N_CYCLES: u64 = 50;

/// Maximum size of a single inbound/outbound datagram.
pub const MAX_DATAGRAM_BYTES: usize = 8192;

/// Per-channel mixer panning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pan {
    Left,
    Center,
    Right,
}

impl Pan {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            Pan::Left => 0,
            Pan::Center => 1,
            Pan::Right => 2,
        }
    }

    pub(crate) fn from_u8(v: u8) -> Pan {
        match v {
            0 => Pan::Left,
            2 => Pan::Right,
            _ => Pan::Center,
        }
    }
}

/// Session-wide tunables, generalizing the teacher's `AudioConfig`.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base64-encoded 256-bit pre-shared key.
    pub key_base64: String,
    pub dest_host: String,
    pub dest_port: u16,
    /// Local port to bind the datagram socket to (0 = OS-assigned).
    pub bind_port: u16,
    pub jitter_gate_frames: usize,
    pub max_queue_frames: usize,
    pub fade_samples: usize,
    pub keepalive_interval_ms: u64,
    /// Apply noise suppression to captured microphone audio when available.
    pub enable_noise_suppression: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            key_base64: String::new(),
            dest_host: "127.0.0.1".to_string(),
            dest_port: 0,
            bind_port: 0,
            jitter_gate_frames: DEFAULT_JITTER_GATE_FRAMES,
            max_queue_frames: MAX_QUEUE_FRAMES,
            fade_samples: FADE_SAMPLES,
            keepalive_interval_ms: DEFAULT_KEEPALIVE_INTERVAL_MS,
            enable_noise_suppression: true,
        }
    }
}
