//! Fixed-capacity PCM frame — avoids per-frame heap allocation on the
//! ingress and mixer hot paths. Grounded on the teacher's
//! `buffer: [i16; MAX_BUFFER_SIZE]` scratch field and
//! `CambrianTech-continuum`'s `audio_frame: [i16; FRAME_SIZE]`.

use crate::config::DECODER_MAX_SAMPLES;

/// An ordered sequence of signed 16-bit samples at 48 kHz mono, plus the
/// count of valid samples.
#[derive(Clone)]
pub struct PcmFrame {
    samples: [i16; DECODER_MAX_SAMPLES],
    len: usize,
}

impl PcmFrame {
    pub fn from_slice(data: &[i16]) -> Self {
        debug_assert!(data.len() <= DECODER_MAX_SAMPLES);
        let mut samples = [0i16; DECODER_MAX_SAMPLES];
        let len = data.len().min(DECODER_MAX_SAMPLES);
        samples[..len].copy_from_slice(&data[..len]);
        Self { samples, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[i16] {
        &self.samples[..self.len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_oversized_input() {
        let data = vec![1i16; DECODER_MAX_SAMPLES + 10];
        let frame = PcmFrame::from_slice(&data);
        assert_eq!(frame.len(), DECODER_MAX_SAMPLES);
    }

    #[test]
    fn preserves_order() {
        let data = vec![1i16, 2, 3, 4];
        let frame = PcmFrame::from_slice(&data);
        assert_eq!(frame.as_slice(), &[1, 2, 3, 4]);
    }
}
