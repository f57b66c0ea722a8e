//! Voice codec adapter. Consumed as an opaque `init / encode / decode /
//! close` capability — wraps `audiopus`, the Opus binding
//! already used for this exact role by `paracord-codec` in this pack.

use audiopus::coder::{Decoder as OpusDecoder, Encoder as OpusEncoder};
use audiopus::{Application, Channels, SampleRate};

use crate::config::DECODER_MAX_SAMPLES;
use crate::error::CodecError;
use crate::pcm::PcmFrame;

/// Per-channel encoder instance, 48 kHz mono.
pub struct VoiceEncoder {
    inner: OpusEncoder,
}

impl VoiceEncoder {
    pub fn new() -> Result<Self, CodecError> {
        let inner = OpusEncoder::new(SampleRate::Hz48000, Channels::Mono, Application::Voip)
            .map_err(|_| CodecError::EncoderInit)?;
        Ok(Self { inner })
    }

    /// Encodes one frame of mono PCM into an Opus packet.
    pub fn encode(&mut self, pcm: &[i16]) -> Result<Vec<u8>, CodecError> {
        let mut out = vec![0u8; 1024];
        let len = self
            .inner
            .encode(pcm, &mut out)
            .map_err(|_| CodecError::EncodeFailed)?;
        out.truncate(len);
        Ok(out)
    }
}

/// Per-channel decoder instance, 48 kHz mono, scratch sized for the
/// largest frame the wire can carry.
pub struct VoiceDecoder {
    inner: OpusDecoder,
}

impl VoiceDecoder {
    pub fn new() -> Result<Self, CodecError> {
        let inner =
            OpusDecoder::new(SampleRate::Hz48000, Channels::Mono).map_err(|_| CodecError::DecoderInit)?;
        Ok(Self { inner })
    }

    /// Decodes one Opus packet. `data = None` requests packet-loss
    /// concealment for a frame known to be lost (grounded on the teacher's
    /// `decoder.decode(&[], &mut buf, true)` FEC call).
    pub fn decode(&mut self, data: Option<&[u8]>) -> Result<PcmFrame, CodecError> {
        let mut scratch = [0i16; DECODER_MAX_SAMPLES];
        let fec = data.is_none();
        let len = self
            .inner
            .decode(data, &mut scratch, fec)
            .map_err(|_| CodecError::DecodeFailed)?;
        if len == 0 {
            return Err(CodecError::EmptyDecode);
        }
        Ok(PcmFrame::from_slice(&scratch[..len]))
    }
}
