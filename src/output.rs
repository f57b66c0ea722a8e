//! Output sink: single stereo 16-bit PCM device at 48 kHz, blocking
//! writes pace the mixer.
//!
//! The teacher drives hardware via an `oboe::AudioOutputCallback`
//! (Android-only, callback-pulled). This crate targets a generic
//! desktop/cross-platform runtime, so the device layer is `cpal` — the
//! same crate `dataO1-Mesh::cpal_backend` uses for exactly this role —
//! while preserving the spec's required clock: the mixer thread blocks
//! on `write_blocking` until the device has drained enough of an
//! `rtrb` ring buffer, never on a timer.

use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use rtrb::RingBuffer;

use crate::config::OUTPUT_FRAME_SHORTS;
use crate::error::OutputError;

/// Minimum ring buffer headroom: ~320ms at 48kHz stereo.
const RING_BUFFER_SLOTS: usize = OUTPUT_FRAME_SHORTS * 2 * 8;

const WRITE_POLL_INTERVAL: Duration = Duration::from_millis(1);

pub trait OutputSink: Send {
    /// Blocking write of exactly `samples.len()` interleaved stereo i16
    /// samples. Paces the caller at hardware playback rate.
    fn write_blocking(&mut self, samples: &[i16]) -> Result<usize, OutputError>;
}

/// Real cpal-backed sink. Holds the `Stream` alive for the session's
/// lifetime; dropping it releases the device.
pub struct CpalOutputSink {
    _stream: Stream,
    producer: rtrb::Producer<i16>,
}

impl CpalOutputSink {
    pub fn open(sample_rate: u32) -> Result<Self, OutputError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(OutputError::NoDevice)?;

        let supported = device
            .supported_output_configs()
            .map_err(|_| OutputError::DeviceOpen)?
            .find(|c| c.channels() == 2 && c.sample_format() == SampleFormat::I16)
            .or_else(|| {
                device
                    .supported_output_configs()
                    .ok()
                    .and_then(|mut it| it.find(|c| c.channels() == 2))
            })
            .ok_or(OutputError::DeviceOpen)?;

        let stream_config = StreamConfig {
            channels: 2,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let sample_format = supported.sample_format();

        let (producer, mut consumer) = RingBuffer::<i16>::new(RING_BUFFER_SLOTS);

        let err_fn = |err| log::error!("output stream error: {err}");

        let stream = match sample_format {
            SampleFormat::I16 => device
                .build_output_stream(
                    &stream_config,
                    move |data: &mut [i16], _| {
                        for slot in data.iter_mut() {
                            *slot = consumer.pop().unwrap_or(0);
                        }
                    },
                    err_fn,
                    None,
                )
                .map_err(|_| OutputError::DeviceOpen)?,
            SampleFormat::F32 => device
                .build_output_stream(
                    &stream_config,
                    move |data: &mut [f32], _| {
                        for slot in data.iter_mut() {
                            let sample = consumer.pop().unwrap_or(0);
                            *slot = sample as f32 / i16::MAX as f32;
                        }
                    },
                    err_fn,
                    None,
                )
                .map_err(|_| OutputError::DeviceOpen)?,
            _ => return Err(OutputError::DeviceOpen),
        };

        stream.play().map_err(|_| OutputError::DeviceOpen)?;

        Ok(Self {
            _stream: stream,
            producer,
        })
    }
}

impl OutputSink for CpalOutputSink {
    fn write_blocking(&mut self, samples: &[i16]) -> Result<usize, OutputError> {
        let mut written = 0;
        while written < samples.len() {
            match self.producer.push(samples[written]) {
                Ok(()) => written += 1,
                Err(_) => {
                    // Ring buffer full: the device hasn't drained enough
                    // yet. This sleep-poll is the mixer's clock — it
                    // blocks for as long as the hardware needs, never a
                    // fixed timer.
                    std::thread::sleep(WRITE_POLL_INTERVAL);
                }
            }
        }
        Ok(written)
    }
}

/// No-op sink for tests and headless operation: writes return
/// immediately, letting mixer logic be exercised without a real device.
#[derive(Default)]
pub struct NullOutputSink {
    pub total_written: usize,
}

impl OutputSink for NullOutputSink {
    fn write_blocking(&mut self, samples: &[i16]) -> Result<usize, OutputError> {
        self.total_written += samples.len();
        Ok(samples.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_sink_accepts_full_frame() {
        let mut sink = NullOutputSink::default();
        let frame = vec![0i16; OUTPUT_FRAME_SHORTS];
        let written = sink.write_blocking(&frame).unwrap();
        assert_eq!(written, OUTPUT_FRAME_SHORTS);
        assert_eq!(sink.total_written, OUTPUT_FRAME_SHORTS);
    }
}
