//! Transmit pipeline: capture -> encode -> encrypt -> datagram emit
//!, the mirror image of the ingress pipeline.
//!
//! Capture uses `cpal` for the same cross-platform reason the output sink
//! does. The hardware-driven input callback feeds a lock-free `rtrb` ring
//! buffer; a dedicated capture thread pops 40ms frames from it in a
//! blocking poll loop (the same sleep-poll clock pattern as
//! `output::CpalOutputSink::write_blocking`), then runs
//! encode -> encrypt -> base64 -> JSON -> `send_to`. Optional noise
//! suppression uses `nnnoiseless` when enabled, matching the teacher's
//! "absence is not a fatal error" stance on Android audio enhancements.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use nnnoiseless::{DenoiseState, FRAME_SIZE};
use rtrb::RingBuffer;

use crate::codec::VoiceEncoder;
use crate::config::{MIXER_FRAME_SAMPLES, SAMPLE_RATE};
use crate::crypto::Crypto;
use crate::error::{CodecError, OutputError, SessionError};
use crate::wire::encode_audio_envelope;

const CAPTURE_POLL_INTERVAL: Duration = Duration::from_millis(1);
const CAPTURE_RING_SLOTS: usize = MIXER_FRAME_SAMPLES * 8;

/// Handle for an in-progress transmit stream. Dropping it (or calling
/// `stop`) releases the capture device and encoder.
pub struct TransmitHandle {
    _stream: Stream,
    running: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl TransmitHandle {
    pub fn stop(mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.join.take() {
            let _ = handle.join();
        }
    }
}

pub fn begin_transmit(
    channel_id: String,
    dest: std::net::SocketAddr,
    socket: Arc<UdpSocket>,
    crypto: Crypto,
    transmitting_flag: Arc<AtomicBool>,
    enable_noise_suppression: bool,
) -> Result<TransmitHandle, SessionError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(SessionError::Output(OutputError::NoDevice))?;

    let supported = device
        .supported_input_configs()
        .map_err(|_| SessionError::Output(OutputError::DeviceOpen))?
        .find(|c| c.channels() == 1)
        .ok_or(SessionError::Output(OutputError::DeviceOpen))?;

    let stream_config = StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(SAMPLE_RATE),
        buffer_size: cpal::BufferSize::Default,
    };
    let sample_format = supported.sample_format();

    let (mut producer, consumer) = RingBuffer::<i16>::new(CAPTURE_RING_SLOTS);

    let err_fn = |err| log::error!("capture stream error: {err}");

    let stream = match sample_format {
        SampleFormat::I16 => device
            .build_input_stream(
                &stream_config,
                move |data: &[i16], _| {
                    for &sample in data {
                        let _ = producer.push(sample);
                    }
                },
                err_fn,
                None,
            )
            .map_err(|_| SessionError::Output(OutputError::DeviceOpen))?,
        SampleFormat::F32 => device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _| {
                    for &sample in data {
                        let clamped = (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32);
                        let _ = producer.push(clamped as i16);
                    }
                },
                err_fn,
                None,
            )
            .map_err(|_| SessionError::Output(OutputError::DeviceOpen))?,
        _ => return Err(SessionError::Output(OutputError::DeviceOpen)),
    };

    stream.play().map_err(|_| SessionError::Output(OutputError::DeviceOpen))?;

    let running = Arc::new(AtomicBool::new(true));
    let thread_running = running.clone();
    transmitting_flag.store(true, Ordering::Relaxed);

    let join = std::thread::Builder::new()
        .name("voicelink-transmit".into())
        .spawn(move || {
            run_capture_loop(
                consumer,
                channel_id,
                dest,
                socket,
                crypto,
                thread_running,
                transmitting_flag,
                enable_noise_suppression,
            );
        })
        .expect("failed to spawn transmit thread");

    Ok(TransmitHandle {
        _stream: stream,
        running,
        join: Some(join),
    })
}

fn run_capture_loop(
    mut consumer: rtrb::Consumer<i16>,
    channel_id: String,
    dest: std::net::SocketAddr,
    socket: Arc<UdpSocket>,
    crypto: Crypto,
    running: Arc<AtomicBool>,
    transmitting_flag: Arc<AtomicBool>,
    enable_noise_suppression: bool,
) {
    let mut encoder = match VoiceEncoder::new() {
        Ok(e) => e,
        Err(e) => {
            log::error!("failed to start encoder for transmit: {e}");
            transmitting_flag.store(false, Ordering::Relaxed);
            return;
        }
    };
    let mut denoise_state = if enable_noise_suppression {
        Some(DenoiseState::new())
    } else {
        None
    };
    let mut frame_buf = [0i16; MIXER_FRAME_SAMPLES];
    let mut frame_len = 0usize;

    while running.load(Ordering::Relaxed) {
        match consumer.pop() {
            Ok(sample) => {
                frame_buf[frame_len] = sample;
                frame_len += 1;
                if frame_len == MIXER_FRAME_SAMPLES {
                    if let Some(ref mut ds) = denoise_state {
                        apply_noise_suppression(ds, &mut frame_buf);
                    }
                    if let Err(e) = encode_encrypt_send(&mut encoder, &frame_buf, &channel_id, dest, &socket, &crypto) {
                        log::warn!("dropped outbound frame: {e}");
                    }
                    frame_len = 0;
                }
            }
            Err(_) => std::thread::sleep(CAPTURE_POLL_INTERVAL),
        }
    }

    transmitting_flag.store(false, Ordering::Relaxed);
}

/// Runs captured mic audio through RNNoise in `FRAME_SIZE`-sample chunks
///. Absence of this step is
/// not fatal; callers that leave `enable_noise_suppression` off never
/// construct a `DenoiseState` at all.
fn apply_noise_suppression(denoise: &mut DenoiseState, frame: &mut [i16; MIXER_FRAME_SAMPLES]) {
    debug_assert_eq!(MIXER_FRAME_SAMPLES % FRAME_SIZE, 0);
    let mut in_buf = [0f32; FRAME_SIZE];
    let mut out_buf = [0f32; FRAME_SIZE];
    for chunk in frame.chunks_mut(FRAME_SIZE) {
        for (dst, &src) in in_buf.iter_mut().zip(chunk.iter()) {
            *dst = src as f32;
        }
        denoise.process_frame(&mut out_buf, &in_buf);
        for (dst, &src) in chunk.iter_mut().zip(out_buf.iter()) {
            *dst = src.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        }
    }
}

fn encode_encrypt_send(
    encoder: &mut VoiceEncoder,
    pcm: &[i16],
    channel_id: &str,
    dest: std::net::SocketAddr,
    socket: &UdpSocket,
    crypto: &Crypto,
) -> Result<(), CodecError> {
    let encoded = encoder.encode(pcm)?;
    let framed = crypto
        .encrypt(&encoded)
        .map_err(|_| CodecError::EncodeFailed)?;
    let datagram = encode_audio_envelope(channel_id, &framed);
    if let Err(e) = socket.send_to(&datagram, dest) {
        log::warn!("transmit send_to failed: {e}");
    }
    Ok(())
}
