//! Session control. Owns the socket, the channel map, the output device,
//! and the lifecycle of the mixer/receiver/transmitter threads.

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::channel::{ChannelState, ChannelStats};
use crate::codec::VoiceDecoder;
use crate::config::{Pan, SessionConfig};
use crate::crypto::{AudioKey, Crypto};
use crate::egress::{self, TransmitHandle};
use crate::error::SessionError;
use crate::ingress;
use crate::keepalive;
use crate::mixer::{ChannelMap, Mixer};
use crate::output::{CpalOutputSink, OutputSink};

pub struct Session {
    channels: Arc<ChannelMap>,
    socket: Arc<UdpSocket>,
    dest: SocketAddr,
    crypto: Crypto,
    running: Arc<AtomicBool>,
    transmitting: Arc<AtomicBool>,
    config: SessionConfig,
    started_at: Instant,
    unattributed_malformed: Arc<AtomicU64>,

    receiver_handle: Option<JoinHandle<()>>,
    mixer_handle: Option<JoinHandle<()>>,
    keepalive_handle: Option<JoinHandle<()>>,
    transmit: Mutex<Option<TransmitHandle>>,
}

impl Session {
    /// Opens the socket, starts the receiver, mixer, and keep-alive
    /// threads. Fails fast if crypto or the
    /// output device cannot be initialized.
    pub fn start(config: SessionConfig) -> Result<Self, SessionError> {
        let key = AudioKey::from_base64(&config.key_base64)?;
        let crypto = Crypto::new(key)?;

        let bind_addr: SocketAddr = ([0, 0, 0, 0], config.bind_port).into();
        let socket = UdpSocket::bind(bind_addr).map_err(SessionError::SocketBind)?;
        let socket = Arc::new(socket);

        let dest = (config.dest_host.as_str(), config.dest_port)
            .to_socket_addrs()
            .map_err(SessionError::SocketBind)?
            .next()
            .ok_or_else(|| SessionError::SocketBind(std::io::Error::new(std::io::ErrorKind::InvalidInput, "no resolvable destination")))?;

        let channels: Arc<ChannelMap> = Arc::new(DashMap::new());
        let running = Arc::new(AtomicBool::new(true));
        let transmitting = Arc::new(AtomicBool::new(false));
        let started_at = Instant::now();
        let unattributed_malformed = Arc::new(AtomicU64::new(0));

        let sink = CpalOutputSink::open(crate::config::SAMPLE_RATE)?;
        let mixer_handle = spawn_mixer(channels.clone(), sink, running.clone(), &config);

        let receiver_handle = {
            let socket = socket.try_clone().map_err(SessionError::SocketBind)?;
            let channels = channels.clone();
            let crypto = crypto.clone();
            let running = running.clone();
            let unattributed_malformed = unattributed_malformed.clone();
            std::thread::Builder::new()
                .name("voicelink-receiver".into())
                .spawn(move || {
                    ingress::run_receiver(socket, channels, crypto, running, started_at, unattributed_malformed)
                })
                .expect("failed to spawn receiver thread")
        };

        let keepalive_handle = {
            let socket = socket.clone();
            let transmitting = transmitting.clone();
            let running = running.clone();
            let interval = Duration::from_millis(config.keepalive_interval_ms);
            std::thread::Builder::new()
                .name("voicelink-keepalive".into())
                .spawn(move || keepalive::run_keep_alive(socket, dest, interval, transmitting, running))
                .expect("failed to spawn keep-alive thread")
        };

        Ok(Self {
            channels,
            socket,
            dest,
            crypto,
            running,
            transmitting,
            config,
            started_at,
            unattributed_malformed,
            receiver_handle: Some(receiver_handle),
            mixer_handle: Some(mixer_handle),
            keepalive_handle: Some(keepalive_handle),
            transmit: Mutex::new(None),
        })
    }

    /// Tears down all threads and resources in deterministic order:
    /// transmitter -> receiver -> mixer -> sink -> socket -> per-channel
    /// decoders.
    pub fn stop(&mut self) {
        if let Some(handle) = self.transmit.lock().unwrap().take() {
            handle.stop();
        }

        self.running.store(false, Ordering::Relaxed);

        // Unblock the receiver's recv_from by closing out the socket it
        // reads from is not directly possible on a shared UdpSocket
        // without platform-specific shutdown, so we rely on the `running`
        // flag being observed on the next inbound datagram or on drop of
        // the last socket handle unblocking recv on some platforms. The
        // mixer's own loop exits within one output write; the keep-alive
        // loop exits within one 100ms slice.
        if let Some(handle) = self.receiver_handle.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.mixer_handle.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.keepalive_handle.take() {
            let _ = handle.join();
        }

        self.channels.clear();
    }

    /// Creates channel runtime state and decoder; gate closed
    ///.
    pub fn add_channel(&self, id: &str, volume: f32, pan: Pan) -> Result<(), SessionError> {
        if self.channels.contains_key(id) {
            return Err(SessionError::ChannelExists(id.to_string()));
        }
        let decoder = VoiceDecoder::new()?;
        let state = ChannelState::new(decoder, self.config.max_queue_frames);
        state.set_volume(volume);
        state.set_pan(pan);
        self.channels.insert(id.to_string(), Arc::new(state));
        Ok(())
    }

    /// Drains queue, closes decoder, removes state
    ///. Because `ChannelState` owns
    /// its queue and decoder directly, dropping the `Arc` (once the
    /// mixer's current-cycle snapshot also drops its reference) releases
    /// both — there is nothing left to leak.
    pub fn remove_channel(&self, id: &str) -> Result<(), SessionError> {
        self.channels
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| SessionError::ChannelNotFound(id.to_string()))
    }

    /// Clamps to [0,1]; takes effect by next mixer cycle.
    pub fn set_volume(&self, id: &str, volume: f32) -> Result<(), SessionError> {
        let channel = self
            .channels
            .get(id)
            .ok_or_else(|| SessionError::ChannelNotFound(id.to_string()))?;
        channel.set_volume(volume);
        Ok(())
    }

    /// Takes effect by next mixer cycle.
    pub fn set_pan(&self, id: &str, pan: Pan) -> Result<(), SessionError> {
        let channel = self
            .channels
            .get(id)
            .ok_or_else(|| SessionError::ChannelNotFound(id.to_string()))?;
        channel.set_pan(pan);
        Ok(())
    }

    /// Starts capture + encode + send loop. Only one transmit stream may
    /// be active at a time.
    pub fn begin_transmit(&self, channel_id: &str) -> Result<(), SessionError> {
        let mut guard = self.transmit.lock().unwrap();
        if guard.is_some() {
            return Err(SessionError::TransmitAlreadyActive);
        }
        let handle = egress::begin_transmit(
            channel_id.to_string(),
            self.dest,
            self.socket.clone(),
            self.crypto.clone(),
            self.transmitting.clone(),
            self.config.enable_noise_suppression,
        )?;
        *guard = Some(handle);
        Ok(())
    }

    /// Stops and releases the encoder.
    pub fn end_transmit(&self) -> Result<(), SessionError> {
        let mut guard = self.transmit.lock().unwrap();
        match guard.take() {
            Some(handle) => {
                handle.stop();
                Ok(())
            }
            None => Err(SessionError::NoActiveTransmit),
        }
    }

    /// Returns packets received, dropped, queue size, underflows, last
    /// activity.
    pub fn stats(&self, id: &str) -> Option<ChannelStats> {
        self.channels.get(id).map(|c| c.stats())
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Count of malformed datagrams that could not be attributed to any
    /// channel (invalid JSON, or a missing `channel_id`).
    pub fn unattributed_malformed_count(&self) -> u64 {
        self.unattributed_malformed.load(Ordering::Relaxed)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_mixer<S: OutputSink + 'static>(
    channels: Arc<ChannelMap>,
    sink: S,
    running: Arc<AtomicBool>,
    config: &SessionConfig,
) -> JoinHandle<()> {
    let jitter_gate_frames = config.jitter_gate_frames;
    let fade_samples = config.fade_samples;
    std::thread::Builder::new()
        .name("voicelink-mixer".into())
        .spawn(move || {
            let mut mixer = Mixer::new(channels, sink, running, jitter_gate_frames, fade_samples);
            mixer.run();
        })
        .expect("failed to spawn mixer thread")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(port: u16) -> SessionConfig {
        SessionConfig {
            key_base64: base64::Engine::encode(
                &base64::engine::general_purpose::STANDARD,
                [5u8; 32],
            ),
            dest_host: "127.0.0.1".into(),
            dest_port: port,
            bind_port: 0,
            ..SessionConfig::default()
        }
    }

    #[test]
    fn add_then_remove_channel_leaves_empty_set() {
        // This test does not call Session::start (which opens a real
        // audio device); it exercises the channel map semantics in
        // isolation the same way the session would use them.
        let channels: ChannelMap = DashMap::new();
        let decoder = VoiceDecoder::new().unwrap();
        channels.insert(
            "x".to_string(),
            Arc::new(ChannelState::new(decoder, crate::config::MAX_QUEUE_FRAMES)),
        );
        assert_eq!(channels.len(), 1);
        channels.remove("x");
        assert_eq!(channels.len(), 0);
    }

    #[test]
    fn config_defaults_match_spec() {
        let cfg = test_config(9000);
        assert_eq!(cfg.jitter_gate_frames, crate::config::DEFAULT_JITTER_GATE_FRAMES);
        assert_eq!(cfg.max_queue_frames, crate::config::MAX_QUEUE_FRAMES);
        assert_eq!(cfg.fade_samples, crate::config::FADE_SAMPLES);
    }
}
