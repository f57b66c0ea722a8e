//! Keep-alive: emits `{"type":"KEEP_ALIVE"}` every 10s whenever no
//! microphone transmission is in progress, to keep NAT/firewall mappings
//! alive.
//!
//! Coordinates with the transmitter via a shared `AtomicBool`, mirroring
//! the teacher's `is_mic_enabled: Arc<AtomicBool>` gate pattern.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::wire::encode_keep_alive;

pub fn run_keep_alive(
    socket: Arc<UdpSocket>,
    dest: std::net::SocketAddr,
    interval: Duration,
    transmitting: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
) {
    // Sleep in small slices so teardown is responsive rather than waiting
    // out a full 10s interval.
    let slice = Duration::from_millis(100);
    let mut elapsed = Duration::ZERO;

    while running.load(Ordering::Relaxed) {
        std::thread::sleep(slice);
        elapsed += slice;
        if elapsed < interval {
            continue;
        }
        elapsed = Duration::ZERO;

        if transmitting.load(Ordering::Relaxed) {
            continue;
        }

        let packet = encode_keep_alive();
        if let Err(e) = socket.send_to(&packet, dest) {
            log::debug!("keep-alive send failed: {e}");
        }
    }
}
