mod channel;
mod codec;
mod config;
mod crypto;
mod egress;
mod error;
mod ingress;
mod jitter;
mod keepalive;
mod mixer;
mod output;
mod pcm;
mod session;
mod wire;

pub use channel::ChannelStats;
pub use config::{Pan, SessionConfig};
pub use crypto::AudioKey;
pub use error::{CodecError, CryptoError, OutputError, SessionError, WireError};
pub use session::Session;

/// Initializes the crate's logging backend. Mirrors the teacher's
/// `init_logger` entry point, swapped from `android_logger` to
/// `env_logger` for a generic desktop target.
pub fn init_logger() {
    let _ = env_logger::try_init();
}
