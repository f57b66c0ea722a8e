//! Error kinds for every subsystem, following the teacher's `thiserror`
//! convention of one flat enum per concern rather than a single
//! catch-all error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("ciphertext is shorter than the nonce + tag overhead")]
    Malformed,
    #[error("authentication failed (tag mismatch)")]
    AuthFailed,
    #[error("failed to initialize crypto backend")]
    BackendInit,
    #[error("key must be exactly 32 bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("key is not valid base64")]
    InvalidKeyEncoding,
}

#[derive(Debug, Error)]
pub enum WireError {
    #[error("datagram is not valid UTF-8 JSON")]
    InvalidJson,
    #[error("envelope is missing a required field")]
    MissingField,
    #[error("data field is not valid base64 (channel '{channel_id}')")]
    InvalidBase64 { channel_id: String },
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to initialize encoder")]
    EncoderInit,
    #[error("failed to initialize decoder")]
    DecoderInit,
    #[error("encode failed")]
    EncodeFailed,
    #[error("decode failed")]
    DecodeFailed,
    #[error("decoder returned no samples")]
    EmptyDecode,
}

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("failed to open audio output device")]
    DeviceOpen,
    #[error("no output device available")]
    NoDevice,
    #[error("output stream write failed: {0}")]
    WriteFailed(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("crypto initialization failed: {0}")]
    Crypto(#[from] CryptoError),
    #[error("output device initialization failed: {0}")]
    Output(#[from] OutputError),
    #[error("failed to bind datagram socket: {0}")]
    SocketBind(std::io::Error),
    #[error("channel '{0}' already exists")]
    ChannelExists(String),
    #[error("channel '{0}' does not exist")]
    ChannelNotFound(String),
    #[error("codec initialization failed: {0}")]
    Codec(#[from] CodecError),
    #[error("a transmit stream is already active")]
    TransmitAlreadyActive,
    #[error("no transmit stream is active")]
    NoActiveTransmit,
}
