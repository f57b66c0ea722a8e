//! Wire framing: the JSON envelope `{type, channel_id, data}` where `data`
//! is base64 of `nonce || ciphertext || tag`.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::WireError;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
enum RawEnvelope {
    #[serde(rename = "audio")]
    Audio {
        channel_id: String,
        data: String,
    },
    #[serde(rename = "KEEP_ALIVE")]
    KeepAlive,
    /// Catches every other `type` value — control messages, presence,
    /// keep-alives from future protocol versions. The core ignores these
    ///.
    #[serde(other)]
    Unknown,
}

/// A decoded inbound/outbound datagram payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireEnvelope {
    Audio { channel_id: String, framed: Vec<u8> },
    KeepAlive,
    Unknown,
}

/// Parses a raw UDP payload. Never returns an error for a recognized-but-
/// irrelevant envelope (`Unknown`) — only for bytes that are not valid
/// JSON, or an `audio` envelope whose fields don't decode, per spec.md's
/// "malformed datagram" policy.
pub fn parse_envelope(payload: &[u8]) -> Result<WireEnvelope, WireError> {
    let raw: RawEnvelope = serde_json::from_slice(payload).map_err(|_| WireError::InvalidJson)?;
    match raw {
        RawEnvelope::Audio { channel_id, data } => {
            if channel_id.is_empty() {
                return Err(WireError::MissingField);
            }
            let framed = BASE64_STANDARD
                .decode(data.as_bytes())
                .map_err(|_| WireError::InvalidBase64 {
                    channel_id: channel_id.clone(),
                })?;
            Ok(WireEnvelope::Audio { channel_id, framed })
        }
        RawEnvelope::KeepAlive => Ok(WireEnvelope::KeepAlive),
        RawEnvelope::Unknown => Ok(WireEnvelope::Unknown),
    }
}

/// Builds the outbound `{"type":"audio",...}` datagram.
pub fn encode_audio_envelope(channel_id: &str, framed: &[u8]) -> Vec<u8> {
    let data = BASE64_STANDARD.encode(framed);
    let raw = RawEnvelope::Audio {
        channel_id: channel_id.to_string(),
        data,
    };
    serde_json::to_vec(&raw).expect("envelope serialization cannot fail")
}

/// Builds the outbound `{"type":"KEEP_ALIVE"}` datagram.
pub fn encode_keep_alive() -> Vec<u8> {
    serde_json::to_vec(&RawEnvelope::KeepAlive).expect("envelope serialization cannot fail")
}
