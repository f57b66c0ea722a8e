//! Authenticated symmetric encryption over a fixed 256-bit key.
//!
//! Grounded on `paracord-util::at_rest::FileCryptor`: AES-256-GCM via
//! `aes-gcm`, a fresh random 12-byte nonce per call via `rand`, nonce
//! prepended to ciphertext. Generalized here to the wire format spec.md
//! §4.1 describes (`nonce || ciphertext || tag`, no magic/version prefix —
//! the envelope's `type` field already disambiguates payload shape).

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use rand::RngCore;

use crate::error::CryptoError;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// A 256-bit pre-shared key.
#[derive(Clone)]
pub struct AudioKey([u8; 32]);

impl AudioKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let decoded = BASE64_STANDARD
            .decode(encoded.trim())
            .map_err(|_| CryptoError::InvalidKeyEncoding)?;
        if decoded.len() != 32 {
            return Err(CryptoError::InvalidKeyLength(decoded.len()));
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&decoded);
        Ok(Self(out))
    }
}

impl std::fmt::Debug for AudioKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AudioKey").field(&"<redacted>").finish()
    }
}

/// Encrypts/decrypts frames for one session. Cheap to clone (the
/// underlying cipher is reconstructed from the key on demand so both the
/// ingress and egress threads can hold an independent, lock-free handle).
#[derive(Clone)]
pub struct Crypto {
    key: AudioKey,
}

impl Crypto {
    pub fn new(key: AudioKey) -> Result<Self, CryptoError> {
        // Validate the key is usable up front so session start fails fast
        //.
        Aes256Gcm::new_from_slice(&key.0).map_err(|_| CryptoError::BackendInit)?;
        Ok(Self { key })
    }

    /// Produces `nonce || ciphertext || tag`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = Aes256Gcm::new_from_slice(&self.key.0).map_err(|_| CryptoError::BackendInit)?;
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CryptoError::BackendInit)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Splits the first 12 bytes as nonce, decrypts the remainder.
    pub fn decrypt(&self, framed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if framed.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::Malformed);
        }
        let (nonce_bytes, ciphertext) = framed.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let cipher = Aes256Gcm::new_from_slice(&self.key.0).map_err(|_| CryptoError::BackendInit)?;
        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CryptoError::AuthFailed)
    }
}
