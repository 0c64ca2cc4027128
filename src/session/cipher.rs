//! Authenticated encryption for session tokens.
//!
//! # Responsibilities
//! - Seal bytes under the active key and encode them for cookie transport
//! - Open tokens sealed under any configured key (rolling rotation)
//!
//! # Token layout
//! ```text
//! base64url( nonce[12] || chacha20poly1305(ciphertext + tag) )
//! ```

use base64::{engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD}, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    #[error("no session keys configured")]
    NoKeys,

    #[error("key must be 32 bytes, got {0}")]
    KeyLength(usize),

    #[error("base64 decode failed: {0}")]
    Encoding(String),

    #[error("token too short")]
    Truncated,

    #[error("encryption failed")]
    Seal,

    #[error("token failed authentication")]
    Open,
}

/// Encrypt/decrypt capability used by the session codec.
pub trait TokenCipher: Send + Sync {
    fn encrypt_to_base64(&self, plaintext: &[u8]) -> Result<String, CipherError>;

    fn decrypt_from_base64(&self, token: &str) -> Result<Vec<u8>, CipherError>;
}

/// Decode a base64 (standard alphabet) session key.
pub fn decode_key(encoded: &str) -> Result<[u8; KEY_LEN], CipherError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| CipherError::Encoding(e.to_string()))?;
    <[u8; KEY_LEN]>::try_from(bytes.as_slice()).map_err(|_| CipherError::KeyLength(bytes.len()))
}

/// Generate a random key, base64 encoded in the format `decode_key` accepts.
pub fn generate_key() -> String {
    let mut key = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut key);
    STANDARD.encode(key)
}

/// ChaCha20-Poly1305 cipher over an ordered key ring.
///
/// The first key seals; every key is tried when opening.
pub struct ChaChaTokenCipher {
    keys: Vec<ChaCha20Poly1305>,
}

impl ChaChaTokenCipher {
    pub fn new(keys: &[[u8; KEY_LEN]]) -> Result<Self, CipherError> {
        if keys.is_empty() {
            return Err(CipherError::NoKeys);
        }
        let keys = keys
            .iter()
            .map(|k| ChaCha20Poly1305::new(Key::from_slice(k)))
            .collect();
        Ok(Self { keys })
    }

    /// Build from configured base64 keys.
    pub fn from_encoded(keys: &[String]) -> Result<Self, CipherError> {
        let decoded = keys
            .iter()
            .map(|k| decode_key(k))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(&decoded)
    }
}

impl TokenCipher for ChaChaTokenCipher {
    fn encrypt_to_base64(&self, plaintext: &[u8]) -> Result<String, CipherError> {
        let cipher = self.keys.first().ok_or(CipherError::NoKeys)?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|_| CipherError::Seal)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(sealed))
    }

    fn decrypt_from_base64(&self, token: &str) -> Result<Vec<u8>, CipherError> {
        let sealed = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|e| CipherError::Encoding(e.to_string()))?;
        if sealed.len() <= NONCE_LEN {
            return Err(CipherError::Truncated);
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce);

        self.keys
            .iter()
            .find_map(|cipher| cipher.decrypt(nonce, ciphertext).ok())
            .ok_or(CipherError::Open)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> [u8; KEY_LEN] {
        [byte; KEY_LEN]
    }

    #[test]
    fn seals_and_opens() {
        let cipher = ChaChaTokenCipher::new(&[key(1)]).unwrap();
        let token = cipher.encrypt_to_base64(b"hello").unwrap();
        assert_eq!(cipher.decrypt_from_base64(&token).unwrap(), b"hello");
    }

    #[test]
    fn fresh_nonce_per_seal() {
        let cipher = ChaChaTokenCipher::new(&[key(1)]).unwrap();
        let a = cipher.encrypt_to_base64(b"same").unwrap();
        let b = cipher.encrypt_to_base64(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn rotated_keys_still_open_old_tokens() {
        let old = ChaChaTokenCipher::new(&[key(1)]).unwrap();
        let token = old.encrypt_to_base64(b"payload").unwrap();

        let rotated = ChaChaTokenCipher::new(&[key(2), key(1)]).unwrap();
        assert_eq!(rotated.decrypt_from_base64(&token).unwrap(), b"payload");

        let retired = ChaChaTokenCipher::new(&[key(2)]).unwrap();
        assert_eq!(retired.decrypt_from_base64(&token), Err(CipherError::Open));
    }

    #[test]
    fn rejects_garbage() {
        let cipher = ChaChaTokenCipher::new(&[key(1)]).unwrap();
        assert!(matches!(
            cipher.decrypt_from_base64("%%%"),
            Err(CipherError::Encoding(_))
        ));
        assert_eq!(cipher.decrypt_from_base64("AAAA"), Err(CipherError::Truncated));
    }

    #[test]
    fn key_decoding() {
        let encoded = generate_key();
        assert_eq!(decode_key(&encoded).unwrap().len(), KEY_LEN);
        assert_eq!(decode_key("AAAA"), Err(CipherError::KeyLength(3)));
        assert!(ChaChaTokenCipher::new(&[]).is_err());
    }
}
