//! Session token codec.
//!
//! Encodes a [`SessionRecord`] into an encrypted cookie value and back.
//! Decoding never fails loudly: forged, truncated, stale-key or
//! wrong-version tokens all decode to `None`, and the caller mints a
//! fresh session.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::session::cipher::{CipherError, TokenCipher};
use crate::session::record::SessionRecord;

const FORMAT_VERSION: u8 = 1;

/// What actually goes inside the sealed token.
#[derive(Debug, Serialize, Deserialize)]
struct TokenPayload {
    version: u8,
    id: String,
    upstream_host: String,
    connection_id: String,
}

#[derive(Clone)]
pub struct SessionCodec {
    cipher: Arc<dyn TokenCipher>,
}

impl SessionCodec {
    pub fn new(cipher: Arc<dyn TokenCipher>) -> Self {
        Self { cipher }
    }

    pub fn encode(&self, record: &SessionRecord) -> Result<String, CipherError> {
        let payload = TokenPayload {
            version: FORMAT_VERSION,
            id: record.id.clone(),
            upstream_host: record.upstream_host.clone(),
            connection_id: record.connection_id.clone(),
        };
        // Serializing owned strings into a Vec cannot fail.
        let bytes = bincode::serialize(&payload).map_err(|_| CipherError::Seal)?;
        self.cipher.encrypt_to_base64(&bytes)
    }

    pub fn decode(&self, token: &str) -> Option<SessionRecord> {
        let bytes = match self.cipher.decrypt_from_base64(token) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::debug!(error = %e, "Discarding undecryptable session token");
                return None;
            }
        };

        let payload: TokenPayload = match bincode::deserialize(&bytes) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::debug!(error = %e, "Discarding malformed session payload");
                return None;
            }
        };

        if payload.version != FORMAT_VERSION || payload.id.is_empty() {
            tracing::debug!(version = payload.version, "Discarding session token with unknown format");
            return None;
        }

        Some(SessionRecord {
            id: payload.id,
            connection_id: payload.connection_id,
            upstream_host: payload.upstream_host,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::cipher::ChaChaTokenCipher;
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};

    fn codec(key: u8) -> SessionCodec {
        SessionCodec::new(Arc::new(ChaChaTokenCipher::new(&[[key; 32]]).unwrap()))
    }

    fn pinned_record() -> SessionRecord {
        let mut record = SessionRecord::new();
        record.pin("node-a.chat.internal:5000");
        record.bind_connection("4f1c");
        record
    }

    #[test]
    fn round_trip() {
        let codec = codec(7);
        for record in [SessionRecord::new(), pinned_record()] {
            let token = codec.encode(&record).unwrap();
            assert_eq!(codec.decode(&token), Some(record));
        }
    }

    #[test]
    fn any_flipped_byte_is_rejected() {
        let codec = codec(7);
        let token = codec.encode(&pinned_record()).unwrap();
        let raw = URL_SAFE_NO_PAD.decode(&token).unwrap();

        for i in 0..raw.len() {
            let mut tampered = raw.clone();
            tampered[i] ^= 0x01;
            let tampered = URL_SAFE_NO_PAD.encode(tampered);
            assert_eq!(codec.decode(&tampered), None, "byte {} flip accepted", i);
        }
    }

    #[test]
    fn any_flipped_character_is_rejected() {
        let codec = codec(7);
        let token = codec.encode(&pinned_record()).unwrap();

        for i in 0..token.len() {
            let mut chars: Vec<char> = token.chars().collect();
            chars[i] = if chars[i] == 'A' { 'B' } else { 'A' };
            let tampered: String = chars.into_iter().collect();
            assert_eq!(codec.decode(&tampered), None, "char {} flip accepted", i);
        }
    }

    #[test]
    fn foreign_key_and_garbage_decode_to_none() {
        let token = codec(1).encode(&pinned_record()).unwrap();
        assert_eq!(codec(2).decode(&token), None);
        assert_eq!(codec(2).decode(""), None);
        assert_eq!(codec(2).decode("not-a-token"), None);
    }
}
