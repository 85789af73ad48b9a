//! Chunk stored-form transforms.
//!
//! The chunk layer addresses whatever bytes it is given; this codec
//! decides what those bytes are. Plaintext vaults store chunks verbatim.
//! Encrypted vaults store convergently encrypted ciphertext, so identical
//! plaintext chunks still map to one stored chunk and deduplicate across
//! files and devices.

use std::sync::Arc;
use vaultsync_chunks::{ChunkError, ChunkResult};
use vaultsync_crypto::{Cryptor, EncryptedPayload, KdfParams};
use vaultsync_types::SyncSettings;

/// Maps plaintext chunk bytes to their stored form and back.
#[derive(Clone)]
pub struct PayloadCodec {
    cryptor: Option<Arc<Cryptor>>,
    passphrase: String,
}

impl PayloadCodec {
    /// Codec for unencrypted vaults: stored bytes are the plaintext.
    pub fn plaintext() -> Self {
        Self {
            cryptor: None,
            passphrase: String::new(),
        }
    }

    /// Builds the codec the settings ask for.
    pub fn from_settings(settings: &SyncSettings) -> Self {
        if !settings.encrypt {
            return Self::plaintext();
        }
        let mut cryptor = Cryptor::new(KdfParams::default());
        if settings.use_dynamic_iteration_count {
            cryptor = cryptor.with_dynamic_iterations();
        }
        Self {
            cryptor: Some(Arc::new(cryptor)),
            passphrase: settings.passphrase.clone(),
        }
    }

    /// Whether chunks are stored encrypted.
    pub fn is_encrypting(&self) -> bool {
        self.cryptor.is_some()
    }

    /// Plaintext to stored bytes.
    pub fn encode(&self, bytes: &[u8]) -> ChunkResult<Vec<u8>> {
        match &self.cryptor {
            None => Ok(bytes.to_vec()),
            Some(cryptor) => cryptor
                .encrypt_convergent(bytes, &self.passphrase)
                .map(|payload| payload.to_bytes())
                .map_err(|e| ChunkError::Transform(e.to_string())),
        }
    }

    /// Stored bytes back to plaintext.
    pub fn decode(&self, bytes: &[u8]) -> ChunkResult<Vec<u8>> {
        match &self.cryptor {
            None => Ok(bytes.to_vec()),
            Some(cryptor) => {
                let payload = EncryptedPayload::from_bytes(bytes)
                    .map_err(|e| ChunkError::Transform(e.to_string()))?;
                cryptor
                    .decrypt(&payload, &self.passphrase)
                    .map_err(|e| ChunkError::Transform(e.to_string()))
            }
        }
    }

    /// Forgets all cached derived keys (passphrase change).
    pub fn clear_keys(&self) {
        if let Some(cryptor) = &self.cryptor {
            cryptor.clear_key_cache();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaultsync_crypto::KdfParams;

    fn encrypting() -> PayloadCodec {
        PayloadCodec {
            cryptor: Some(Arc::new(Cryptor::new(KdfParams::fast()))),
            passphrase: "hunter2".into(),
        }
    }

    #[test]
    fn plaintext_is_identity() {
        let codec = PayloadCodec::plaintext();
        assert_eq!(codec.encode(b"abc").unwrap(), b"abc");
        assert_eq!(codec.decode(b"abc").unwrap(), b"abc");
    }

    #[test]
    fn encrypted_roundtrip() {
        let codec = encrypting();
        let stored = codec.encode(b"chunk bytes").unwrap();
        assert_ne!(stored, b"chunk bytes");
        assert_eq!(codec.decode(&stored).unwrap(), b"chunk bytes");
    }

    #[test]
    fn encryption_is_convergent() {
        let codec = encrypting();
        assert_eq!(codec.encode(b"same").unwrap(), codec.encode(b"same").unwrap());
    }
}
