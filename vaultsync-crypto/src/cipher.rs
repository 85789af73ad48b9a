//! Payload encryption using ChaCha20-Poly1305.
//!
//! `Cryptor` is the one entry point the rest of the engine sees: it owns
//! the KDF parameters, the derived-key cache, and the nonce factory.

use crate::error::{CryptoError, CryptoResult};
use crate::key::{derive_key, KdfParams, Salt, SALT_SIZE};
use crate::keycache::KeyCache;
use crate::nonce::NonceFactory;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Size of nonce in bytes (96 bits for ChaCha20-Poly1305).
pub const NONCE_SIZE: usize = 12;

/// Size of the authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Default capacity of the derived-key cache.
const KEY_CACHE_CAPACITY: usize = 16;

/// An encrypted payload with everything needed for decryption except the
/// passphrase.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    /// Salt used for key derivation.
    pub salt: [u8; SALT_SIZE],
    /// Nonce used for this encryption (unique per call).
    pub nonce: [u8; NONCE_SIZE],
    /// Ciphertext including the auth tag.
    pub ciphertext: Vec<u8>,
}

impl EncryptedPayload {
    /// Total encoded size.
    pub fn len(&self) -> usize {
        SALT_SIZE + NONCE_SIZE + self.ciphertext.len()
    }

    /// Whether the ciphertext is empty.
    pub fn is_empty(&self) -> bool {
        self.ciphertext.is_empty()
    }

    /// Serializes to the stored wire form: `salt || nonce || ciphertext`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.len());
        bytes.extend_from_slice(&self.salt);
        bytes.extend_from_slice(&self.nonce);
        bytes.extend_from_slice(&self.ciphertext);
        bytes
    }

    /// Parses the stored wire form.
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() < SALT_SIZE + NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::InvalidPayload("payload too short".to_string()));
        }

        let mut salt = [0u8; SALT_SIZE];
        salt.copy_from_slice(&bytes[..SALT_SIZE]);
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&bytes[SALT_SIZE..SALT_SIZE + NONCE_SIZE]);
        let ciphertext = bytes[SALT_SIZE + NONCE_SIZE..].to_vec();

        Ok(Self {
            salt,
            nonce,
            ciphertext,
        })
    }

    /// Encodes to base64 for embedding in JSON documents.
    pub fn to_base64(&self) -> String {
        use base64::{engine::general_purpose::STANDARD, Engine};
        STANDARD.encode(self.to_bytes())
    }

    /// Decodes from base64.
    pub fn from_base64(encoded: &str) -> CryptoResult<Self> {
        use base64::{engine::general_purpose::STANDARD, Engine};
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| CryptoError::InvalidPayload(format!("invalid base64: {e}")))?;
        Self::from_bytes(&bytes)
    }
}

/// Stateful encryptor: KDF parameters + key cache + nonce factory.
pub struct Cryptor {
    params: KdfParams,
    dynamic_iterations: bool,
    session_salt: Salt,
    cache: Mutex<KeyCache>,
    nonces: NonceFactory,
}

impl Cryptor {
    /// Creates a cryptor with the given KDF parameters.
    pub fn new(params: KdfParams) -> Self {
        Self {
            params,
            dynamic_iterations: false,
            session_salt: Salt::random(),
            cache: Mutex::new(KeyCache::new(KEY_CACHE_CAPACITY)),
            nonces: NonceFactory::new(),
        }
    }

    /// Enables dynamic iteration scaling by passphrase length.
    pub fn with_dynamic_iterations(mut self) -> Self {
        self.dynamic_iterations = true;
        self
    }

    /// Encrypts a plaintext under the given passphrase.
    ///
    /// The session salt is reused across calls so the derived-key cache is
    /// effective; every payload still carries its own salt and can be
    /// decrypted independently.
    pub fn encrypt(&self, plaintext: &[u8], passphrase: &str) -> CryptoResult<EncryptedPayload> {
        let key = self.key_for(passphrase, &self.session_salt)?;
        let cipher = ChaCha20Poly1305::new(key.as_bytes().into());

        let nonce_bytes = self.nonces.next();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;

        Ok(EncryptedPayload {
            salt: *self.session_salt.as_bytes(),
            nonce: nonce_bytes,
            ciphertext,
        })
    }

    /// Decrypts a payload under the given passphrase.
    pub fn decrypt(&self, payload: &EncryptedPayload, passphrase: &str) -> CryptoResult<Vec<u8>> {
        let salt = Salt::from_bytes(payload.salt);
        let key = self.key_for(passphrase, &salt)?;
        let cipher = ChaCha20Poly1305::new(key.as_bytes().into());
        let nonce = Nonce::from_slice(&payload.nonce);

        cipher
            .decrypt(nonce, payload.ciphertext.as_ref())
            .map_err(|_| {
                CryptoError::Decryption("wrong passphrase or tampered payload".to_string())
            })
    }

    /// Convergent encryption for content-addressed chunks.
    ///
    /// The key salt is derived from the passphrase and the nonce from the
    /// plaintext digest, so identical chunks encrypt to identical stored
    /// bytes on every device sharing the passphrase and deduplicate
    /// remotely. A `(key, nonce)` pair only ever covers one plaintext,
    /// which keeps nonce reuse sound.
    pub fn encrypt_convergent(
        &self,
        plaintext: &[u8],
        passphrase: &str,
    ) -> CryptoResult<EncryptedPayload> {
        use sha2::{Digest, Sha256};

        let salt = Self::convergent_salt(passphrase);
        let key = self.key_for(passphrase, &salt)?;
        let cipher = ChaCha20Poly1305::new(key.as_bytes().into());

        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        hasher.update(plaintext);
        let digest = hasher.finalize();
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        nonce_bytes.copy_from_slice(&digest[..NONCE_SIZE]);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;

        Ok(EncryptedPayload {
            salt: *salt.as_bytes(),
            nonce: nonce_bytes,
            ciphertext,
        })
    }

    /// Deterministic key salt for convergent mode. Derived from the
    /// passphrase alone: a per-instance salt would make identical chunks
    /// encrypt to different stored bytes on every device.
    fn convergent_salt(passphrase: &str) -> Salt {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(b"convergent-chunk-salt");
        hasher.update(passphrase.as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; SALT_SIZE];
        bytes.copy_from_slice(&digest[..SALT_SIZE]);
        Salt::from_bytes(bytes)
    }

    /// Encrypts a string to its base64 transport form.
    pub fn encrypt_string(&self, plaintext: &str, passphrase: &str) -> CryptoResult<String> {
        Ok(self.encrypt(plaintext.as_bytes(), passphrase)?.to_base64())
    }

    /// Decrypts a base64 transport string.
    pub fn decrypt_string(&self, encoded: &str, passphrase: &str) -> CryptoResult<String> {
        let payload = EncryptedPayload::from_base64(encoded)?;
        let plaintext = self.decrypt(&payload, passphrase)?;
        String::from_utf8(plaintext)
            .map_err(|e| CryptoError::Decryption(format!("invalid UTF-8: {e}")))
    }

    /// Drops all cached keys (call when the passphrase changes).
    pub fn clear_key_cache(&self) {
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    fn key_for(&self, passphrase: &str, salt: &Salt) -> CryptoResult<crate::key::DerivedKey> {
        {
            let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(key) = cache.get(passphrase, salt) {
                return Ok(key);
            }
        }

        let params = if self.dynamic_iterations {
            KdfParams {
                memory_cost: self.params.memory_cost,
                parallelism: self.params.parallelism,
                ..KdfParams::dynamic(passphrase)
            }
        } else {
            self.params.clone()
        };
        let key = derive_key(passphrase, salt, &params)?;

        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.put(passphrase, salt, key.clone());
        Ok(key)
    }
}
