//! Passphrase-derived symmetric encryption for vaultsync.
//!
//! Chunk and metadata payloads are encrypted per document with a key
//! derived from the user's passphrase:
//!
//! 1. Argon2id derives a 256-bit key from `(passphrase, salt)`. The
//!    iteration count is configurable; dynamic mode scales it inversely
//!    with passphrase length.
//! 2. ChaCha20-Poly1305 authenticates and encrypts the payload. Nonces
//!    combine a semi-static random prefix with a strictly incrementing
//!    counter, so uniqueness never depends on a full random draw.
//! 3. Derived keys are cached in a bounded LRU keyed by
//!    `(passphrase, salt)`. The cache is a performance optimization only;
//!    correctness never depends on a hit.
//!
//! Decryption failure is a typed error distinct from "not found": callers
//! prompt for passphrase re-entry rather than skipping the document.

mod cipher;
mod error;
mod key;
mod keycache;
mod nonce;

pub use cipher::{Cryptor, EncryptedPayload, NONCE_SIZE, TAG_SIZE};
pub use error::{CryptoError, CryptoResult};
pub use key::{derive_key, DerivedKey, KdfParams, Salt, KEY_SIZE, SALT_SIZE};
pub use keycache::KeyCache;
pub use nonce::NonceFactory;
