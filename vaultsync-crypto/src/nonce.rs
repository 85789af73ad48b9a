//! Nonce generation for the AEAD cipher.
//!
//! A nonce is a 4-byte semi-static random prefix followed by an 8-byte
//! big-endian counter. Uniqueness holds as long as the counter never
//! repeats under one prefix; the prefix is rotated after a bounded number
//! of uses to limit exposure of any single prefix.

use crate::cipher::NONCE_SIZE;
use rand::RngCore;
use std::sync::Mutex;

/// How many nonces a single prefix may issue before rotation.
const PREFIX_ROTATE_AFTER: u64 = 1 << 20;

#[derive(Debug)]
struct NonceState {
    prefix: [u8; 4],
    counter: u64,
    issued: u64,
}

impl NonceState {
    fn fresh() -> Self {
        let mut prefix = [0u8; 4];
        rand::rngs::OsRng.fill_bytes(&mut prefix);
        Self {
            prefix,
            counter: 0,
            issued: 0,
        }
    }
}

/// Issues unique nonces for one cipher instance.
#[derive(Debug)]
pub struct NonceFactory {
    state: Mutex<NonceState>,
}

impl NonceFactory {
    /// Creates a factory with a fresh random prefix.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(NonceState::fresh()),
        }
    }

    /// Returns the next unique nonce.
    pub fn next(&self) -> [u8; NONCE_SIZE] {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.issued >= PREFIX_ROTATE_AFTER {
            *state = NonceState::fresh();
        }
        state.counter = state.counter.wrapping_add(1);
        state.issued += 1;

        let mut nonce = [0u8; NONCE_SIZE];
        nonce[..4].copy_from_slice(&state.prefix);
        nonce[4..].copy_from_slice(&state.counter.to_be_bytes());
        nonce
    }
}

impl Default for NonceFactory {
    fn default() -> Self {
        Self::new()
    }
}
