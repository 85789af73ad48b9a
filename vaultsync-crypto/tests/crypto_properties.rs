//! Property-based tests for the encryption layer.
//!
//! Verifies the properties the engine depends on:
//! - Encryption is reversible with the correct passphrase
//! - Wrong passphrases fail with a typed decryption error
//! - Tampering is detected
//! - Payload encoding round-trips

use proptest::prelude::*;
use vaultsync_crypto::{CryptoError, Cryptor, EncryptedPayload, KdfParams};

fn cryptor() -> Cryptor {
    Cryptor::new(KdfParams::fast())
}

fn plaintext_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..4096)
}

fn passphrase_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9!@#$%^&*()]{1,40}").unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// decrypt(encrypt(P, pass), pass) == P for all P.
    #[test]
    fn roundtrip_preserves_data(plaintext in plaintext_strategy(), pass in passphrase_strategy()) {
        let c = cryptor();
        let payload = c.encrypt(&plaintext, &pass).unwrap();
        prop_assert_eq!(c.decrypt(&payload, &pass).unwrap(), plaintext);
    }

    /// decrypt(encrypt(P, pass1), pass2) fails for pass1 != pass2.
    #[test]
    fn wrong_passphrase_fails(
        plaintext in plaintext_strategy(),
        pass1 in passphrase_strategy(),
        pass2 in passphrase_strategy(),
    ) {
        prop_assume!(pass1 != pass2);
        let c = cryptor();
        let payload = c.encrypt(&plaintext, &pass1).unwrap();
        prop_assert!(matches!(
            c.decrypt(&payload, &pass2),
            Err(CryptoError::Decryption(_))
        ));
    }

    /// Flipping any ciphertext byte breaks authentication.
    #[test]
    fn tampering_is_detected(plaintext in plaintext_strategy(), flip in any::<usize>()) {
        let c = cryptor();
        let mut payload = c.encrypt(&plaintext, "pass").unwrap();
        let idx = flip % payload.ciphertext.len();
        payload.ciphertext[idx] ^= 0x01;
        prop_assert!(c.decrypt(&payload, "pass").is_err());
    }

    /// Base64 transport encoding round-trips the payload exactly.
    #[test]
    fn base64_roundtrip(plaintext in plaintext_strategy()) {
        let c = cryptor();
        let payload = c.encrypt(&plaintext, "pass").unwrap();
        let decoded = EncryptedPayload::from_base64(&payload.to_base64()).unwrap();
        prop_assert_eq!(decoded, payload);
    }

    /// Two encryptions of the same plaintext never share a nonce.
    #[test]
    fn nonces_never_repeat(plaintext in plaintext_strategy()) {
        let c = cryptor();
        let a = c.encrypt(&plaintext, "pass").unwrap();
        let b = c.encrypt(&plaintext, "pass").unwrap();
        prop_assert_ne!(a.nonce, b.nonce);
    }
}

#[test]
fn dynamic_iterations_still_roundtrip() {
    let c = Cryptor::new(KdfParams::fast()).with_dynamic_iterations();
    let payload = c.encrypt(b"data", "short").unwrap();
    assert_eq!(c.decrypt(&payload, "short").unwrap(), b"data");
}
