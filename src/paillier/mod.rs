//! Paillier additively homomorphic cryptosystem
//!
//! Producers encrypt under a [`PublicKey`]; the aggregator multiplies
//! ciphertexts modulo `n²` to add the underlying plaintexts and only the
//! [`PrivateKey`] holder can decrypt the result.

pub mod ciphertext;
pub mod keys;
pub mod primes;

pub use ciphertext::{Ciphertext, SerializedCiphertext, MAX_RESCALE_DIGITS};
pub use keys::{
    generate_keypair, generate_keypair_with_rng, KeyFingerprint, KeyPair, PrivateKey, PublicKey,
    DEFAULT_KEY_BITS, MIN_KEY_BITS,
};

/// Shared small key for unit tests across the crate
#[cfg(test)]
pub(crate) fn test_keypair() -> &'static KeyPair {
    use std::sync::OnceLock;

    static KEYPAIR: OnceLock<KeyPair> = OnceLock::new();
    KEYPAIR.get_or_init(|| generate_keypair(256).expect("test key generation"))
}
