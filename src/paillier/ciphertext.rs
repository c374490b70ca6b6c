//! Ciphertexts, encryption and homomorphic addition

use crate::error::CryptoError;
use crate::paillier::{KeyFingerprint, PublicKey};
use num_bigint::{BigUint, RandBigInt};
use num_integer::Integer;
use num_traits::{One, Zero};
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest exponent gap bridged by [`PublicKey::rescale`]
pub const MAX_RESCALE_DIGITS: i32 = 18;

/// Draws attempted when sampling a unit modulo `n`
const MAX_RANDOMNESS_DRAWS: usize = 64;

/// A Paillier ciphertext with its fixed-point exponent
///
/// The encoded value is `plaintext × 10^exponent`. Ciphertexts are only
/// meaningful for the key whose fingerprint they carry.
#[derive(Clone, PartialEq, Eq)]
pub struct Ciphertext {
    value: BigUint,
    exponent: i32,
    key: KeyFingerprint,
}

impl Ciphertext {
    pub fn value(&self) -> &BigUint {
        &self.value
    }

    pub fn exponent(&self) -> i32 {
        self.exponent
    }

    pub fn key_fingerprint(&self) -> KeyFingerprint {
        self.key
    }

    /// Wire form: decimal integer plus exponent
    pub fn serialize(&self) -> SerializedCiphertext {
        SerializedCiphertext {
            ciphertext: self.value.to_str_radix(10),
            exponent: self.exponent,
        }
    }
}

impl fmt::Debug for Ciphertext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ciphertext")
            .field("bits", &self.value.bits())
            .field("exponent", &self.exponent)
            .field("key", &self.key)
            .finish()
    }
}

/// Textual ciphertext as exchanged with producers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SerializedCiphertext {
    /// Decimal representation of the ciphertext integer
    pub ciphertext: String,
    /// Power-of-ten exponent
    #[serde(default)]
    pub exponent: i32,
}

impl PublicKey {
    /// Encrypt `m` with fresh randomness from the operating system CSPRNG
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::PlaintextOutOfRange` unless `m < n`.
    pub fn encrypt(&self, m: &BigUint) -> Result<Ciphertext, CryptoError> {
        self.encrypt_with_exponent(m, 0)
    }

    /// Encrypt `m` and stamp the result with `exponent`
    ///
    /// # Errors
    ///
    /// See [`PublicKey::encrypt`].
    pub fn encrypt_with_exponent(
        &self,
        m: &BigUint,
        exponent: i32,
    ) -> Result<Ciphertext, CryptoError> {
        let r = self.random_unit(&mut OsRng)?;
        let mut ciphertext = self.encrypt_with_randomness(m, &r)?;
        ciphertext.exponent = exponent;
        Ok(ciphertext)
    }

    /// Encrypt `m` with caller-supplied randomness `r`
    ///
    /// Deterministic; meant for reproducible tests. `r` must lie in `[1, n)`
    /// and be coprime to `n`.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::PlaintextOutOfRange` or
    /// `CryptoError::InvalidRandomness`.
    pub fn encrypt_with_randomness(
        &self,
        m: &BigUint,
        r: &BigUint,
    ) -> Result<Ciphertext, CryptoError> {
        if m >= self.n() {
            return Err(CryptoError::PlaintextOutOfRange);
        }
        if r.is_zero() || r >= self.n() || !r.gcd(self.n()).is_one() {
            return Err(CryptoError::InvalidRandomness);
        }

        // g^m = (1 + n)^m = 1 + m·n (mod n²)
        let g_m = (BigUint::one() + m * self.n()) % self.n_squared();
        let r_n = r.modpow(self.n(), self.n_squared());

        Ok(Ciphertext {
            value: (g_m * r_n) % self.n_squared(),
            exponent: 0,
            key: self.fingerprint(),
        })
    }

    /// Sample `r` uniformly from the units of `[1, n)`
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidRandomness` if every draw shared a factor
    /// with `n`, which would mean the RNG is broken or `n` is trivially
    /// factorable.
    pub fn random_unit<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
    ) -> Result<BigUint, CryptoError> {
        let one = BigUint::one();
        for _ in 0..MAX_RANDOMNESS_DRAWS {
            let r = rng.gen_biguint_range(&one, self.n());
            if r.gcd(self.n()).is_one() {
                return Ok(r);
            }
        }
        Err(CryptoError::InvalidRandomness)
    }

    /// Homomorphic addition: a ciphertext of the sum of both plaintexts
    ///
    /// Operands with different exponents are first aligned to the smaller one.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::KeyMismatch` if either operand was not produced
    /// under this key, or `CryptoError::ExponentMismatch` if the exponents are
    /// too far apart to align.
    pub fn add(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext, CryptoError> {
        self.check_key(a)?;
        self.check_key(b)?;

        let exponent = a.exponent.min(b.exponent);
        let a = self.rescale(a, exponent)?;
        let b = self.rescale(b, exponent)?;

        Ok(Ciphertext {
            value: (a.value * b.value) % self.n_squared(),
            exponent,
            key: self.fingerprint(),
        })
    }

    /// Lower a ciphertext's exponent without changing the value it encodes
    ///
    /// Multiplies the plaintext by `10^(exponent - new_exponent)` through
    /// `c^k mod n²`.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::ExponentMismatch` when `new_exponent` is larger
    /// than the current exponent or more than [`MAX_RESCALE_DIGITS`] below it.
    pub fn rescale(
        &self,
        ciphertext: &Ciphertext,
        new_exponent: i32,
    ) -> Result<Ciphertext, CryptoError> {
        self.check_key(ciphertext)?;

        let gap = i64::from(ciphertext.exponent) - i64::from(new_exponent);
        if gap == 0 {
            return Ok(ciphertext.clone());
        }
        if gap < 0 || gap > i64::from(MAX_RESCALE_DIGITS) {
            return Err(CryptoError::ExponentMismatch {
                from: ciphertext.exponent,
                to: new_exponent,
            });
        }

        let factor = BigUint::from(10u64.pow(gap as u32));
        Ok(Ciphertext {
            value: ciphertext.value.modpow(&factor, self.n_squared()),
            exponent: new_exponent,
            key: self.fingerprint(),
        })
    }

    /// Rebuild a ciphertext from its decimal wire form
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::MalformedCiphertext` for empty or non-numeric
    /// input, values not below `n²`, and values that are not units modulo `n`
    /// (zero included), since folding such a value into a sum would corrupt it
    /// permanently.
    pub fn ciphertext_from_decimal(
        &self,
        text: &str,
        exponent: i32,
    ) -> Result<Ciphertext, CryptoError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(CryptoError::MalformedCiphertext("empty value".to_string()));
        }
        if !text.bytes().all(|b| b.is_ascii_digit()) {
            return Err(CryptoError::MalformedCiphertext(
                "not a decimal integer".to_string(),
            ));
        }

        // Anything below n² has at most floor(bits · log10 2) + 1 digits
        let max_digits = (self.n_squared().bits() * 30_103 / 100_000 + 1) as usize;
        if text.trim_start_matches('0').len() > max_digits {
            return Err(CryptoError::MalformedCiphertext(format!(
                "more than {} digits",
                max_digits
            )));
        }

        let value = BigUint::parse_bytes(text.as_bytes(), 10).ok_or_else(|| {
            CryptoError::MalformedCiphertext("not a decimal integer".to_string())
        })?;
        if value >= *self.n_squared() {
            return Err(CryptoError::MalformedCiphertext(
                "value is not below n²".to_string(),
            ));
        }
        if !value.gcd(self.n()).is_one() {
            return Err(CryptoError::MalformedCiphertext(
                "value is not invertible modulo n".to_string(),
            ));
        }

        Ok(Ciphertext {
            value,
            exponent,
            key: self.fingerprint(),
        })
    }

    /// Rebuild a ciphertext from its serialized form
    ///
    /// # Errors
    ///
    /// See [`PublicKey::ciphertext_from_decimal`].
    pub fn deserialize(
        &self,
        serialized: &SerializedCiphertext,
    ) -> Result<Ciphertext, CryptoError> {
        self.ciphertext_from_decimal(&serialized.ciphertext, serialized.exponent)
    }

    fn check_key(&self, ciphertext: &Ciphertext) -> Result<(), CryptoError> {
        if ciphertext.key == self.fingerprint() {
            Ok(())
        } else {
            Err(CryptoError::KeyMismatch)
        }
    }
}
